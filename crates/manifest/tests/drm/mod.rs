use iori_manifest::{
    dash::DashParser,
    drm::{
        base64_encode, normalize_key_id,
        playready::{self, PlayReadyRecord, RIGHTS_MANAGEMENT_HEADER},
        pssh::{PsshBox, PLAYREADY_SYSTEM_ID, WIDEVINE_SYSTEM_ID},
        PLAYREADY, WIDEVINE,
    },
    ErrorCode, ManifestConfig, ManifestError, Severity,
};
use url::Url;

use crate::setup_tracing;

const KEY_ID: [u8; 16] = [
    0x01, 0x23, 0x45, 0x67, 0x89, 0xab, 0xcd, 0xef, 0x01, 0x23, 0x45, 0x67, 0x89, 0xab, 0xcd, 0xef,
];

fn parser(config: ManifestConfig) -> DashParser {
    setup_tracing();
    DashParser::new(
        Url::parse("https://cdn.example.com/drm/manifest.mpd").unwrap(),
        config,
    )
}

/// One adaptation set with the given content protection, and representations carrying their
/// own.
fn mpd(adaptation_set: &str, representations: &[&str]) -> String {
    let representations: String = representations
        .iter()
        .enumerate()
        .map(|(i, protection)| {
            format!(r#"<Representation id="r{i}" bandwidth="{}">{protection}</Representation>"#, (i + 1) * 1000)
        })
        .collect();
    format!(
        r#"<MPD xmlns:cenc="urn:mpeg:cenc:2013" xmlns:mspr="urn:microsoft:playready" mediaPresentationDuration="PT8S">
          <Period>
            <AdaptationSet contentType="video" mimeType="video/mp4">
              {adaptation_set}
              <SegmentTemplate duration="4" media="$RepresentationID$/$Number$.m4s"/>
              {representations}
            </AdaptationSet>
          </Period>
        </MPD>"#
    )
}

const WIDEVINE_CP: &str = r#"<ContentProtection schemeIdUri="urn:uuid:edef8ba9-79d6-4ace-a3c8-27dcd51d21ed"/>"#;
const PLAYREADY_CP: &str = r#"<ContentProtection schemeIdUri="urn:uuid:9a04f079-9840-4286-ab92-e65be0885f95"/>"#;
const CLEAR_KEY_CP: &str = r#"<ContentProtection schemeIdUri="urn:uuid:e2719d58-a985-b3c9-781a-b030af78d30e"/>"#;

#[test]
fn pssh_round_trip() -> anyhow::Result<()> {
    let widevine = PsshBox::new(WIDEVINE_SYSTEM_ID, vec![KEY_ID], b"\x12\x10payload".to_vec());
    let playready = PsshBox::new(PLAYREADY_SYSTEM_ID, vec![], b"<WRMHEADER/>".to_vec());
    assert_eq!((widevine.version, playready.version), (1, 0));

    let mut concatenated = widevine.to_bytes();
    concatenated.extend(playready.to_bytes());
    assert_eq!(concatenated.len(), widevine.size() + playready.size());

    let boxes = PsshBox::parse_all(&concatenated)?;
    assert_eq!(boxes, vec![widevine.clone(), playready]);
    assert_eq!(boxes[0].key_ids_hex(), vec!["0123456789abcdef0123456789abcdef"]);
    assert_eq!(boxes[0].system_id_uuid(), "edef8ba9-79d6-4ace-a3c8-27dcd51d21ed");

    let single = PsshBox::try_from(widevine.to_bytes().as_slice())?;
    assert_eq!(single, widevine);
    Ok(())
}

#[test]
fn malformed_pssh() {
    let mut bytes = PsshBox::new(WIDEVINE_SYSTEM_ID, vec![KEY_ID], vec![1, 2, 3]).to_bytes();

    let truncated = &bytes[..bytes.len() - 2];
    let error = PsshBox::parse_all(truncated).unwrap_err();
    assert_eq!(error.code(), ErrorCode::MalformedPssh);
    assert_eq!(error.severity(), Severity::Critical);

    // version byte
    bytes[8] = 2;
    assert!(matches!(
        PsshBox::parse_all(&bytes),
        Err(ManifestError::MalformedPssh(message)) if message.contains("version")
    ));
}

#[test]
fn playready_object_license_url() {
    let header = r#"<WRMHEADER version="4.0.0.0"><DATA><LA_URL>https://pr.example.com/license</LA_URL></DATA></WRMHEADER>"#;
    let object = playready::build_object(&[PlayReadyRecord {
        record_type: RIGHTS_MANAGEMENT_HEADER,
        value: playready::encode_utf16le(header),
    }]);

    let records = playready::parse_object(&object);
    assert_eq!(records.len(), 1);
    assert_eq!(playready::rights_management_header(&records).as_deref(), Some(header));
    assert_eq!(
        playready::license_url(&object).as_deref(),
        Some("https://pr.example.com/license")
    );

    // a declared length that does not match is rejected
    let mut broken = object.clone();
    broken[0] = broken[0].wrapping_add(1);
    assert!(playready::parse_object(&broken).is_empty());
}

#[test]
fn key_id_normalization() {
    assert_eq!(
        normalize_key_id("01234567-89AB-CDEF-0123-456789ABCDEF"),
        "0123456789abcdef0123456789abcdef"
    );
    assert_eq!(normalize_key_id(" ab-12 "), normalize_key_id("AB12"));
}

#[tokio::test]
async fn equivalent_key_ids_do_not_conflict() -> anyhow::Result<()> {
    let adaptation_set = r#"
        <ContentProtection schemeIdUri="urn:mpeg:dash:mp4protection:2011" value="cenc" cenc:default_KID="AB-12"/>
        <ContentProtection schemeIdUri="urn:uuid:edef8ba9-79d6-4ace-a3c8-27dcd51d21ed" cenc:default_KID="ab12"/>"#;
    let manifest = parser(ManifestConfig::default())
        .parse(&mpd(adaptation_set, &[""]))
        .await?;

    let stream = &manifest.periods[0].streams[0];
    assert_eq!(stream.key_ids.iter().collect::<Vec<_>>(), vec!["ab12"]);
    assert_eq!(stream.drm_infos.len(), 1);
    assert_eq!(stream.drm_infos[0].key_system.as_deref(), Some(WIDEVINE));
    Ok(())
}

#[tokio::test]
async fn conflicting_key_ids_abort_parse() {
    let adaptation_set = r#"
        <ContentProtection schemeIdUri="urn:mpeg:dash:mp4protection:2011" cenc:default_KID="ab12"/>
        <ContentProtection schemeIdUri="urn:uuid:edef8ba9-79d6-4ace-a3c8-27dcd51d21ed" cenc:default_KID="cd34"/>"#;
    let error = parser(ManifestConfig::default())
        .parse(&mpd(adaptation_set, &[""]))
        .await
        .unwrap_err();
    assert!(matches!(&error, ManifestError::ConflictingKeyIds(ids) if ids.len() == 2));
    assert_eq!(error.code(), ErrorCode::ConflictingKeyIds);
}

#[tokio::test]
async fn key_systems_intersect_across_representations() -> anyhow::Result<()> {
    let both = format!("{WIDEVINE_CP}{PLAYREADY_CP}");
    let playready_and_clear_key = format!("{PLAYREADY_CP}{CLEAR_KEY_CP}");
    let manifest = parser(ManifestConfig::default())
        .parse(&mpd("", &[both.as_str(), playready_and_clear_key.as_str()]))
        .await?;

    for stream in &manifest.periods[0].streams {
        let key_systems: Vec<_> = stream
            .drm_infos
            .iter()
            .filter_map(|info| info.key_system.as_deref())
            .collect();
        assert_eq!(key_systems, vec![PLAYREADY]);
    }
    Ok(())
}

#[tokio::test]
async fn disjoint_key_systems_abort_parse() {
    let both = format!("{WIDEVINE_CP}{PLAYREADY_CP}");
    let error = parser(ManifestConfig::default())
        .parse(&mpd("", &[both.as_str(), PLAYREADY_CP, WIDEVINE_CP]))
        .await
        .unwrap_err();
    assert!(matches!(error, ManifestError::NoCommonKeySystem));
    assert_eq!(error.severity(), Severity::Critical);
}

#[tokio::test]
async fn ignore_drm_info_offers_registered_key_systems() -> anyhow::Result<()> {
    let pssh = base64_encode(PsshBox::new(WIDEVINE_SYSTEM_ID, vec![], vec![0x12]).to_bytes());
    let adaptation_set = format!(
        r#"<ContentProtection schemeIdUri="urn:mpeg:dash:mp4protection:2011" cenc:default_KID="ab12"/>
        <ContentProtection schemeIdUri="urn:uuid:edef8ba9-79d6-4ace-a3c8-27dcd51d21ed">
          <cenc:pssh>{pssh}</cenc:pssh>
          <Laurl>https://widevine.example.com/license</Laurl>
        </ContentProtection>"#
    );
    let config = ManifestConfig::default().with_ignore_drm_info(true);
    let manifest = parser(config).parse(&mpd(&adaptation_set, &[""])).await?;

    let infos = &manifest.periods[0].streams[0].drm_infos;
    assert!(infos.len() > 1);
    assert!(infos.iter().all(|info| info.license_server_uri.is_none()));
    assert!(infos.iter().all(|info| info.key_ids.contains("ab12")));
    assert!(infos
        .iter()
        .any(|info| info.key_system.as_deref() == Some(PLAYREADY)));
    Ok(())
}
