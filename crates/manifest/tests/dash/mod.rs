mod live;

use iori_manifest::{
    dash::{DashParser, Manifest, Stream, StreamSegments},
    drm::PLAYREADY,
    ManifestConfig, ManifestResult, SegmentReference,
};
use url::Url;

use crate::{assert_ordered, setup_tracing};

async fn parse(text: &str) -> ManifestResult<Manifest> {
    setup_tracing();
    let uri = Url::parse("https://cdn.example.com/vod/manifest.mpd")?;
    DashParser::new(uri, ManifestConfig::default()).parse(text).await
}

async fn references(stream: &Stream) -> Vec<SegmentReference> {
    match &stream.segments {
        StreamSegments::Indexed(index) => index.lock().await.references().to_vec(),
        StreamSegments::Deferred(request) => panic!("unexpected deferred index {request:?}"),
    }
}

fn stream<'a>(manifest: &'a Manifest, id: &str) -> &'a Stream {
    manifest
        .periods
        .iter()
        .flat_map(|period| period.streams.iter())
        .find(|stream| stream.id.as_deref() == Some(id))
        .unwrap_or_else(|| panic!("no stream {id}"))
}

#[tokio::test]
async fn vod_fixed_duration_template() -> anyhow::Result<()> {
    let manifest = parse(include_str!("../fixtures/dash/vod-multi-adaptation.mpd")).await?;
    assert!(!manifest.dynamic);
    assert_eq!(manifest.periods.len(), 1);
    assert_eq!(manifest.periods[0].streams.len(), 4);

    let video = stream(&manifest, "video-720");
    assert_eq!(video.bandwidth, Some(2400000));
    assert_eq!(video.codecs.as_deref(), Some("avc1.4d401f"));

    let references = references(video).await;
    assert_eq!(references.len(), 10);
    assert_ordered(&references);
    assert_eq!(references[0].start_time, 0.0);
    assert_eq!(references[9].end_time, 40.0);
    assert_eq!(
        references[0].uris()[0].as_str(),
        "https://cdn.example.com/vod/media/video-720/seg-00001.m4s"
    );
    assert_eq!(
        references[9].uris()[0].as_str(),
        "https://cdn.example.com/vod/media/video-720/seg-00010.m4s"
    );

    let init = video.init_segment.as_ref().expect("init segment");
    assert_eq!(
        init.uris()[0].as_str(),
        "https://cdn.example.com/vod/media/video-720/init.mp4"
    );
    assert_eq!(init.quality.bandwidth, Some(2400000));
    Ok(())
}

#[tokio::test]
async fn vod_segment_timeline_uses_media_time() -> anyhow::Result<()> {
    let manifest = parse(include_str!("../fixtures/dash/vod-multi-adaptation.mpd")).await?;
    let audio = stream(&manifest, "audio-ja");
    assert_eq!(audio.language.as_deref(), Some("ja"));
    assert_eq!(audio.content_type.as_deref(), Some("audio"));

    let references = references(audio).await;
    assert_eq!(references.len(), 10);
    assert_ordered(&references);
    assert_eq!(references[9].start_time, 36.0);
    assert_eq!(
        references[9].uris()[0].as_str(),
        "https://cdn.example.com/vod/media/audio/1728000.m4s"
    );
    Ok(())
}

#[tokio::test]
async fn vod_text_stream_spans_period() -> anyhow::Result<()> {
    let manifest = parse(include_str!("../fixtures/dash/vod-multi-adaptation.mpd")).await?;
    let text = stream(&manifest, "sub-en");
    assert!(text.init_segment.is_none());

    let references = references(text).await;
    assert_eq!(references.len(), 1);
    assert_eq!((references[0].start_time, references[0].end_time), (0.0, 40.0));
    assert_eq!(
        references[0].uris()[0].as_str(),
        "https://cdn.example.com/vod/media/subs/en.vtt"
    );
    Ok(())
}

#[tokio::test]
async fn representations_narrow_key_systems() -> anyhow::Result<()> {
    let manifest = parse(include_str!("../fixtures/dash/vod-multi-adaptation.mpd")).await?;

    // the adaptation set offers Widevine and PlayReady, video-720 only PlayReady
    for id in ["video-360", "video-720"] {
        let video = stream(&manifest, id);
        assert_eq!(video.drm_infos.len(), 1);
        let info = &video.drm_infos[0];
        assert_eq!(info.key_system.as_deref(), Some(PLAYREADY));
        assert_eq!(
            info.license_server_uri.as_deref(),
            Some("https://playready.example.com/rightsmanager.asmx")
        );
        assert!(video.key_ids.contains("0123456789abcdef0123456789abcdef"));
        assert_eq!(video.key_ids.len(), 1);
    }

    let audio = stream(&manifest, "audio-ja");
    assert!(audio.drm_infos.is_empty());
    assert!(audio.key_ids.is_empty());
    Ok(())
}

#[tokio::test]
async fn multi_period_fit() -> anyhow::Result<()> {
    let manifest = parse(include_str!("../fixtures/dash/multi-period.mpd")).await?;
    assert_eq!(manifest.periods.len(), 2);
    assert_eq!(manifest.periods[1].start, 20.0);

    let main = references(&manifest.periods[0].streams[0]).await;
    assert_eq!(main.len(), 4);
    // the last segment is cut at the period end
    assert_eq!(main[3].end_time, 20.0);
    assert_eq!(main[3].true_end_time(), 24.0);
    assert!(main.iter().all(|r| r.append_window_end == 20.0));

    let ad = references(&manifest.periods[1].streams[0]).await;
    assert_eq!(ad.len(), 2);
    assert_ordered(&ad);
    assert_eq!(ad[0].start_time, 20.0);
    assert_eq!(ad[1].end_time, 30.0);
    assert_eq!(
        ad[0].init_segment.as_ref().map(|init| init.uris()[0].to_string()),
        Some("https://cdn.example.com/vod/ad/init.mp4".to_string())
    );
    Ok(())
}

#[tokio::test]
async fn segment_list_longer_than_timeline() -> anyhow::Result<()> {
    let manifest = parse(include_str!("../fixtures/dash/segment-list-mismatch.mpd")).await?;
    let references = references(&manifest.periods[0].streams[0]).await;

    // 3 urls but 2 timeline entries
    assert_eq!(references.len(), 2);
    assert_eq!(references[0].end_time, 4.0);
    assert_eq!(
        references[1].uris()[0].as_str(),
        "https://cdn.example.com/vod/a/2.m4s"
    );
    Ok(())
}

#[tokio::test]
async fn segment_base_is_deferred() -> anyhow::Result<()> {
    let manifest = parse(
        r#"<MPD mediaPresentationDuration="PT60S">
          <Period>
            <AdaptationSet mimeType="video/mp4">
              <Representation id="v" bandwidth="500000">
                <BaseURL>https://media.example.com/v.mp4</BaseURL>
                <SegmentBase indexRange="1000-2999" timescale="1000" presentationTimeOffset="500">
                  <Initialization range="0-999"/>
                </SegmentBase>
              </Representation>
            </AdaptationSet>
          </Period>
        </MPD>"#,
    )
    .await?;

    let stream = &manifest.periods[0].streams[0];
    let StreamSegments::Deferred(request) = &stream.segments else {
        panic!("SegmentBase should be loaded from the media");
    };
    assert_eq!(request.uris[0].as_str(), "https://media.example.com/v.mp4");
    assert_eq!((request.start_byte, request.end_byte), (1000, Some(2999)));
    assert_eq!(request.scaled_presentation_time_offset, 0.5);
    assert_eq!(request.append_window_end, 60.0);

    let init = request.init_segment.as_ref().expect("init segment");
    assert_eq!((init.start_byte, init.end_byte), (0, Some(999)));
    Ok(())
}

#[tokio::test]
async fn repeated_timeline_start_is_dropped() -> anyhow::Result<()> {
    let manifest = parse(
        r#"<MPD mediaPresentationDuration="PT12S">
          <Period id="p">
            <AdaptationSet contentType="video" mimeType="video/mp4">
              <SegmentTemplate timescale="1" media="$Time$.m4s">
                <SegmentTimeline>
                  <S t="0" d="4"/>
                  <S t="0" d="4"/>
                  <S d="4" r="1"/>
                </SegmentTimeline>
              </SegmentTemplate>
              <Representation id="dup"/>
            </AdaptationSet>
          </Period>
        </MPD>"#,
    )
    .await?;

    let references = references(stream(&manifest, "dup")).await;
    assert_ordered(&references);
    assert!(references.iter().all(|r| r.start_time < r.end_time));
    let starts: Vec<_> = references.iter().map(|r| r.start_time).collect();
    assert_eq!(starts, vec![0.0, 4.0, 8.0]);
    Ok(())
}
