use std::collections::BTreeSet;

use super::{
    base64_decode, normalize_key_id, playready, pssh::PsshBox, pssh::PLAYREADY_SYSTEM_ID,
    DrmInfo, InitData, CLEAR_KEY, PLAYREADY, WIDEVINE,
};
use crate::{
    config::ManifestConfig,
    dash::xml::XmlNode,
    error::{ManifestError, ManifestResult},
};

/// Scheme of the generic `cenc` descriptor, which names no key system.
pub const MP4_PROTECTION_SCHEME: &str = "urn:mpeg:dash:mp4protection:2011";

/// Content protection resolved for an adaptation set, refined by each of its representations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentProtectionContext {
    pub default_key_id: Option<String>,
    pub default_init: Vec<InitData>,
    pub drm_infos: Vec<DrmInfo>,
    pub first_representation: bool,
}

/// One `ContentProtection` element with its common fields pulled out.
struct ParsedElement<'a> {
    node: &'a XmlNode,
    scheme_uri: String,
    key_id: Option<String>,
    init: Vec<InitData>,
    /// Key ids listed by version 1 `cenc:pssh` boxes.
    pssh_key_ids: BTreeSet<String>,
}

fn parse_element(node: &XmlNode) -> ManifestResult<ParsedElement<'_>> {
    let scheme_uri = node
        .attribute("schemeIdUri")
        .unwrap_or_default()
        .to_ascii_lowercase();
    let key_id = node
        .attribute("default_KID")
        .map(normalize_key_id)
        .filter(|key_id| !key_id.is_empty());

    let mut init = Vec::new();
    let mut pssh_key_ids = BTreeSet::new();
    for pssh in node.children_named("pssh") {
        let Some(text) = pssh.non_empty_text() else {
            continue;
        };
        let data = base64_decode(text)?;
        for pssh_box in PsshBox::parse_all(&data)? {
            pssh_key_ids.extend(pssh_box.key_ids_hex());
        }
        init.push(InitData::cenc(data, None));
    }

    Ok(ParsedElement {
        node,
        scheme_uri,
        key_id,
        init,
        pssh_key_ids,
    })
}

fn laurl(node: &XmlNode) -> Option<&XmlNode> {
    node.child("Laurl").or_else(|| node.child("laurl"))
}

fn widevine_license_url(element: &ParsedElement) -> Option<String> {
    if let Some(url) = element.node.child("Laurl").and_then(XmlNode::non_empty_text) {
        return Some(url.to_string());
    }
    element
        .node
        .child("laurl")
        .and_then(|node| node.attribute("licenseUrl"))
        .map(str::to_string)
}

fn clear_key_license_url(element: &ParsedElement) -> Option<String> {
    let node = laurl(element.node)?;
    if node.attribute("Lic_type") != Some("EME-1.0") {
        return None;
    }
    node.non_empty_text().map(str::to_string)
}

fn playready_license_url(element: &ParsedElement) -> ManifestResult<Option<String>> {
    if let Some(url) = laurl(element.node).and_then(XmlNode::non_empty_text) {
        return Ok(Some(url.to_string()));
    }
    match playready_object(element)? {
        Some(object) => Ok(playready::license_url(&object)),
        None => Ok(None),
    }
}

fn playready_object(element: &ParsedElement) -> ManifestResult<Option<Vec<u8>>> {
    match element.node.child("pro").and_then(XmlNode::non_empty_text) {
        Some(text) => Ok(Some(base64_decode(text)?)),
        None => Ok(None),
    }
}

/// Wraps the `mspr:pro` payload in a PlayReady pssh box.
fn playready_init(element: &ParsedElement) -> ManifestResult<Vec<InitData>> {
    Ok(playready_object(element)?
        .map(|object| {
            let pssh = PsshBox::new(PLAYREADY_SYSTEM_ID, vec![], object);
            vec![InitData::cenc(pssh.to_bytes(), None)]
        })
        .unwrap_or_default())
}

fn license_server_uri(key_system: &str, element: &ParsedElement) -> ManifestResult<Option<String>> {
    Ok(match key_system {
        WIDEVINE => widevine_license_url(element),
        CLEAR_KEY => clear_key_license_url(element),
        PLAYREADY => playready_license_url(element)?,
        _ => None,
    })
}

fn convert_elements(
    default_init: &[InitData],
    elements: &[ParsedElement],
    config: &ManifestConfig,
    key_ids: &BTreeSet<String>,
) -> ManifestResult<Vec<DrmInfo>> {
    let mut infos = Vec::new();
    for element in elements {
        let Some(key_system) = config.key_system_for_uri(&element.scheme_uri) else {
            tracing::debug!(scheme = element.scheme_uri, "Unrecognized content protection scheme");
            continue;
        };

        let init_data = if !element.init.is_empty() {
            element.init.clone()
        } else if !default_init.is_empty() {
            default_init.to_vec()
        } else if key_system == PLAYREADY {
            playready_init(element)?
        } else {
            Vec::new()
        };

        let mut info_key_ids = key_ids.clone();
        info_key_ids.extend(element.pssh_key_ids.iter().cloned());
        infos.push(DrmInfo {
            key_system: Some(key_system.to_string()),
            license_server_uri: license_server_uri(key_system, element)?,
            init_data,
            key_ids: info_key_ids,
        });
    }
    Ok(infos)
}

/// Resolves the `ContentProtection` elements of an adaptation set.
///
/// Every descriptor carrying `cenc:default_KID` must agree on it once normalized. A lone
/// `mp4protection` descriptor (or `ignore_drm_info`) means the stream is encrypted without
/// naming a key system, so every registered key system but Clear Key is offered.
pub fn parse_from_adaptation_set(
    elements: &[XmlNode],
    config: &ManifestConfig,
) -> ManifestResult<ContentProtectionContext> {
    let parsed = elements
        .iter()
        .map(parse_element)
        .collect::<ManifestResult<Vec<_>>>()?;

    let key_ids: BTreeSet<String> = parsed
        .iter()
        .filter_map(|element| element.key_id.clone())
        .collect();
    if key_ids.len() > 1 {
        return Err(ManifestError::ConflictingKeyIds(key_ids.into_iter().collect()));
    }

    let encrypted = !parsed.is_empty();
    let mut default_init = Vec::new();
    let mut drm_infos = Vec::new();
    let mut has_vendor_elements = false;
    if !config.ignore_drm_info {
        let (cenc, vendor): (Vec<_>, Vec<_>) = parsed
            .into_iter()
            .partition(|element| element.scheme_uri == MP4_PROTECTION_SCHEME);
        if let Some(element) = cenc.into_iter().rev().find(|element| !element.init.is_empty()) {
            default_init = element.init;
        }

        if !vendor.is_empty() {
            has_vendor_elements = true;
            drm_infos = convert_elements(&default_init, &vendor, config, &key_ids)?;
            if drm_infos.is_empty() {
                let mut unknown = DrmInfo::unknown(key_ids.clone());
                unknown.init_data = default_init.clone();
                drm_infos.push(unknown);
            }
        }
    }

    if encrypted && (config.ignore_drm_info || !has_vendor_elements) {
        let key_systems: BTreeSet<&str> = config
            .key_systems_by_uri
            .values()
            .map(String::as_str)
            .filter(|key_system| *key_system != CLEAR_KEY)
            .collect();
        drm_infos = key_systems
            .into_iter()
            .map(|key_system| DrmInfo {
                key_system: Some(key_system.to_string()),
                license_server_uri: None,
                init_data: default_init.clone(),
                key_ids: key_ids.clone(),
            })
            .collect();
    }

    let default_key_id = key_ids.into_iter().next();
    if let Some(key_id) = &default_key_id {
        for init in drm_infos.iter_mut().flat_map(|info| info.init_data.iter_mut()) {
            init.key_id = Some(key_id.clone());
        }
    }

    Ok(ContentProtectionContext {
        default_key_id,
        default_init,
        drm_infos,
        first_representation: true,
    })
}

/// Reconciles a representation's descriptors with those inherited from its adaptation set.
///
/// Returns the key id the representation is encrypted with, if any is known.
pub fn parse_from_representation(
    elements: &[XmlNode],
    context: &mut ContentProtectionContext,
    config: &ManifestConfig,
) -> ManifestResult<Option<String>> {
    let representation = parse_from_adaptation_set(elements, config)?;

    if context.first_representation {
        let adaptation_set_unknown =
            context.drm_infos.len() == 1 && context.drm_infos[0].is_unknown();
        if context.drm_infos.is_empty()
            || (adaptation_set_unknown && !representation.drm_infos.is_empty())
        {
            context.drm_infos = representation.drm_infos;
        }
        context.first_representation = false;
    } else if !representation.drm_infos.is_empty() {
        context.drm_infos.retain(|inherited| {
            representation
                .drm_infos
                .iter()
                .any(|info| info.key_system == inherited.key_system)
        });
        if context.drm_infos.is_empty() {
            return Err(ManifestError::NoCommonKeySystem);
        }
    }

    Ok(representation
        .default_key_id
        .or_else(|| context.default_key_id.clone()))
}
