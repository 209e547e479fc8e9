use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::{
    drm::{CLEAR_KEY, FAIRPLAY, PLAYREADY, WIDEVINE, WISEPLAY},
    error::ManifestResult,
};

/// Options shared by the DASH and HLS parsers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ManifestConfig {
    /// Upper bound on the number of references a live fixed-duration
    /// template keeps generated behind the live edge.
    pub segment_limit: usize,

    /// Skip vendor content-protection descriptors and offer every key system
    /// registered in `key_systems_by_uri` instead, keeping only the key ids.
    pub ignore_drm_info: bool,

    /// Maps a lowercased `ContentProtection@schemeIdUri` to a key system name.
    pub key_systems_by_uri: HashMap<String, String>,

    /// Overrides `MPD@suggestedPresentationDelay`, in seconds.
    pub default_presentation_delay: Option<f64>,

    /// Ignore `MPD@maxSegmentDuration` and derive it from the segments instead.
    pub ignore_max_segment_duration: bool,

    /// Lower bound for live update intervals, in seconds.
    pub live_update_interval_floor: f64,
}

impl Default for ManifestConfig {
    fn default() -> Self {
        Self {
            segment_limit: 1000,
            ignore_drm_info: false,
            key_systems_by_uri: default_key_systems_by_uri(),
            default_presentation_delay: None,
            ignore_max_segment_duration: false,
            live_update_interval_floor: 1.0,
        }
    }
}

fn default_key_systems_by_uri() -> HashMap<String, String> {
    [
        ("urn:uuid:1077efec-c0b2-4d02-ace3-3c1e52e2fb4b", CLEAR_KEY),
        ("urn:uuid:e2719d58-a985-b3c9-781a-b030af78d30e", CLEAR_KEY),
        ("urn:uuid:edef8ba9-79d6-4ace-a3c8-27dcd51d21ed", WIDEVINE),
        ("urn:uuid:9a04f079-9840-4286-ab92-e65be0885f95", PLAYREADY),
        ("urn:uuid:79f0049a-4098-8642-ab92-e65be0885f95", PLAYREADY),
        ("urn:uuid:94ce86fb-07ff-4f43-adb8-93d2fa968ca2", FAIRPLAY),
        ("urn:uuid:3d5e6d35-9b9a-41e8-b843-dd3c6e72c42c", WISEPLAY),
    ]
    .into_iter()
    .map(|(uri, key_system)| (uri.to_string(), key_system.to_string()))
    .collect()
}

impl ManifestConfig {
    pub fn from_json_str(input: &str) -> ManifestResult<Self> {
        Ok(serde_json::from_str(input)?)
    }

    pub fn with_segment_limit(mut self, segment_limit: usize) -> Self {
        self.segment_limit = segment_limit;
        self
    }

    pub fn with_ignore_drm_info(mut self, ignore: bool) -> Self {
        self.ignore_drm_info = ignore;
        self
    }

    /// Looks up the key system for a scheme URI, case-insensitively.
    pub fn key_system_for_uri(&self, scheme_uri: &str) -> Option<&str> {
        self.key_systems_by_uri
            .get(&scheme_uri.to_ascii_lowercase())
            .map(String::as_str)
    }
}
