//! Content protection metadata carried by manifests.
//!
//! Nothing here talks to a license server. The goal is to tell a player which key systems
//! can play a stream, which keys it needs and which init data to hand to the CDM.

pub mod content_protection;
pub mod playready;
pub mod pssh;

use std::{collections::BTreeSet, sync::LazyLock};

use base64::{
    engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig},
    DecodeError, Engine,
};

pub const CLEAR_KEY: &str = "org.w3.clearkey";
pub const WIDEVINE: &str = "com.widevine.alpha";
pub const PLAYREADY: &str = "com.microsoft.playready";
pub const FAIRPLAY: &str = "com.apple.fps";
pub const WISEPLAY: &str = "com.huawei.wiseplay";

static ENGINE: LazyLock<GeneralPurpose> = LazyLock::new(|| {
    GeneralPurpose::new(
        &base64::alphabet::STANDARD,
        GeneralPurposeConfig::new()
            .with_encode_padding(true)
            .with_decode_padding_mode(DecodePaddingMode::Indifferent)
            .with_decode_allow_trailing_bits(true),
    )
});

pub fn base64_decode<T: AsRef<[u8]>>(input: T) -> Result<Vec<u8>, DecodeError> {
    ENGINE.decode(input)
}

pub fn base64_encode<T: AsRef<[u8]>>(input: T) -> String {
    ENGINE.encode(input)
}

/// Init data to hand to a CDM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitData {
    /// `cenc` for PSSH boxes.
    pub init_data_type: String,
    pub data: Vec<u8>,
    pub key_id: Option<String>,
}

impl InitData {
    pub fn cenc(data: Vec<u8>, key_id: Option<String>) -> Self {
        Self {
            init_data_type: "cenc".to_string(),
            data,
            key_id,
        }
    }
}

/// What a player needs to know to use one key system for a stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrmInfo {
    /// `None` when the descriptor names a scheme no key system is registered for.
    pub key_system: Option<String>,
    pub license_server_uri: Option<String>,
    pub init_data: Vec<InitData>,
    /// Normalized key ids: lowercase hex without dashes.
    pub key_ids: BTreeSet<String>,
}

impl DrmInfo {
    pub fn unknown(key_ids: BTreeSet<String>) -> Self {
        Self {
            key_ids,
            ..Default::default()
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.key_system.is_none()
    }
}

/// Lowercases a key id and strips dashes, so `AB-12` and `ab12` compare equal.
pub fn normalize_key_id(key_id: &str) -> String {
    key_id
        .trim()
        .chars()
        .filter(|c| *c != '-')
        .map(|c| c.to_ascii_lowercase())
        .collect()
}
