use thiserror::Error;

/// How far a failure reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// The manifest, or the stream being built from it, can not be used.
    Critical,
    /// The caller may retry, or carry on with the state it already has.
    Recoverable,
}

/// Numeric error codes, grouped by category.
///
/// - `1xxx`: handoff to collaborators (index fetches)
/// - `2xxx`: binary structures embedded in manifests
/// - `4xxx`: manifest structure and semantics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ErrorCode {
    IndexFetchFailed = 1001,
    OperationAborted = 1002,

    MalformedPssh = 2001,
    Io = 2002,

    InvalidUrl = 4000,
    InvalidXml = 4001,
    NoSegmentInfo = 4002,
    EmptySegmentTimeline = 4003,
    PsshBadEncoding = 4007,
    NoCommonKeySystem = 4008,
    ConflictingKeyIds = 4010,
    UnresolvedTemplateVariable = 4011,
    MissingAttribute = 4012,
    InvalidAttribute = 4013,
    NoPeriod = 4014,
    PlaylistHeaderMissing = 4020,
    InvalidPlaylistHierarchy = 4021,
    InvalidTag = 4022,
    InvalidConfig = 4030,
}

impl ErrorCode {
    pub fn as_u16(self) -> u16 {
        self as u16
    }
}

#[derive(Error, Debug)]
pub enum ManifestError {
    // MPEG-DASH errors
    #[error("No segment information for representation {0:?}")]
    NoSegmentInfo(Option<String>),

    #[error("SegmentTimeline does not contain any segment")]
    EmptySegmentTimeline,

    #[error("Conflicting default key ids: {0:?}")]
    ConflictingKeyIds(Vec<String>),

    #[error("Representations of an adaptation set share no key system")]
    NoCommonKeySystem,

    #[error("Invalid base64 payload: {0}")]
    PsshBadEncoding(#[from] base64::DecodeError),

    #[error("Malformed pssh box: {0}")]
    MalformedPssh(String),

    #[error("No value for ${0}$ in template {1:?}")]
    UnresolvedTemplateVariable(String, String),

    #[error("Invalid MPD document: {0}")]
    InvalidXml(String),

    #[error("Missing attribute {attribute} on {element}")]
    MissingAttribute { element: String, attribute: String },

    #[error("Invalid value {value:?} for {attribute}")]
    InvalidAttribute { attribute: String, value: String },

    #[error("Manifest does not declare any period")]
    NoPeriod,

    // HLS errors
    #[error("Playlist does not start with #EXTM3U")]
    PlaylistHeaderMissing,

    #[error("Media playlist tag {0} found in a master playlist")]
    InvalidPlaylistHierarchy(String),

    #[error("Invalid playlist tag: {0}")]
    InvalidTag(String),

    // Index handoff
    #[error("Segment index fetch aborted")]
    IndexFetchAborted,

    #[error("Segment index fetch failed: {0}")]
    IndexFetchFailed(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    UrlParseError(#[from] url::ParseError),

    #[error(transparent)]
    XmlError(#[from] quick_xml::Error),

    #[error(transparent)]
    XmlAttrError(#[from] quick_xml::events::attributes::AttrError),

    #[error(transparent)]
    IOError(#[from] std::io::Error),

    #[error(transparent)]
    JsonError(#[from] serde_json::Error),
}

impl ManifestError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ManifestError::NoSegmentInfo(_) => ErrorCode::NoSegmentInfo,
            ManifestError::EmptySegmentTimeline => ErrorCode::EmptySegmentTimeline,
            ManifestError::ConflictingKeyIds(_) => ErrorCode::ConflictingKeyIds,
            ManifestError::NoCommonKeySystem => ErrorCode::NoCommonKeySystem,
            ManifestError::PsshBadEncoding(_) => ErrorCode::PsshBadEncoding,
            ManifestError::MalformedPssh(_) => ErrorCode::MalformedPssh,
            ManifestError::UnresolvedTemplateVariable(..) => ErrorCode::UnresolvedTemplateVariable,
            ManifestError::InvalidXml(_)
            | ManifestError::XmlError(_)
            | ManifestError::XmlAttrError(_) => ErrorCode::InvalidXml,
            ManifestError::MissingAttribute { .. } => ErrorCode::MissingAttribute,
            ManifestError::InvalidAttribute { .. } => ErrorCode::InvalidAttribute,
            ManifestError::NoPeriod => ErrorCode::NoPeriod,
            ManifestError::PlaylistHeaderMissing => ErrorCode::PlaylistHeaderMissing,
            ManifestError::InvalidPlaylistHierarchy(_) => ErrorCode::InvalidPlaylistHierarchy,
            ManifestError::InvalidTag(_) => ErrorCode::InvalidTag,
            ManifestError::IndexFetchAborted => ErrorCode::OperationAborted,
            ManifestError::IndexFetchFailed(_) => ErrorCode::IndexFetchFailed,
            ManifestError::InvalidConfig(_) | ManifestError::JsonError(_) => {
                ErrorCode::InvalidConfig
            }
            ManifestError::UrlParseError(_) => ErrorCode::InvalidUrl,
            ManifestError::IOError(_) => ErrorCode::Io,
        }
    }

    /// Aborted and failed index fetches leave existing indexes untouched, so the
    /// caller can simply try again later. Everything else invalidates the manifest.
    pub fn severity(&self) -> Severity {
        match self {
            ManifestError::IndexFetchAborted | ManifestError::IndexFetchFailed(_) => {
                Severity::Recoverable
            }
            _ => Severity::Critical,
        }
    }

    pub(crate) fn missing_attribute(element: &str, attribute: &str) -> Self {
        ManifestError::MissingAttribute {
            element: element.to_string(),
            attribute: attribute.to_string(),
        }
    }

    pub(crate) fn invalid_attribute(attribute: &str, value: &str) -> Self {
        ManifestError::InvalidAttribute {
            attribute: attribute.to_string(),
            value: value.to_string(),
        }
    }
}

pub type ManifestResult<T> = Result<T, ManifestError>;
