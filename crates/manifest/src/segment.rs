use std::{fmt, sync::Arc};

use url::Url;

/// Produces the candidate URIs of a segment on demand.
///
/// Template-addressed segments only materialize their URIs when a consumer asks for them.
pub type UriResolver = Arc<dyn Fn() -> Vec<Url> + Send + Sync>;

/// Wraps an already resolved URI list into a [UriResolver].
pub fn fixed_uris(uris: Vec<Url>) -> UriResolver {
    Arc::new(move || uris.clone())
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QualityInfo {
    pub bandwidth: Option<u64>,
    pub mime_type: Option<String>,
    pub codecs: Option<String>,
}

/// Location of the initialization data shared by a run of media segments.
#[derive(Clone)]
pub struct InitSegmentReference {
    uris: UriResolver,
    pub start_byte: u64,
    /// Inclusive. `None` reads to the end of the resource.
    pub end_byte: Option<u64>,
    pub quality: QualityInfo,
}

impl InitSegmentReference {
    pub fn new(uris: UriResolver, start_byte: u64, end_byte: Option<u64>) -> Self {
        Self {
            uris,
            start_byte,
            end_byte,
            quality: QualityInfo::default(),
        }
    }

    pub fn with_quality(mut self, quality: QualityInfo) -> Self {
        self.quality = quality;
        self
    }

    pub fn uris(&self) -> Vec<Url> {
        (self.uris)()
    }
}

impl fmt::Debug for InitSegmentReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InitSegmentReference")
            .field("uris", &self.uris())
            .field("start_byte", &self.start_byte)
            .field("end_byte", &self.end_byte)
            .field("quality", &self.quality)
            .finish()
    }
}

/// One addressable media segment on the presentation timeline.
///
/// Times are in seconds of presentation time. `start_time < end_time` always holds for
/// references produced by this crate.
#[derive(Clone)]
pub struct SegmentReference {
    pub start_time: f64,
    pub end_time: f64,
    uris: UriResolver,
    pub start_byte: u64,
    /// Inclusive. `None` reads to the end of the resource.
    pub end_byte: Option<u64>,
    pub init_segment: Option<Arc<InitSegmentReference>>,
    /// Added to media timestamps to place them on the presentation timeline.
    pub timestamp_offset: f64,
    pub append_window_start: f64,
    pub append_window_end: f64,
    /// End before clipping to the period boundary, when it differs from `end_time`.
    true_end_time: Option<f64>,
}

impl SegmentReference {
    pub fn new(start_time: f64, end_time: f64, uris: UriResolver) -> Self {
        debug_assert!(start_time < end_time, "{start_time} >= {end_time}");
        Self {
            start_time,
            end_time,
            uris,
            start_byte: 0,
            end_byte: None,
            init_segment: None,
            timestamp_offset: 0.0,
            append_window_start: 0.0,
            append_window_end: f64::INFINITY,
            true_end_time: None,
        }
    }

    pub fn with_byte_range(mut self, start_byte: u64, end_byte: Option<u64>) -> Self {
        self.start_byte = start_byte;
        self.end_byte = end_byte;
        self
    }

    pub fn with_init_segment(mut self, init_segment: Option<Arc<InitSegmentReference>>) -> Self {
        self.init_segment = init_segment;
        self
    }

    pub fn with_timestamp_offset(mut self, timestamp_offset: f64) -> Self {
        self.timestamp_offset = timestamp_offset;
        self
    }

    pub fn with_append_window(mut self, start: f64, end: f64) -> Self {
        self.append_window_start = start;
        self.append_window_end = end;
        self
    }

    pub fn with_true_end_time(mut self, true_end_time: f64) -> Self {
        if true_end_time != self.end_time {
            self.true_end_time = Some(true_end_time);
        }
        self
    }

    pub fn uris(&self) -> Vec<Url> {
        (self.uris)()
    }

    pub fn duration(&self) -> f64 {
        self.end_time - self.start_time
    }

    pub fn true_end_time(&self) -> f64 {
        self.true_end_time.unwrap_or(self.end_time)
    }

    /// Moves the end of the reference, remembering where it originally ended.
    pub(crate) fn clip_end(&mut self, end_time: f64) {
        if end_time != self.end_time {
            self.true_end_time.get_or_insert(self.end_time);
            self.end_time = end_time;
        }
    }
}

impl fmt::Debug for SegmentReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SegmentReference")
            .field("start_time", &self.start_time)
            .field("end_time", &self.end_time)
            .field("uris", &self.uris())
            .field("start_byte", &self.start_byte)
            .field("end_byte", &self.end_byte)
            .field("timestamp_offset", &self.timestamp_offset)
            .field("append_window_start", &self.append_window_start)
            .field("append_window_end", &self.append_window_end)
            .finish_non_exhaustive()
    }
}
