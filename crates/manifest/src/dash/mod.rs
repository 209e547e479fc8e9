//! # MPEG-DASH
//!
//! [`parser::DashParser`] turns an MPD into one segment index per representation.
//!
//! ## Addressing
//!
//! `SegmentBase`, `SegmentList` and `SegmentTemplate` may be declared on the period, the
//! adaptation set and the representation. Attributes are inherited one by one, the closest
//! declaration winning. When more than one kind survives, `SegmentBase` wins over
//! `SegmentList`, which wins over `SegmentTemplate`.
//!
//! *   `SegmentBase` and `SegmentTemplate@index` keep their index in the media. The stream is
//!     returned as [`parser::StreamSegments::Deferred`] and an
//!     [`segment_base::IndexFetcher`] loads it later.
//! *   `SegmentList` and `SegmentTemplate` with a `SegmentTimeline` are listed in full.
//! *   `SegmentTemplate@duration` is generated from the availability window. For live
//!     presentations the index registers a producer that keeps extending it.
//!
//! ## Live
//!
//! Reloading a dynamic MPD with the same [`parser::DashParser`] merges the new references
//! into the indexes created by the first parse, keyed by period and representation id.

pub mod context;
pub mod mpd;
pub mod parser;
pub mod segment_base;
pub mod segment_list;
pub mod segment_template;
pub mod template;
pub mod timeline;
pub mod xml;

pub use parser::{DashParser, Manifest, ManifestPeriod, Stream, StreamSegments};
pub use segment_base::{IndexFetcher, IndexRequest};
