//! Turns DASH and HLS manifests into segment indexes, and keeps live ones current.
//!
//! ```text
//! ┌────────────┐      ┌─────────────┐      ┌──────────────────────┐
//! │  MPD text  ├──────►  dash::mpd  ├──────►    dash::context     │
//! └────────────┘      └─────────────┘      │ (inherited addressing│
//!                                          │  base uris, period)  │
//!                                          └──────────┬───────────┘
//!                     ┌─────────────────┐             │
//!                     │ drm::content_   ◄─────────────┤
//!                     │   protection    │             │
//!                     └─────────────────┘  ┌──────────▼───────────┐
//!                                          │ segment_base / list /│
//!                                          │   segment_template   │
//!                                          └──────────┬───────────┘
//! ┌────────────┐      ┌─────────────┐                 │ SegmentReference
//! │ M3U8 text  ├──────► hls::parser ├─────────┐       │
//! └────────────┘      └─────────────┘  ┌──────▼───────▼───────┐      ┌──────────────────────┐
//!                                      │     SegmentIndex     ◄──────┤ PresentationTimeline │
//!                                      │ merge / evict / fit  │ tick │ (availability window)│
//!                                      └──────────────────────┘      └──────────────────────┘
//! ```

pub mod config;
pub mod dash;
pub mod drm;
pub mod error;
pub mod hls;
pub mod index;
pub mod segment;
pub mod timeline;
pub mod uri;

pub use config::ManifestConfig;
pub use error::{ErrorCode, ManifestError, ManifestResult, Severity};
pub use index::{
    spawn_live_updates, SegmentIndex, SharedSegmentIndex, SharedTimeline, UpdateBatch,
};
pub use segment::{InitSegmentReference, QualityInfo, SegmentReference, UriResolver};
pub use timeline::{Clock, PresentationTimeline};
