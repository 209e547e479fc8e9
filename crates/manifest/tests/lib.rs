mod dash;
mod drm;
mod hls;
mod index;

use iori_manifest::{segment::fixed_uris, SegmentReference};
use tracing_subscriber::EnvFilter;

pub fn setup_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn reference(start: f64, end: f64) -> SegmentReference {
    SegmentReference::new(start, end, fixed_uris(vec![]))
}

/// No reference starts before the previous one, nor before it ended.
pub fn assert_ordered(references: &[SegmentReference]) {
    for pair in references.windows(2) {
        assert!(
            pair[0].start_time <= pair[1].start_time,
            "{} starts after {}",
            pair[0].start_time,
            pair[1].start_time
        );
        assert!(
            pair[0].end_time <= pair[1].start_time + 1e-3,
            "{}..{} overlaps {}..{}",
            pair[0].start_time,
            pair[0].end_time,
            pair[1].start_time,
            pair[1].end_time
        );
    }
}
