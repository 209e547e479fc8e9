use std::sync::Arc;

use super::{
    context::{Context, Quirk},
    mpd::SegmentList,
    segment_base::create_init_segment,
    timeline::{create_timeline, TimeRange},
};
use crate::{
    error::{ManifestError, ManifestResult},
    segment::{InitSegmentReference, SegmentReference, UriResolver},
    uri::resolve_uris,
};

struct SegmentListInfo {
    /// Seconds.
    segment_duration: Option<f64>,
    /// Relative to the period start, in seconds.
    start_time: f64,
    scaled_presentation_time_offset: f64,
    timeline: Option<Vec<TimeRange>>,
}

fn parse_info(context: &Context, list: &SegmentList) -> SegmentListInfo {
    let timescale = context.timescale();
    let pto = context.presentation_time_offset();

    let mut start_number = context.start_number();
    if start_number == 0 {
        tracing::warn!("SegmentList@startNumber must be > 0");
        start_number = 1;
    }

    let segment_duration = list
        .duration
        .filter(|d| *d > 0)
        .map(|d| d as f64 / timescale as f64);
    let timeline = list.timeline.as_ref().map(|timeline| {
        create_timeline(
            timeline,
            timescale,
            pto,
            context.period.duration.unwrap_or(f64::INFINITY),
        )
    });

    // ISO/IEC 23009-1 5.3.9.5.3: @presentationTimeOffset does not apply to @duration,
    // while the timeline has already accounted for it.
    let start_time = match (segment_duration, &timeline) {
        (Some(duration), _) => duration * (start_number - 1) as f64,
        (None, Some(timeline)) => timeline.first().map(|range| range.start).unwrap_or(0.0),
        (None, None) => 0.0,
    };

    SegmentListInfo {
        segment_duration,
        start_time,
        scaled_presentation_time_offset: pto as f64 / timescale as f64,
        timeline,
    }
}

fn check_info(context: &Context, list: &SegmentList, info: &SegmentListInfo) -> ManifestResult<()> {
    let segments = list.segment_urls.len();
    let insufficient = if info.segment_duration.is_none() && info.timeline.is_none() && segments > 1 {
        Some("the SegmentList specifies multiple segments, but does not specify a segment duration or timeline")
    } else if info.segment_duration.is_none()
        && context.period.duration.is_none()
        && info.timeline.is_none()
        && segments == 1
    {
        Some("the SegmentList specifies one segment, but does not specify a segment duration, period duration, or timeline")
    } else if info.timeline.as_ref().is_some_and(Vec::is_empty) {
        Some("the SegmentList has an empty timeline")
    } else {
        None
    };

    match insufficient {
        Some(reason) => {
            tracing::warn!(
                representation = ?context.representation_id,
                "SegmentList does not contain sufficient segment information: {reason}"
            );
            Err(ManifestError::NoSegmentInfo(context.representation_id.clone()))
        }
        None => Ok(()),
    }
}

/// Init segment declared by the list's `Initialization` element.
pub fn create_list_init_segment(
    context: &Context,
    list: &SegmentList,
) -> ManifestResult<Option<Arc<InitSegmentReference>>> {
    create_init_segment(context, list.initialization.as_ref())
}

/// Turns an explicit `SegmentURL` list into references.
///
/// When a timeline is present and its length differs from the number of URLs, the longer
/// one is truncated. Per-segment `@mediaRange` is not supported and ignored.
pub fn create_references(
    context: &Context,
    list: &SegmentList,
    init_segment: Option<Arc<InitSegmentReference>>,
) -> ManifestResult<Vec<SegmentReference>> {
    let info = parse_info(context, list);
    check_info(context, list, &info)?;

    let mut max = list.segment_urls.len();
    if let Some(timeline) = &info.timeline {
        if timeline.len() != max {
            let truncated = timeline.len().min(max);
            if context.warnings.first(Quirk::ListTimelineMismatch) {
                tracing::warn!(
                    urls = max,
                    timeline = timeline.len(),
                    "The number of items in the segment timeline and the number of segment urls do not match, truncating to {truncated}"
                );
            }
            max = truncated;
        }
    }
    if list.segment_urls.iter().any(|url| url.media_range.is_some()) {
        context.warn_once(
            Quirk::MediaRange,
            "SegmentURL@mediaRange is not supported, requesting whole resources",
        );
    }

    let period_start = context.period.start;
    let period_duration = context.period.duration;
    let timestamp_offset = period_start - info.scaled_presentation_time_offset;
    let append_window_end = context.period.end();

    let mut references = Vec::with_capacity(max);
    let mut previous_end = info.start_time;
    for (i, segment_url) in list.segment_urls.iter().take(max).enumerate() {
        let start_time = previous_end;
        let end_time = match (info.segment_duration, &info.timeline, period_duration) {
            (Some(duration), _, _) => start_time + duration,
            // timeline starts are ignored since the entries are contiguous
            (None, Some(timeline), _) => timeline[i].end,
            (None, None, Some(period_duration)) => start_time + period_duration,
            (None, None, None) => unreachable!("rejected by check_info"),
        };

        let base_uris = context.base_uris.clone();
        let relative: Vec<String> = segment_url.media.iter().cloned().collect();
        let uris: UriResolver = Arc::new(move || resolve_uris(&base_uris, &relative));

        references.push(
            SegmentReference::new(period_start + start_time, period_start + end_time, uris)
                .with_init_segment(init_segment.clone())
                .with_timestamp_offset(timestamp_offset)
                .with_append_window(period_start, append_window_end),
        );
        previous_end = end_time;
    }

    Ok(references)
}
