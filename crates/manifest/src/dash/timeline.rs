use super::mpd::TimelineSegment;

/// Gaps or overlaps between `S` elements smaller than this are silently closed.
const GAP_OVERLAP_TOLERANCE_SECONDS: f64 = 1.0 / 15.0;

/// One expanded `SegmentTimeline` entry, relative to the period start.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeRange {
    /// Seconds, with `@presentationTimeOffset` removed.
    pub start: f64,
    pub end: f64,
    /// Media time in timescale units, as substituted for `$Time$`.
    pub unscaled_start: u64,
}

/// Expands `S@r` repeats into a flat list of time ranges.
///
/// From ISO/IEC 23009-1 5.3.9.6:
/// > A negative value of the @r attribute of the S element indicates that the duration
/// > indicated in @d attribute repeats until the start of the next S element, the end of the
/// > Period or until the next MPD update.
///
/// Consecutive entries are made contiguous: a gap or overlap moves the end of the previous
/// entry to the start of the next one.
pub fn create_timeline(
    segments: &[TimelineSegment],
    timescale: u64,
    presentation_time_offset: u64,
    period_duration: f64,
) -> Vec<TimeRange> {
    let timescale = timescale.max(1);
    let scale = timescale as f64;
    let pto = presentation_time_offset as i64;

    let mut timeline: Vec<TimeRange> = Vec::new();
    let mut last_end_time = -pto;

    for (i, segment) in segments.iter().enumerate() {
        let duration = segment.duration as i64;
        if duration == 0 {
            continue;
        }
        let mut start_time = segment
            .time
            .map(|t| t as i64 - pto)
            .unwrap_or(last_end_time);

        let mut repeat = segment.repeat_count;
        if repeat < 0 {
            match segments.get(i + 1) {
                Some(next) => {
                    let Some(next_start) = next.time.map(|t| t as i64 - pto) else {
                        tracing::warn!("An \"S\" element cannot have a negative repeat if the next \"S\" element does not have a valid start time: ignoring the remaining \"S\" elements");
                        return timeline;
                    };
                    if start_time >= next_start {
                        tracing::warn!("An \"S\" element cannot have a negative repeat if its start time exceeds the next \"S\" element's start time: ignoring the remaining \"S\" elements");
                        return timeline;
                    }
                    repeat = (next_start - start_time + duration - 1) / duration - 1;
                }
                None => {
                    if period_duration.is_infinite() {
                        tracing::warn!("The last \"S\" element cannot have a negative repeat if the period has an infinite duration: ignoring the last \"S\" element");
                        return timeline;
                    }
                    if start_time as f64 / scale >= period_duration {
                        tracing::warn!("The last \"S\" element cannot have a negative repeat if its start time exceeds the period's duration: ignoring the last \"S\" element");
                        return timeline;
                    }
                    repeat = ((period_duration * scale - start_time as f64) / duration as f64)
                        .ceil() as i64
                        - 1;
                }
            }
        }

        if !timeline.is_empty() && start_time != last_end_time {
            let delta = (start_time - last_end_time) as f64 / scale;
            if delta.abs() >= GAP_OVERLAP_TOLERANCE_SECONDS {
                tracing::warn!(
                    delta,
                    "SegmentTimeline contains a large gap/overlap: the content may have errors in it"
                );
            }

            let snapped_end = start_time as f64 / scale;
            let before = timeline.len();
            // entries that would end before they start
            while timeline.last().is_some_and(|previous| previous.start >= snapped_end) {
                timeline.pop();
            }
            if timeline.len() < before {
                tracing::warn!(
                    dropped = before - timeline.len(),
                    "An \"S\" element starts before the previous ones: dropping the entries it overlaps"
                );
            }
            if let Some(previous) = timeline.last_mut() {
                previous.end = snapped_end;
            }
        }

        for _ in 0..=repeat {
            let end_time = start_time + duration;
            timeline.push(TimeRange {
                start: start_time as f64 / scale,
                end: end_time as f64 / scale,
                unscaled_start: (start_time + pto).max(0) as u64,
            });
            start_time = end_time;
            last_end_time = end_time;
        }
    }

    timeline
}
