pub mod clock;

use chrono::{DateTime, Utc};

pub use clock::Clock;

use crate::segment::SegmentReference;

/// Global timing of a presentation.
///
/// For live presentations the timeline tracks which part of the media is currently
/// available for download, which is what every segment generator consults when deciding
/// which references to produce and which to evict.
#[derive(Debug, Clone)]
pub struct PresentationTimeline {
    /// `MPD@availabilityStartTime`. `None` for on-demand content.
    presentation_start_time: Option<DateTime<Utc>>,
    presentation_delay: f64,

    is_static: bool,
    /// Infinite while the total duration is unknown.
    duration: f64,
    /// `MPD@timeShiftBufferDepth`. Infinite keeps everything since the start.
    segment_availability_duration: f64,
    availability_time_offset: f64,

    max_segment_duration: f64,
    min_segment_start_time: Option<f64>,
    max_segment_end_time: Option<f64>,

    clock: Clock,
}

impl PresentationTimeline {
    pub fn new(presentation_start_time: Option<DateTime<Utc>>, presentation_delay: f64) -> Self {
        Self {
            presentation_start_time,
            presentation_delay,
            is_static: true,
            duration: f64::INFINITY,
            segment_availability_duration: f64::INFINITY,
            availability_time_offset: 0.0,
            max_segment_duration: 1.0,
            min_segment_start_time: None,
            max_segment_end_time: None,
            clock: Clock::new(),
        }
    }

    pub fn presentation_start_time(&self) -> Option<DateTime<Utc>> {
        self.presentation_start_time
    }

    pub fn set_presentation_start_time(&mut self, start: Option<DateTime<Utc>>) {
        self.presentation_start_time = start;
    }

    pub fn presentation_delay(&self) -> f64 {
        self.presentation_delay
    }

    pub fn set_presentation_delay(&mut self, delay: f64) {
        self.presentation_delay = delay;
    }

    pub fn is_static(&self) -> bool {
        self.is_static
    }

    pub fn set_static(&mut self, is_static: bool) {
        self.is_static = is_static;
    }

    pub fn duration(&self) -> f64 {
        self.duration
    }

    pub fn set_duration(&mut self, duration: f64) {
        if duration <= 0.0 {
            tracing::warn!(duration, "Ignoring non-positive presentation duration");
            return;
        }
        self.duration = duration;
    }

    pub fn segment_availability_duration(&self) -> f64 {
        self.segment_availability_duration
    }

    pub fn set_segment_availability_duration(&mut self, duration: f64) {
        self.segment_availability_duration = duration;
    }

    pub fn set_availability_time_offset(&mut self, offset: f64) {
        self.availability_time_offset = offset;
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    pub fn clock_mut(&mut self) -> &mut Clock {
        &mut self.clock
    }

    pub fn set_clock(&mut self, clock: Clock) {
        self.clock = clock;
    }

    pub fn max_segment_duration(&self) -> f64 {
        self.max_segment_duration
    }

    pub fn min_segment_start_time(&self) -> Option<f64> {
        self.min_segment_start_time
    }

    pub fn max_segment_end_time(&self) -> Option<f64> {
        self.max_segment_end_time
    }

    pub fn notify_max_segment_duration(&mut self, duration: f64) {
        self.max_segment_duration = self.max_segment_duration.max(duration);
    }

    pub fn notify_min_segment_start_time(&mut self, start_time: f64) {
        self.min_segment_start_time = Some(match self.min_segment_start_time {
            Some(current) => current.min(start_time),
            None => start_time,
        });
    }

    /// Widens the known segment bounds with a batch of freshly generated references.
    pub fn notify_segments(&mut self, references: &[SegmentReference]) {
        let (Some(first), Some(last)) = (references.first(), references.last()) else {
            return;
        };

        self.notify_min_segment_start_time(first.start_time);
        self.max_segment_duration = references
            .iter()
            .map(SegmentReference::duration)
            .fold(self.max_segment_duration, f64::max);
        self.max_segment_end_time = Some(match self.max_segment_end_time {
            Some(current) => current.max(last.end_time),
            None => last.end_time,
        });
    }

    /// Live: unknown duration and still being published.
    pub fn is_live(&self) -> bool {
        self.duration.is_infinite() && !self.is_static
    }

    /// Still being published, but with a known final duration.
    pub fn is_in_progress(&self) -> bool {
        self.duration.is_finite() && !self.is_static
    }

    /// Seconds since the presentation start, on the (offset-corrected) wall clock.
    fn elapsed(&self) -> f64 {
        match self.presentation_start_time {
            Some(start) => (self.clock.now() - start).num_milliseconds() as f64 / 1000.0,
            None => 0.0,
        }
    }

    /// Latest presentation time a complete segment can exist for.
    fn live_edge(&self) -> f64 {
        (self.elapsed() - self.max_segment_duration).max(0.0)
    }

    pub fn segment_availability_start(&self) -> f64 {
        if self.segment_availability_duration.is_infinite() {
            return 0.0;
        }
        let start = self.segment_availability_end() - self.segment_availability_duration;
        start.max(0.0)
    }

    pub fn segment_availability_end(&self) -> f64 {
        if !self.is_live() && !self.is_in_progress() {
            return self.duration;
        }
        (self.live_edge() + self.availability_time_offset).min(self.duration)
    }

    pub fn availability_window(&self) -> (f64, f64) {
        (
            self.segment_availability_start(),
            self.segment_availability_end(),
        )
    }

    /// The latest point a player should start from, keeping the presentation delay.
    pub fn seek_range_end(&self) -> f64 {
        let end = if self.is_live() || self.is_in_progress() {
            (self.segment_availability_end() - self.presentation_delay).max(0.0)
        } else {
            self.duration
        };
        end.max(self.segment_availability_start())
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;

    use super::*;
    use crate::{segment::fixed_uris, timeline::clock::parse_xs_datetime};

    fn live_timeline(elapsed: i64) -> PresentationTimeline {
        let start = parse_xs_datetime("2024-01-01T00:00:00Z").unwrap();
        let mut timeline = PresentationTimeline::new(Some(start), 0.0);
        timeline.set_static(false);
        timeline.set_clock(Clock::manual(start + TimeDelta::seconds(elapsed)));
        timeline
    }

    #[test]
    fn test_static_window() {
        let mut timeline = PresentationTimeline::new(None, 0.0);
        timeline.set_duration(60.0);
        assert!(!timeline.is_live());
        assert_eq!(timeline.availability_window(), (0.0, 60.0));
    }

    #[test]
    fn test_live_window() {
        let mut timeline = live_timeline(100);
        timeline.notify_max_segment_duration(4.0);
        timeline.set_segment_availability_duration(30.0);

        assert!(timeline.is_live());
        assert_eq!(timeline.segment_availability_end(), 96.0);
        assert_eq!(timeline.segment_availability_start(), 66.0);

        timeline.clock_mut().advance(TimeDelta::seconds(10));
        assert_eq!(timeline.availability_window(), (76.0, 106.0));
    }

    #[test]
    fn test_in_progress_capped_by_duration() {
        let mut timeline = live_timeline(1000);
        timeline.set_duration(120.0);
        assert!(timeline.is_in_progress());
        assert_eq!(timeline.segment_availability_end(), 120.0);
    }

    #[test]
    fn test_notify_segments() {
        let mut timeline = PresentationTimeline::new(None, 0.0);
        let references = vec![
            SegmentReference::new(10.0, 12.0, fixed_uris(vec![])),
            SegmentReference::new(12.0, 18.0, fixed_uris(vec![])),
        ];
        timeline.notify_segments(&references);
        timeline.notify_segments(&[]);

        assert_eq!(timeline.min_segment_start_time(), Some(10.0));
        assert_eq!(timeline.max_segment_end_time(), Some(18.0));
        assert_eq!(timeline.max_segment_duration(), 6.0);
    }
}
