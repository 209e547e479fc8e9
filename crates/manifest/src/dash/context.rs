use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use url::Url;

use super::mpd::{
    AdaptationSet, Mpd, Period, Representation, SegmentAddressing, SegmentBase, SegmentList,
    SegmentTemplate,
};
use crate::{segment::QualityInfo, uri::resolve_uris};

/// Gaps or overlaps between periods smaller than this are not worth a warning.
const GAP_OVERLAP_TOLERANCE_SECONDS: f64 = 1.0 / 15.0;

/// Timing of a period on the presentation timeline, in seconds.
#[derive(Debug, Clone, PartialEq)]
pub struct PeriodInfo {
    pub id: Option<String>,
    pub start: f64,
    pub duration: Option<f64>,
    pub is_last_period: bool,
}

impl PeriodInfo {
    /// Infinite while the period is still open.
    pub fn end(&self) -> f64 {
        self.duration
            .map(|duration| self.start + duration)
            .unwrap_or(f64::INFINITY)
    }
}

/// Derives where every period starts and how long it lasts.
///
/// A period without `@start` begins where the previous one ended. Its duration is the distance
/// to the next period's `@start`, or what remains of `MPD@mediaPresentationDuration` for the
/// last period, or its own `@duration`.
pub fn period_infos(mpd: &Mpd) -> Vec<PeriodInfo> {
    let mut infos = Vec::with_capacity(mpd.periods.len());
    let mut previous_end = None;

    for (i, period) in mpd.periods.iter().enumerate() {
        let start = match (period.start, previous_end) {
            (Some(start), _) => start,
            (None, Some(previous_end)) => previous_end,
            (None, None) if i == 0 => 0.0,
            (None, None) => {
                tracing::warn!(
                    index = i,
                    "Previous period has no duration, ignoring remaining periods"
                );
                break;
            }
        };

        let is_last_period = i + 1 == mpd.periods.len();
        let derived = match mpd.periods.get(i + 1) {
            Some(next) => next.start.map(|next_start| next_start - start),
            None => mpd
                .media_presentation_duration
                .map(|total| total - start),
        };
        if let (Some(derived), Some(given)) = (derived, period.duration) {
            if (derived - given).abs() > GAP_OVERLAP_TOLERANCE_SECONDS {
                tracing::warn!(
                    period = ?period.id,
                    derived,
                    given,
                    "There is a gap/overlap between periods"
                );
            }
        }
        let duration = derived.or(period.duration).filter(|d| *d > 0.0);

        previous_end = duration.map(|duration| start + duration);
        infos.push(PeriodInfo {
            id: period.id.clone(),
            start,
            duration,
            is_last_period,
        });
    }

    infos
}

/// Recoverable manifest issues reported once per parser rather than once per representation
/// and reload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quirk {
    MediaRange,
    ListTimelineMismatch,
    MultipleTemplateSources,
}

#[derive(Debug, Default)]
pub struct Warnings {
    media_range: AtomicBool,
    list_timeline_mismatch: AtomicBool,
    multiple_template_sources: AtomicBool,
}

impl Warnings {
    /// True the first time `quirk` is seen.
    pub fn first(&self, quirk: Quirk) -> bool {
        let flag = match quirk {
            Quirk::MediaRange => &self.media_range,
            Quirk::ListTimelineMismatch => &self.list_timeline_mismatch,
            Quirk::MultipleTemplateSources => &self.multiple_template_sources,
        };
        !flag.swap(true, Ordering::Relaxed)
    }
}

trait Inherit {
    /// Fills every unset field from `parent`.
    fn inherit(&mut self, parent: &Self);
}

impl Inherit for SegmentBase {
    fn inherit(&mut self, parent: &Self) {
        self.timescale = self.timescale.or(parent.timescale);
        self.presentation_time_offset = self
            .presentation_time_offset
            .or(parent.presentation_time_offset);
        self.index_range = self.index_range.take().or_else(|| parent.index_range.clone());
        self.initialization = self
            .initialization
            .take()
            .or_else(|| parent.initialization.clone());
        self.representation_index = self
            .representation_index
            .take()
            .or_else(|| parent.representation_index.clone());
    }
}

impl Inherit for SegmentList {
    fn inherit(&mut self, parent: &Self) {
        self.timescale = self.timescale.or(parent.timescale);
        self.presentation_time_offset = self
            .presentation_time_offset
            .or(parent.presentation_time_offset);
        self.duration = self.duration.or(parent.duration);
        self.start_number = self.start_number.or(parent.start_number);
        self.initialization = self
            .initialization
            .take()
            .or_else(|| parent.initialization.clone());
        self.timeline = self.timeline.take().or_else(|| parent.timeline.clone());
        if self.segment_urls.is_empty() {
            self.segment_urls = parent.segment_urls.clone();
        }
    }
}

impl Inherit for SegmentTemplate {
    fn inherit(&mut self, parent: &Self) {
        self.timescale = self.timescale.or(parent.timescale);
        self.presentation_time_offset = self
            .presentation_time_offset
            .or(parent.presentation_time_offset);
        self.duration = self.duration.or(parent.duration);
        self.start_number = self.start_number.or(parent.start_number);
        self.media = self.media.take().or_else(|| parent.media.clone());
        self.index = self.index.take().or_else(|| parent.index.clone());
        self.initialization = self
            .initialization
            .take()
            .or_else(|| parent.initialization.clone());
        self.timeline = self.timeline.take().or_else(|| parent.timeline.clone());
    }
}

/// Most specific level first.
fn inherit_chain<T: Inherit + Clone>(levels: [Option<&T>; 3]) -> Option<T> {
    let mut levels = levels.into_iter().flatten();
    let mut resolved = levels.next()?.clone();
    for parent in levels {
        resolved.inherit(parent);
    }
    Some(resolved)
}

impl SegmentAddressing {
    /// Resolves representation, adaptation set and period addressing, attribute by attribute.
    pub fn merge(
        representation: &SegmentAddressing,
        adaptation_set: &SegmentAddressing,
        period: &SegmentAddressing,
    ) -> SegmentAddressing {
        SegmentAddressing {
            segment_base: inherit_chain([
                representation.segment_base.as_ref(),
                adaptation_set.segment_base.as_ref(),
                period.segment_base.as_ref(),
            ]),
            segment_list: inherit_chain([
                representation.segment_list.as_ref(),
                adaptation_set.segment_list.as_ref(),
                period.segment_list.as_ref(),
            ]),
            segment_template: inherit_chain([
                representation.segment_template.as_ref(),
                adaptation_set.segment_template.as_ref(),
                period.segment_template.as_ref(),
            ]),
        }
    }
}

/// The addressing scheme a representation ends up using.
#[derive(Debug, Clone, Copy)]
pub enum Addressing<'a> {
    Base(&'a SegmentBase),
    List(&'a SegmentList),
    Template(&'a SegmentTemplate),
    None,
}

/// Everything a segment generator needs to know about one representation.
///
/// A context is resolved once per representation per manifest parse and never mutated, so
/// generators can capture the parts they need in deferred closures.
#[derive(Debug, Clone)]
pub struct Context {
    pub dynamic: bool,
    pub period: PeriodInfo,
    pub adaptation_set_id: Option<String>,
    pub representation_id: Option<String>,
    pub bandwidth: Option<u64>,
    pub content_type: Option<String>,
    pub mime_type: Option<String>,
    pub codecs: Option<String>,
    pub base_uris: Vec<Url>,
    pub addressing: SegmentAddressing,
    /// Shared by every context of one parser.
    pub warnings: Arc<Warnings>,
}

impl Context {
    pub fn resolve(
        manifest_base_uris: &[Url],
        dynamic: bool,
        period_info: &PeriodInfo,
        period: &Period,
        adaptation_set: &AdaptationSet,
        representation: &Representation,
    ) -> Self {
        let base_uris = [
            &period.base_urls,
            &adaptation_set.base_urls,
            &representation.base_urls,
        ]
        .into_iter()
        .fold(manifest_base_uris.to_vec(), |bases, level| {
            resolve_uris(&bases, level)
        });

        let mime_type = representation
            .mime_type
            .clone()
            .or_else(|| adaptation_set.mime_type.clone());
        let content_type = adaptation_set.content_type.clone().or_else(|| {
            mime_type
                .as_deref()
                .and_then(|mime| mime.split_once('/'))
                .map(|(kind, _)| kind.to_string())
        });

        Self {
            dynamic,
            period: period_info.clone(),
            adaptation_set_id: adaptation_set.id.clone(),
            representation_id: representation.id.clone(),
            bandwidth: representation.bandwidth,
            content_type,
            mime_type,
            codecs: representation
                .codecs
                .clone()
                .or_else(|| adaptation_set.codecs.clone()),
            base_uris,
            addressing: SegmentAddressing::merge(
                &representation.addressing,
                &adaptation_set.addressing,
                &period.addressing,
            ),
            warnings: Arc::default(),
        }
    }

    pub fn with_warnings(mut self, warnings: Arc<Warnings>) -> Self {
        self.warnings = warnings;
        self
    }

    /// Logs a recoverable issue unless this parser already reported it.
    pub fn warn_once(&self, quirk: Quirk, message: &str) {
        if self.warnings.first(quirk) {
            tracing::warn!(representation = ?self.representation_id, "{message}");
        }
    }

    /// `SegmentBase` wins over `SegmentList`, which wins over `SegmentTemplate`.
    pub fn active_addressing(&self) -> Addressing<'_> {
        if let Some(base) = &self.addressing.segment_base {
            Addressing::Base(base)
        } else if let Some(list) = &self.addressing.segment_list {
            Addressing::List(list)
        } else if let Some(template) = &self.addressing.segment_template {
            Addressing::Template(template)
        } else {
            Addressing::None
        }
    }

    pub fn timescale(&self) -> u64 {
        let timescale = match self.active_addressing() {
            Addressing::Base(base) => base.timescale,
            Addressing::List(list) => list.timescale,
            Addressing::Template(template) => template.timescale,
            Addressing::None => None,
        };
        timescale.filter(|t| *t > 0).unwrap_or(1)
    }

    pub fn start_number(&self) -> u64 {
        match self.active_addressing() {
            Addressing::List(list) => list.start_number,
            Addressing::Template(template) => template.start_number,
            _ => None,
        }
        .unwrap_or(1)
    }

    /// Unscaled `@presentationTimeOffset`.
    pub fn presentation_time_offset(&self) -> u64 {
        match self.active_addressing() {
            Addressing::Base(base) => base.presentation_time_offset,
            Addressing::List(list) => list.presentation_time_offset,
            Addressing::Template(template) => template.presentation_time_offset,
            Addressing::None => None,
        }
        .unwrap_or(0)
    }

    pub fn scaled_presentation_time_offset(&self) -> f64 {
        self.presentation_time_offset() as f64 / self.timescale() as f64
    }

    pub fn quality(&self) -> QualityInfo {
        QualityInfo {
            bandwidth: self.bandwidth,
            mime_type: self.mime_type.clone(),
            codecs: self.codecs.clone(),
        }
    }

    /// `period,representation`, when both carry an id.
    pub fn stream_key(&self) -> Option<String> {
        Some(format!(
            "{},{}",
            self.period.id.as_deref()?,
            self.representation_id.as_deref()?
        ))
    }
}
