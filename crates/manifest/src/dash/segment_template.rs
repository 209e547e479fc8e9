use std::{sync::Arc, time::Duration};

use url::Url;

use super::{
    context::{Context, Quirk},
    mpd::SegmentTemplate,
    segment_base::{index_request, IndexRequest},
    template::Template,
    timeline::{create_timeline, TimeRange},
};
use crate::{
    error::{ManifestError, ManifestResult},
    index::{SegmentIndex, UpdateBatch},
    segment::{fixed_uris, InitSegmentReference, SegmentReference, UriResolver},
    timeline::PresentationTimeline,
    uri::resolve_uris,
};

/// The single addressing source a `SegmentTemplate` ends up using.
#[derive(Debug, Clone, PartialEq)]
pub enum TemplateAddressing {
    /// `@index`: the index lives in the media and has to be fetched.
    Index(String),
    /// `SegmentTimeline`, expanded.
    Timeline(Vec<TimeRange>),
    /// `@duration`, in seconds.
    Duration(f64),
}

/// Picks exactly one of index template, timeline or fixed duration.
///
/// When several are declared the index template wins, then the timeline.
pub fn select_addressing(
    context: &Context,
    template: &SegmentTemplate,
) -> ManifestResult<TemplateAddressing> {
    let timescale = context.timescale();
    let index = template.index.clone();
    let timeline = template.timeline.as_ref();
    let duration = template
        .duration
        .filter(|d| *d > 0)
        .map(|d| d as f64 / timescale as f64);

    let sources = [index.is_some(), timeline.is_some(), duration.is_some()]
        .into_iter()
        .filter(|declared| *declared)
        .count();
    if sources == 0 {
        tracing::error!(
            representation = ?context.representation_id,
            "SegmentTemplate does not contain any segment information: the SegmentTemplate must contain either an index URL template, a SegmentTimeline, or a segment duration"
        );
        return Err(ManifestError::NoSegmentInfo(context.representation_id.clone()));
    }
    if sources > 1 {
        context.warn_once(
            Quirk::MultipleTemplateSources,
            "SegmentTemplate contains multiple segment information sources: the SegmentTemplate should only contain an index URL template, a SegmentTimeline or a segment duration",
        );
    }

    if index.is_none() && template.media.is_none() {
        tracing::error!(
            representation = ?context.representation_id,
            "SegmentTemplate does not contain sufficient segment information: the SegmentTemplate's media URL template is missing"
        );
        return Err(ManifestError::NoSegmentInfo(context.representation_id.clone()));
    }

    if let Some(index) = index {
        if sources > 1 {
            tracing::info!("Using the index URL template by default");
        }
        return Ok(TemplateAddressing::Index(index));
    }
    if let Some(timeline) = timeline {
        if sources > 1 {
            tracing::info!("Using the SegmentTimeline by default");
        }
        let ranges = create_timeline(
            timeline,
            timescale,
            context.presentation_time_offset(),
            context.period.duration.unwrap_or(f64::INFINITY),
        );
        if ranges.is_empty() {
            return Err(ManifestError::EmptySegmentTimeline);
        }
        return Ok(TemplateAddressing::Timeline(ranges));
    }
    match duration {
        Some(duration) => Ok(TemplateAddressing::Duration(duration)),
        None => Err(ManifestError::NoSegmentInfo(context.representation_id.clone())),
    }
}

fn representation_variables(context: &Context) -> Template {
    let mut variables = Template::new();
    variables.insert_optional(Template::REPRESENTATION_ID, context.representation_id.clone());
    if let Some(bandwidth) = context.bandwidth {
        variables.insert_number(Template::BANDWIDTH, bandwidth);
    }
    variables
}

/// Initialization URL from `@initialization`, which may only use the representation id and
/// bandwidth.
pub fn create_init_segment(
    context: &Context,
    template: &SegmentTemplate,
) -> ManifestResult<Option<Arc<InitSegmentReference>>> {
    let Some(initialization) = &template.initialization else {
        return Ok(None);
    };

    let uri = representation_variables(context).resolve(initialization)?;
    let uris = resolve_uris(&context.base_uris, &[uri]);
    Ok(Some(Arc::new(
        InitSegmentReference::new(fixed_uris(uris), 0, None).with_quality(context.quality()),
    )))
}

/// Describes the index addressed by `@index`.
pub fn index_request_from_template(
    context: &Context,
    index_template: &str,
    init_segment: Option<Arc<InitSegmentReference>>,
) -> ManifestResult<IndexRequest> {
    let uri = representation_variables(context).resolve(index_template)?;
    let uris = resolve_uris(&context.base_uris, &[uri]);
    Ok(index_request(context, uris, None, init_segment))
}

/// `@media` with the representation's own values already bound.
#[derive(Debug)]
struct MediaTemplate {
    media: String,
    variables: Template,
    base_uris: Vec<Url>,
}

impl MediaTemplate {
    /// Fails when `media` uses an identifier no segment can provide.
    fn new(context: &Context, media: &str) -> ManifestResult<Self> {
        let template = Self {
            media: media.to_string(),
            variables: representation_variables(context),
            base_uris: context.base_uris.clone(),
        };
        template.fill(0, 0)?;
        Ok(template)
    }

    fn fill(&self, number: u64, time: u64) -> ManifestResult<String> {
        let mut variables = self.variables.clone();
        variables
            .insert_number(Template::NUMBER, number)
            .insert_number(Template::TIME, time);
        variables.resolve(&self.media)
    }

    fn uris(&self, number: u64, time: u64) -> Vec<Url> {
        match self.fill(number, time) {
            Ok(uri) => resolve_uris(&self.base_uris, &[uri]),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to fill media template");
                Vec::new()
            }
        }
    }

    fn resolver(self: &Arc<Self>, number: u64, time: u64) -> UriResolver {
        let template = Arc::clone(self);
        Arc::new(move || template.uris(number, time))
    }
}

fn media_template(context: &Context, template: &SegmentTemplate) -> ManifestResult<Arc<MediaTemplate>> {
    let media = template
        .media
        .as_deref()
        .ok_or_else(|| ManifestError::NoSegmentInfo(context.representation_id.clone()))?;
    Ok(Arc::new(MediaTemplate::new(context, media)?))
}

/// One reference per expanded timeline entry. `$Number$` counts from `@startNumber`.
pub fn create_from_timeline(
    context: &Context,
    template: &SegmentTemplate,
    timeline: &[TimeRange],
    init_segment: Option<Arc<InitSegmentReference>>,
) -> ManifestResult<Vec<SegmentReference>> {
    let media = media_template(context, template)?;
    let period_start = context.period.start;
    let timestamp_offset = period_start - context.scaled_presentation_time_offset();
    let append_window_end = context.period.end();
    let start_number = context.start_number();

    Ok(timeline
        .iter()
        .enumerate()
        .map(|(i, range)| {
            SegmentReference::new(
                period_start + range.start,
                period_start + range.end,
                media.resolver(start_number + i as u64, range.unscaled_start),
            )
            .with_init_segment(init_segment.clone())
            .with_timestamp_offset(timestamp_offset)
            .with_append_window(period_start, append_window_end)
        })
        .collect())
}

/// Generates references for `SegmentTemplate@duration` from the availability window.
///
/// The generator owns a snapshot of everything it needs, so its live producer keeps working
/// after the manifest that created it has been replaced.
#[derive(Debug)]
pub struct FixedDurationGenerator {
    media: Arc<MediaTemplate>,
    dynamic: bool,
    start_number: u64,
    timescale: u64,
    /// Seconds.
    segment_duration: f64,
    /// Seconds.
    presentation_time_offset: f64,
    period_start: f64,
    period_end: f64,
    init_segment: Option<Arc<InitSegmentReference>>,
    segment_limit: usize,
}

impl FixedDurationGenerator {
    pub fn new(
        context: &Context,
        template: &SegmentTemplate,
        segment_duration: f64,
        init_segment: Option<Arc<InitSegmentReference>>,
        segment_limit: usize,
    ) -> ManifestResult<Arc<Self>> {
        Ok(Arc::new(Self {
            media: media_template(context, template)?,
            dynamic: context.dynamic,
            start_number: context.start_number(),
            timescale: context.timescale(),
            segment_duration,
            presentation_time_offset: context.scaled_presentation_time_offset(),
            period_start: context.period.start,
            period_end: context.period.end(),
            init_segment,
            segment_limit: segment_limit.max(1),
        }))
    }

    pub fn segment_duration(&self) -> f64 {
        self.segment_duration
    }

    /// Inclusive range of segment numbers currently inside both the availability window and
    /// the period. Empty when `min > max`.
    pub fn available_positions(&self, timeline: &PresentationTimeline) -> (i64, i64) {
        let (availability_start, availability_end) = timeline.availability_window();
        let start = availability_start.max(self.period_start) - self.period_start;
        let end = availability_end.min(self.period_end) - self.period_start;

        let start_number = self.start_number as i64;
        let min = (start / self.segment_duration).ceil() as i64 + start_number;
        let max = if end.is_finite() {
            (end / self.segment_duration).ceil() as i64 - 1 + start_number
        } else {
            tracing::warn!(
                limit = self.segment_limit,
                "Segment availability never ends, limiting generated segments"
            );
            min + self.segment_limit as i64 - 1
        };
        (min, max)
    }

    /// Positions of the initial index. Live presentations only keep the last
    /// `segment_limit` positions.
    fn initial_positions(&self, timeline: &PresentationTimeline) -> (i64, i64) {
        let (min, max) = self.available_positions(timeline);
        if self.dynamic {
            (min.max(max - self.segment_limit as i64 + 1), max)
        } else {
            (min, max)
        }
    }

    pub fn create_reference(&self, position: i64) -> SegmentReference {
        let period_time = (position - self.start_number as i64) as f64 * self.segment_duration;
        let start = self.period_start + period_time;
        let true_end = start + self.segment_duration;
        let end = true_end.min(self.period_end);

        let media_time =
            ((period_time + self.presentation_time_offset) * self.timescale as f64).round();
        SegmentReference::new(
            start,
            end,
            self.media.resolver(position.max(0) as u64, media_time.max(0.0) as u64),
        )
        .with_init_segment(self.init_segment.clone())
        .with_timestamp_offset(self.period_start - self.presentation_time_offset)
        .with_append_window(self.period_start, self.period_end)
        .with_true_end_time(true_end)
    }

    /// Builds the index for the current availability window.
    ///
    /// While more segments can still become available, or old ones have to be evicted, a
    /// producer is registered that extends the index every segment duration.
    pub fn generate_index(
        self: &Arc<Self>,
        timeline: &PresentationTimeline,
        update_interval_floor: f64,
    ) -> SegmentIndex {
        let (min, max) = self.initial_positions(timeline);
        let references = (min..=max).map(|p| self.create_reference(p)).collect();
        let mut index = SegmentIndex::new(references);

        let will_add = timeline.segment_availability_end() < self.period_end;
        let will_evict = timeline.is_live();
        if !will_add && !will_evict {
            return index;
        }

        let generator = Arc::clone(self);
        let mut next_position = max.max(min - 1) + 1;
        let interval = Duration::from_secs_f64(self.segment_duration.max(update_interval_floor));
        index.update_every(interval, move |timeline| {
            let availability_start = timeline.segment_availability_start();
            let (_, max) = generator.available_positions(timeline);

            let mut references = Vec::new();
            while next_position <= max && references.len() < generator.segment_limit {
                references.push(generator.create_reference(next_position));
                next_position += 1;
            }

            if availability_start > generator.period_end && references.is_empty() {
                return UpdateBatch::Finished;
            }
            UpdateBatch::Append(references)
        });
        index
    }
}
