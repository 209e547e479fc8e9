use std::{
    collections::{BTreeSet, HashMap, HashSet},
    sync::Arc,
};

use tokio::{sync::Mutex, task::JoinHandle};
use url::Url;

use super::{
    context::{period_infos, Addressing, Context, PeriodInfo, Warnings},
    mpd::{AdaptationSet, Mpd, Period},
    segment_base::{self, IndexRequest},
    segment_list,
    segment_template::{self, FixedDurationGenerator, TemplateAddressing},
};
use crate::{
    config::ManifestConfig,
    drm::{
        content_protection::{parse_from_adaptation_set, parse_from_representation},
        DrmInfo,
    },
    error::{ManifestError, ManifestResult},
    index::{spawn_live_updates, SegmentIndex, SharedSegmentIndex, SharedTimeline},
    segment::{fixed_uris, InitSegmentReference, SegmentReference},
    timeline::PresentationTimeline,
    uri::resolve_uris,
};

/// Where the references of a stream come from.
#[derive(Debug, Clone)]
pub enum StreamSegments {
    /// Known from the manifest, possibly extended by a live update task.
    Indexed(SharedSegmentIndex),
    /// Stored in the media and waiting for an [segment_base::IndexFetcher].
    Deferred(IndexRequest),
}

/// One representation, ready to be played.
#[derive(Debug, Clone)]
pub struct Stream {
    pub id: Option<String>,
    pub adaptation_set_id: Option<String>,
    pub content_type: Option<String>,
    pub mime_type: Option<String>,
    pub codecs: Option<String>,
    pub bandwidth: Option<u64>,
    pub language: Option<String>,
    pub key_ids: BTreeSet<String>,
    pub drm_infos: Vec<DrmInfo>,
    pub init_segment: Option<Arc<InitSegmentReference>>,
    pub segments: StreamSegments,
}

#[derive(Debug, Clone)]
pub struct ManifestPeriod {
    pub id: Option<String>,
    pub start: f64,
    pub duration: Option<f64>,
    pub streams: Vec<Stream>,
}

#[derive(Debug, Clone)]
pub struct Manifest {
    pub dynamic: bool,
    pub timeline: SharedTimeline,
    /// Seconds between manifest reloads, for dynamic manifests.
    pub minimum_update_period: Option<f64>,
    pub periods: Vec<ManifestPeriod>,
}

/// Parses an MPD, and keeps parsing its updates.
///
/// Indexes of dynamic manifests are kept per `period,representation` so that every reload
/// extends the same index the live update tasks are working on.
pub struct DashParser {
    config: ManifestConfig,
    manifest_uri: Url,
    timeline: SharedTimeline,
    indexes: HashMap<String, SharedSegmentIndex>,
    live_tasks: HashMap<String, JoinHandle<()>>,
    /// Tasks of streams without a stable key, replaced on every parse.
    detached_tasks: Vec<JoinHandle<()>>,
    warnings: Arc<Warnings>,
    parsed_once: bool,
}

struct StreamPlan {
    init_segment: Option<Arc<InitSegmentReference>>,
    segments: StreamSegments,
    /// Index with a live update registered, to be driven once the timeline is released.
    live: Option<SharedSegmentIndex>,
}

impl DashParser {
    pub fn new(manifest_uri: Url, config: ManifestConfig) -> Self {
        Self {
            config,
            manifest_uri,
            timeline: Arc::new(Mutex::new(PresentationTimeline::new(None, 0.0))),
            indexes: HashMap::new(),
            live_tasks: HashMap::new(),
            detached_tasks: Vec::new(),
            warnings: Arc::default(),
            parsed_once: false,
        }
    }

    pub fn timeline(&self) -> SharedTimeline {
        self.timeline.clone()
    }

    pub fn index(&self, key: &str) -> Option<SharedSegmentIndex> {
        self.indexes.get(key).cloned()
    }

    pub fn config(&self) -> &ManifestConfig {
        &self.config
    }

    pub async fn parse(&mut self, text: &str) -> ManifestResult<Manifest> {
        let mpd = Mpd::parse(text)?;
        if mpd.periods.is_empty() {
            return Err(ManifestError::NoPeriod);
        }

        let dynamic = mpd.is_dynamic();
        let base_uris = resolve_uris(&[self.manifest_uri.clone()], &mpd.base_urls);
        let infos = period_infos(&mpd);

        let shared_timeline = Arc::clone(&self.timeline);
        let mut timeline = shared_timeline.lock().await;
        self.setup_timeline(&mpd, &infos, &mut timeline);

        let mut live = Vec::new();
        let mut seen_keys = HashSet::new();
        let mut periods = Vec::with_capacity(infos.len());
        for (info, period) in infos.iter().zip(mpd.periods.iter()) {
            let mut streams = Vec::new();
            for adaptation_set in &period.adaptation_sets {
                let parsed = self
                    .parse_adaptation_set(&base_uris, dynamic, info, period, adaptation_set, &mut timeline)
                    .await?;
                for (stream, key, index) in parsed {
                    if let Some(key) = &key {
                        seen_keys.insert(key.clone());
                    }
                    if let Some(index) = index {
                        live.push((key, index));
                    }
                    streams.push(stream);
                }
            }
            periods.push(ManifestPeriod {
                id: info.id.clone(),
                start: info.start,
                duration: info.duration,
                streams,
            });
        }
        drop(timeline);

        self.forget_removed_streams(&seen_keys);
        for handle in self.detached_tasks.drain(..) {
            handle.abort();
        }
        for (key, index) in live {
            let Some(handle) = spawn_live_updates(index, self.timeline.clone()).await else {
                continue;
            };
            match key {
                Some(key) => {
                    if let Some(previous) = self.live_tasks.insert(key, handle) {
                        previous.abort();
                    }
                }
                None => self.detached_tasks.push(handle),
            }
        }
        self.parsed_once = true;

        Ok(Manifest {
            dynamic,
            timeline: self.timeline.clone(),
            minimum_update_period: mpd.minimum_update_period,
            periods,
        })
    }

    fn setup_timeline(&self, mpd: &Mpd, infos: &[PeriodInfo], timeline: &mut PresentationTimeline) {
        let dynamic = mpd.is_dynamic();
        timeline.set_static(!dynamic);
        timeline.set_presentation_start_time(mpd.availability_start_time);

        let duration = mpd
            .media_presentation_duration
            .or_else(|| infos.last().and_then(|last| last.duration.map(|d| last.start + d)));
        if let Some(duration) = duration {
            timeline.set_duration(duration);
        }

        let availability = if dynamic {
            mpd.time_shift_buffer_depth.unwrap_or(f64::INFINITY)
        } else {
            f64::INFINITY
        };
        timeline.set_segment_availability_duration(availability);

        if dynamic {
            let delay = self
                .config
                .default_presentation_delay
                .or(mpd.suggested_presentation_delay)
                .or(mpd.min_buffer_time.map(|min_buffer_time| min_buffer_time * 1.5))
                .unwrap_or_default();
            timeline.set_presentation_delay(delay);
        }

        if !self.config.ignore_max_segment_duration {
            if let Some(max_segment_duration) = mpd.max_segment_duration {
                timeline.notify_max_segment_duration(max_segment_duration);
            }
        }

        let timings = mpd
            .utc_timings
            .iter()
            .map(|(scheme, value)| (scheme.as_str(), value.as_deref()));
        timeline.clock_mut().sync_direct(timings);
    }

    #[allow(clippy::type_complexity)]
    async fn parse_adaptation_set(
        &mut self,
        base_uris: &[Url],
        dynamic: bool,
        info: &PeriodInfo,
        period: &Period,
        adaptation_set: &AdaptationSet,
        timeline: &mut PresentationTimeline,
    ) -> ManifestResult<Vec<(Stream, Option<String>, Option<SharedSegmentIndex>)>> {
        let mut protection =
            parse_from_adaptation_set(&adaptation_set.content_protections, &self.config)?;

        let mut parsed = Vec::with_capacity(adaptation_set.representations.len());
        for representation in &adaptation_set.representations {
            let context = Context::resolve(base_uris, dynamic, info, period, adaptation_set, representation)
                .with_warnings(self.warnings.clone());
            let key_id = parse_from_representation(
                &representation.content_protections,
                &mut protection,
                &self.config,
            )?;

            let key = context.stream_key();
            let plan = self.plan_stream(&context, key.as_deref(), timeline).await?;
            tracing::debug!(
                period_id = ?info.id,
                representation_id = ?context.representation_id,
                deferred = matches!(plan.segments, StreamSegments::Deferred(_)),
                "Parsed representation"
            );

            let stream = Stream {
                id: context.representation_id.clone(),
                adaptation_set_id: context.adaptation_set_id.clone(),
                content_type: context.content_type.clone(),
                mime_type: context.mime_type.clone(),
                codecs: context.codecs.clone(),
                bandwidth: context.bandwidth,
                language: adaptation_set.lang.clone(),
                key_ids: key_id.into_iter().collect(),
                drm_infos: Vec::new(),
                init_segment: plan.init_segment,
                segments: plan.segments,
            };
            parsed.push((stream, key, plan.live));
        }

        // representations may narrow the key systems down, so they are only final now
        for (stream, _, _) in parsed.iter_mut() {
            stream.drm_infos = protection.drm_infos.clone();
            for info in &stream.drm_infos {
                stream.key_ids.extend(info.key_ids.iter().cloned());
            }
        }
        Ok(parsed)
    }

    async fn plan_stream(
        &mut self,
        context: &Context,
        key: Option<&str>,
        timeline: &mut PresentationTimeline,
    ) -> ManifestResult<StreamPlan> {
        match context.active_addressing() {
            Addressing::Base(base) => {
                let request = segment_base::index_request_from_base(context, base)?;
                Ok(StreamPlan {
                    init_segment: request.init_segment.clone(),
                    segments: StreamSegments::Deferred(request),
                    live: None,
                })
            }
            Addressing::List(list) => {
                let init_segment = segment_list::create_list_init_segment(context, list)?;
                let references = segment_list::create_references(context, list, init_segment.clone())?;
                let index = self.store_references(context, key, references, timeline).await;
                Ok(StreamPlan {
                    init_segment,
                    segments: StreamSegments::Indexed(index),
                    live: None,
                })
            }
            Addressing::Template(template) => {
                let init_segment = segment_template::create_init_segment(context, template)?;
                match segment_template::select_addressing(context, template)? {
                    TemplateAddressing::Index(index_template) => {
                        let request = segment_template::index_request_from_template(
                            context,
                            &index_template,
                            init_segment.clone(),
                        )?;
                        Ok(StreamPlan {
                            init_segment,
                            segments: StreamSegments::Deferred(request),
                            live: None,
                        })
                    }
                    TemplateAddressing::Timeline(ranges) => {
                        let references = segment_template::create_from_timeline(
                            context,
                            template,
                            &ranges,
                            init_segment.clone(),
                        )?;
                        let index = self.store_references(context, key, references, timeline).await;
                        Ok(StreamPlan {
                            init_segment,
                            segments: StreamSegments::Indexed(index),
                            live: None,
                        })
                    }
                    TemplateAddressing::Duration(segment_duration) => {
                        let generator = FixedDurationGenerator::new(
                            context,
                            template,
                            segment_duration,
                            init_segment.clone(),
                            self.config.segment_limit,
                        )?;
                        let (index, live) = self.store_generated(context, key, &generator, timeline).await;
                        Ok(StreamPlan {
                            init_segment,
                            segments: StreamSegments::Indexed(index),
                            live,
                        })
                    }
                }
            }
            Addressing::None if context.content_type.as_deref() == Some("text") => {
                let end = context.period.end();
                if end.is_infinite() {
                    return Err(ManifestError::NoSegmentInfo(context.representation_id.clone()));
                }
                // a single subtitle file covering the whole period
                let reference = SegmentReference::new(
                    context.period.start,
                    end,
                    fixed_uris(context.base_uris.clone()),
                )
                .with_timestamp_offset(context.period.start)
                .with_append_window(context.period.start, end);
                let index = self.store_references(context, key, vec![reference], timeline).await;
                Ok(StreamPlan {
                    init_segment: None,
                    segments: StreamSegments::Indexed(index),
                    live: None,
                })
            }
            Addressing::None => {
                tracing::error!(
                    representation_id = ?context.representation_id,
                    "Representation does not contain a segment information source"
                );
                Err(ManifestError::NoSegmentInfo(context.representation_id.clone()))
            }
        }
    }

    /// Stores references listed by the manifest.
    ///
    /// A reload of a dynamic manifest merges into the index created by the first parse,
    /// dropping whatever fell out of the availability window.
    async fn store_references(
        &mut self,
        context: &Context,
        key: Option<&str>,
        references: Vec<SegmentReference>,
        timeline: &mut PresentationTimeline,
    ) -> SharedSegmentIndex {
        timeline.notify_segments(&references);

        if context.dynamic {
            if let Some(existing) = key.and_then(|key| self.indexes.get(key)) {
                let availability_start = timeline.segment_availability_start();
                // the manifest may still list segments the window already left
                let references = references
                    .into_iter()
                    .filter(|reference| reference.end_time > availability_start)
                    .collect();
                let mut index = existing.lock().await;
                index.merge_and_evict(references, availability_start);
                // a later period may have closed this one
                if !context.period.is_last_period {
                    index.fit(context.period.start, context.period.end(), false);
                }
                drop(index);
                return existing.clone();
            }
        }

        let mut index = SegmentIndex::new(references);
        // an open live period may still grow
        if !context.dynamic || !context.period.is_last_period {
            index.fit(context.period.start, context.period.end(), true);
        }
        let index = Arc::new(Mutex::new(index));
        if let (true, Some(key)) = (context.dynamic, key) {
            self.indexes.insert(key.to_string(), index.clone());
        }
        index
    }

    /// Stores an index generated from `@duration`, returning it with itself again when a
    /// live update has to be driven.
    async fn store_generated(
        &mut self,
        context: &Context,
        key: Option<&str>,
        generator: &Arc<FixedDurationGenerator>,
        timeline: &mut PresentationTimeline,
    ) -> (SharedSegmentIndex, Option<SharedSegmentIndex>) {
        let existing = key
            .filter(|_| context.dynamic)
            .and_then(|key| self.indexes.get(key).cloned());

        if existing.is_none() && context.content_type.as_deref() != Some("image") {
            timeline.notify_max_segment_duration(generator.segment_duration());
            timeline.notify_min_segment_start_time(context.period.start);
        }

        let generated = generator.generate_index(timeline, self.config.live_update_interval_floor);
        let index = match existing {
            Some(existing) => {
                existing.lock().await.replace_with(generated);
                existing
            }
            None => {
                let index = Arc::new(Mutex::new(generated));
                if let (true, Some(key)) = (context.dynamic, key) {
                    self.indexes.insert(key.to_string(), index.clone());
                }
                index
            }
        };

        let updating = index.lock().await.is_updating();
        let live = updating.then(|| index.clone());
        (index, live)
    }

    fn forget_removed_streams(&mut self, seen_keys: &HashSet<String>) {
        self.indexes.retain(|key, _| seen_keys.contains(key));
        self.live_tasks.retain(|key, handle| {
            let keep = seen_keys.contains(key);
            if !keep {
                tracing::debug!(key, "Stream left the manifest, stopping its live updates");
                handle.abort();
            }
            keep
        });
    }

    /// Stops every live update task.
    pub fn stop(&mut self) {
        for (_, handle) in self.live_tasks.drain() {
            handle.abort();
        }
        for handle in self.detached_tasks.drain(..) {
            handle.abort();
        }
    }

    pub fn is_first_parse(&self) -> bool {
        !self.parsed_once
    }
}

impl Drop for DashParser {
    fn drop(&mut self) {
        self.stop();
    }
}
