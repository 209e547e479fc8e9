use std::{fmt, sync::Arc, time::Duration};

use tokio::{
    sync::Mutex,
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};

use crate::{segment::SegmentReference, timeline::PresentationTimeline};

/// Start times closer than this are considered the same segment.
const OVERLAP_TOLERANCE: f64 = 1e-3;

pub type SharedSegmentIndex = Arc<Mutex<SegmentIndex>>;
pub type SharedTimeline = Arc<Mutex<PresentationTimeline>>;

/// Result of one live update tick.
pub enum UpdateBatch {
    /// References to append. May be empty when nothing new became available yet.
    Append(Vec<SegmentReference>),
    /// The producer will never yield again.
    Finished,
}

type Producer = Box<dyn FnMut(&PresentationTimeline) -> UpdateBatch + Send>;

struct LiveUpdate {
    interval: Duration,
    producer: Producer,
}

/// Ordered, non-overlapping references of one stream.
///
/// Positions are stable across eviction: the reference at position `p` stays at `p`
/// however many references are evicted before it.
#[derive(Default)]
pub struct SegmentIndex {
    references: Vec<SegmentReference>,
    num_evicted: u64,
    live_update: Option<LiveUpdate>,
    generation: u64,
}

impl SegmentIndex {
    pub fn new(references: Vec<SegmentReference>) -> Self {
        debug_assert!(is_sorted(&references));
        Self {
            references,
            ..Default::default()
        }
    }

    pub fn len(&self) -> usize {
        self.references.len()
    }

    pub fn is_empty(&self) -> bool {
        self.references.is_empty()
    }

    pub fn references(&self) -> &[SegmentReference] {
        &self.references
    }

    pub fn into_references(self) -> Vec<SegmentReference> {
        self.references
    }

    pub fn iter(&self) -> impl Iterator<Item = &SegmentReference> {
        self.references.iter()
    }

    pub fn num_evicted(&self) -> u64 {
        self.num_evicted
    }

    /// Position of the reference containing `time`.
    ///
    /// A time before the first reference maps to the first position, so players can start
    /// slightly ahead of the content. A time inside a gap or past the end has no position.
    pub fn find(&self, time: f64) -> Option<u64> {
        let count = self.references.partition_point(|r| r.start_time <= time);
        if count == 0 {
            return (!self.references.is_empty()).then_some(self.num_evicted);
        }

        let index = count - 1;
        let end = match self.references.get(index + 1) {
            Some(next) => next.start_time,
            None => self.references[index].end_time,
        };
        (time < end).then_some(index as u64 + self.num_evicted)
    }

    pub fn get(&self, position: u64) -> Option<&SegmentReference> {
        let index = position.checked_sub(self.num_evicted)?;
        self.references.get(usize::try_from(index).ok()?)
    }

    /// Merges freshly generated references into the index.
    ///
    /// A new reference replaces an existing one starting at the same time. Existing
    /// references overlapped by new ones are dropped.
    pub fn merge(&mut self, references: Vec<SegmentReference>) {
        if references.is_empty() {
            return;
        }
        let existing = std::mem::take(&mut self.references);
        let (merged, _) = merge_sorted(existing, references, None);
        self.references = merged;
    }

    /// Same as [SegmentIndex::evict] followed by [SegmentIndex::merge], in one pass.
    pub fn merge_and_evict(&mut self, references: Vec<SegmentReference>, window_start: f64) {
        let existing = std::mem::take(&mut self.references);
        let (merged, evicted) = merge_sorted(existing, references, Some(window_start));
        self.references = merged;
        self.num_evicted += evicted;
    }

    /// Drops every reference ending at or before `time`.
    pub fn evict(&mut self, time: f64) {
        let before = self.references.len();
        self.references.retain(|r| r.end_time > time);
        let evicted = (before - self.references.len()) as u64;
        if evicted > 0 {
            tracing::trace!(evicted, time, "Evicted segment references");
        }
        self.num_evicted += evicted;
    }

    /// Clips the index to `[window_start, window_end)`.
    ///
    /// References entirely outside the window are removed, append windows are clamped and the
    /// last reference is stretched or shrunk to end exactly at `window_end`. References removed
    /// from the front only count as evicted when the index has already been handed out.
    pub fn fit(&mut self, window_start: f64, window_end: f64, is_new: bool) {
        if window_end.is_infinite() {
            return;
        }

        while self
            .references
            .last()
            .is_some_and(|r| r.start_time >= window_end)
        {
            self.references.pop();
        }

        let leading = self
            .references
            .iter()
            .take_while(|r| r.end_time <= window_start)
            .count();
        self.references.drain(..leading);
        if !is_new {
            self.num_evicted += leading as u64;
        }

        for reference in self.references.iter_mut() {
            reference.append_window_start = reference.append_window_start.max(window_start);
            reference.append_window_end = reference.append_window_end.min(window_end);
        }

        if let Some(last) = self.references.last_mut() {
            last.clip_end(window_end);
        }
    }

    /// Replaces the contents of this index with `other`, keeping eviction history.
    ///
    /// References starting before the first one of `other` count as evicted, so positions
    /// stay put across a regeneration. Any previously registered live update is superseded.
    pub fn replace_with(&mut self, other: SegmentIndex) {
        let dropped = match other.references.first() {
            Some(first) => self
                .references
                .iter()
                .take_while(|r| r.start_time < first.start_time - OVERLAP_TOLERANCE)
                .count(),
            None => self.references.len(),
        };
        self.num_evicted += dropped as u64;
        self.references = other.references;
        self.live_update = other.live_update;
        self.generation += 1;
    }

    /// Registers a producer that extends the index every `interval`.
    ///
    /// Registering again replaces the previous producer. Drivers started for an earlier
    /// registration notice the generation change and stop.
    pub fn update_every<F>(&mut self, interval: Duration, producer: F) -> u64
    where
        F: FnMut(&PresentationTimeline) -> UpdateBatch + Send + 'static,
    {
        self.live_update = Some(LiveUpdate {
            interval,
            producer: Box::new(producer),
        });
        self.generation += 1;
        self.generation
    }

    pub fn stop_updates(&mut self) {
        if self.live_update.take().is_some() {
            self.generation += 1;
        }
    }

    pub fn is_updating(&self) -> bool {
        self.live_update.is_some()
    }

    pub fn update_interval(&self) -> Option<Duration> {
        self.live_update.as_ref().map(|u| u.interval)
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Runs one live update: evict what fell out of the availability window, then append what
    /// the producer generated.
    ///
    /// Returns false once there is nothing left to update.
    pub fn tick(&mut self, timeline: &PresentationTimeline) -> bool {
        let Some(mut update) = self.live_update.take() else {
            return false;
        };

        self.evict(timeline.segment_availability_start());
        match (update.producer)(timeline) {
            UpdateBatch::Append(references) => {
                if !references.is_empty() {
                    tracing::debug!(count = references.len(), "Appending live segment references");
                }
                self.merge(references);
                self.live_update = Some(update);
                true
            }
            UpdateBatch::Finished => {
                tracing::info!("Live updates finished");
                self.generation += 1;
                false
            }
        }
    }
}

impl fmt::Debug for SegmentIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SegmentIndex")
            .field("references", &self.references)
            .field("num_evicted", &self.num_evicted)
            .field("update_interval", &self.update_interval())
            .field("generation", &self.generation)
            .finish()
    }
}

impl From<Vec<SegmentReference>> for SegmentIndex {
    fn from(references: Vec<SegmentReference>) -> Self {
        Self::new(references)
    }
}

fn is_sorted(references: &[SegmentReference]) -> bool {
    references
        .windows(2)
        .all(|w| w[0].start_time <= w[1].start_time)
}

enum Pick {
    Evict,
    Old,
    DropOld,
    New,
    Replace,
}

/// Two-pointer merge of two sorted runs. Returns the merged run and the number of existing
/// references evicted because they end at or before `evict_before`.
fn merge_sorted(
    existing: Vec<SegmentReference>,
    incoming: Vec<SegmentReference>,
    evict_before: Option<f64>,
) -> (Vec<SegmentReference>, u64) {
    debug_assert!(is_sorted(&incoming));

    let mut merged: Vec<SegmentReference> = Vec::with_capacity(existing.len() + incoming.len());
    let mut evicted = 0;
    let mut old = existing.into_iter().peekable();
    let mut new = incoming.into_iter().peekable();

    loop {
        let pick = match (old.peek(), new.peek()) {
            (Some(o), _) if evict_before.is_some_and(|t| o.end_time <= t) => Pick::Evict,
            (Some(o), _)
                if merged
                    .last()
                    .is_some_and(|last| o.start_time < last.end_time - OVERLAP_TOLERANCE) =>
            {
                Pick::DropOld
            }
            (Some(o), Some(n)) if (o.start_time - n.start_time).abs() < OVERLAP_TOLERANCE => {
                Pick::Replace
            }
            (Some(o), Some(n)) if o.start_time < n.start_time => {
                if o.end_time <= n.start_time + OVERLAP_TOLERANCE {
                    Pick::Old
                } else {
                    Pick::DropOld
                }
            }
            (Some(_), Some(_)) | (None, Some(_)) => Pick::New,
            (Some(_), None) => Pick::Old,
            (None, None) => break,
        };

        match pick {
            Pick::Evict => {
                old.next();
                evicted += 1;
            }
            Pick::DropOld => {
                if let Some(dropped) = old.next() {
                    tracing::trace!(
                        start = dropped.start_time,
                        end = dropped.end_time,
                        "Dropping reference overlapped by newer data"
                    );
                }
            }
            Pick::Old => merged.extend(old.next()),
            Pick::New => merged.extend(new.next()),
            Pick::Replace => {
                old.next();
                merged.extend(new.next());
            }
        }
    }

    (merged, evicted)
}

/// Drives the live updates registered on `index` until they finish or are replaced.
///
/// Returns `None` when no update is registered. Locks are always taken timeline first,
/// then index.
pub async fn spawn_live_updates(
    index: SharedSegmentIndex,
    timeline: SharedTimeline,
) -> Option<JoinHandle<()>> {
    let (interval, generation) = {
        let index = index.lock().await;
        (index.update_interval()?, index.generation())
    };

    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            let timeline = timeline.lock().await;
            let mut index = index.lock().await;
            if index.generation() != generation {
                tracing::debug!(generation, "Live update registration replaced, stopping");
                break;
            }
            if !index.tick(&timeline) {
                break;
            }
        }
    }))
}
