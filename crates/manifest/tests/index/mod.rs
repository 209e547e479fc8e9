use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use chrono::TimeDelta;
use iori_manifest::{
    spawn_live_updates, timeline::clock::parse_xs_datetime, Clock, PresentationTimeline,
    SegmentIndex, SegmentReference, UpdateBatch,
};
use tokio::sync::Mutex;

use crate::{assert_ordered, reference};

fn run(start: f64, count: usize, duration: f64) -> Vec<SegmentReference> {
    (0..count)
        .map(|i| reference(start + i as f64 * duration, start + (i + 1) as f64 * duration))
        .collect()
}

fn times(index: &SegmentIndex) -> Vec<(f64, f64)> {
    index.iter().map(|r| (r.start_time, r.end_time)).collect()
}

#[test]
fn merges_stay_ordered() {
    let mut index = SegmentIndex::new(run(0.0, 5, 2.0));
    // overlapping refresh with a shifted tail
    index.merge(run(6.0, 2, 2.0));
    index.merge(vec![reference(9.0, 12.0), reference(12.0, 15.0)]);
    index.merge(run(20.0, 2, 5.0));
    index.merge(Vec::new());

    assert_ordered(index.references());
    assert_eq!(index.references().first().map(|r| r.start_time), Some(0.0));
    assert_eq!(index.references().last().map(|r| r.end_time), Some(30.0));
}

#[test]
fn merge_and_evict_matches_evict_then_merge() {
    let existing = run(0.0, 6, 4.0);
    let incoming = run(16.0, 4, 4.0);

    for window_start in [0.0, 3.0, 8.0, 15.9, 24.0, 40.0] {
        let mut combined = SegmentIndex::new(existing.clone());
        combined.merge_and_evict(incoming.clone(), window_start);

        let mut sequential = SegmentIndex::new(existing.clone());
        sequential.evict(window_start);
        sequential.merge(incoming.clone());

        assert_eq!(times(&combined), times(&sequential), "window start {window_start}");
        assert_eq!(combined.num_evicted(), sequential.num_evicted());
        assert_ordered(combined.references());
    }
}

#[test]
fn fit_clamps_to_period() {
    let mut index = SegmentIndex::new(run(-2.0, 8, 4.0));
    index.fit(0.0, 21.0, true);

    assert_eq!(index.num_evicted(), 0);
    let references = index.references();
    assert_eq!(references.first().map(|r| r.start_time), Some(-2.0));
    assert_eq!(references.last().map(|r| (r.start_time, r.end_time)), Some((18.0, 21.0)));
    assert!(references
        .iter()
        .all(|r| r.append_window_start >= 0.0 && r.append_window_end <= 21.0));

    // an index already handed out counts what it loses
    let mut index = SegmentIndex::new(run(0.0, 4, 4.0));
    index.fit(8.0, 16.0, false);
    assert_eq!(times(&index), vec![(8.0, 12.0), (12.0, 16.0)]);
    assert_eq!(index.num_evicted(), 2);
}

#[test]
fn find_and_get_use_stable_positions() {
    let mut index = SegmentIndex::new(run(0.0, 5, 2.0));
    assert_eq!(index.find(5.0), Some(2));

    index.evict(4.0);
    assert_eq!(index.find(5.0), Some(2));
    assert_eq!(index.get(2).map(|r| r.start_time), Some(4.0));
    assert!(index.get(1).is_none());
    assert!(index.find(100.0).is_none());
}

fn live_timeline(elapsed: i64) -> PresentationTimeline {
    let start = parse_xs_datetime("2024-01-01T00:00:00Z").unwrap();
    let mut timeline = PresentationTimeline::new(Some(start), 0.0);
    timeline.set_static(false);
    timeline.set_segment_availability_duration(10.0);
    timeline.notify_max_segment_duration(2.0);
    timeline.set_clock(Clock::manual(start + TimeDelta::seconds(elapsed)));
    timeline
}

#[tokio::test(start_paused = true)]
async fn live_driver_ticks_until_finished() {
    let timeline = Arc::new(Mutex::new(live_timeline(12)));
    let index = Arc::new(Mutex::new(SegmentIndex::new(run(0.0, 5, 2.0))));

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let mut next = 10.0;
    index
        .lock()
        .await
        .update_every(Duration::from_secs(2), move |_timeline| {
            if counter.fetch_add(1, Ordering::SeqCst) >= 3 {
                return UpdateBatch::Finished;
            }
            let batch = vec![reference(next, next + 2.0)];
            next += 2.0;
            UpdateBatch::Append(batch)
        });

    let handle = spawn_live_updates(index.clone(), timeline.clone())
        .await
        .expect("an update is registered");

    // ticks fire at 2, 4, 6 and 8 seconds, the clock moves in between
    tokio::time::sleep(Duration::from_secs(1)).await;
    for _ in 0..3 {
        timeline.lock().await.clock_mut().advance(TimeDelta::seconds(2));
        tokio::time::sleep(Duration::from_secs(2)).await;
    }
    handle.await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 4);
    let index = index.lock().await;
    assert!(!index.is_updating());
    assert_ordered(index.references());
    assert_eq!(index.references().last().map(|r| r.end_time), Some(16.0));
    // the window reached [6, 16] at the last tick
    assert_eq!(index.references().first().map(|r| r.start_time), Some(6.0));
}

#[tokio::test(start_paused = true)]
async fn reregistering_stops_previous_driver() {
    let timeline = Arc::new(Mutex::new(live_timeline(12)));
    let index = Arc::new(Mutex::new(SegmentIndex::default()));

    index
        .lock()
        .await
        .update_every(Duration::from_secs(1), |_| UpdateBatch::Append(Vec::new()));
    let first = spawn_live_updates(index.clone(), timeline.clone()).await.unwrap();

    index
        .lock()
        .await
        .update_every(Duration::from_secs(1), |_| UpdateBatch::Append(Vec::new()));
    let second = spawn_live_updates(index.clone(), timeline.clone()).await.unwrap();

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(first.is_finished());
    assert!(!second.is_finished());
    second.abort();
}
