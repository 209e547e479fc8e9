use std::{sync::Arc, time::Duration};

use chrono::TimeDelta;
use iori_manifest::{
    dash::{DashParser, StreamSegments},
    timeline::clock::parse_xs_datetime,
    Clock, ManifestConfig, SharedSegmentIndex,
};
use url::Url;

use crate::{assert_ordered, setup_tracing};

async fn live_parser(elapsed: i64) -> anyhow::Result<DashParser> {
    setup_tracing();
    let parser = DashParser::new(
        Url::parse("https://live.example.com/channel/manifest.mpd")?,
        ManifestConfig::default(),
    );
    let start = parse_xs_datetime("2024-01-01T00:00:00Z")?;
    parser
        .timeline()
        .lock()
        .await
        .set_clock(Clock::manual(start + TimeDelta::seconds(elapsed)));
    Ok(parser)
}

async fn advance(parser: &DashParser, seconds: i64) {
    parser
        .timeline()
        .lock()
        .await
        .clock_mut()
        .advance(TimeDelta::seconds(seconds));
}

fn indexed(segments: &StreamSegments) -> SharedSegmentIndex {
    match segments {
        StreamSegments::Indexed(index) => index.clone(),
        StreamSegments::Deferred(_) => panic!("expected an index"),
    }
}

#[tokio::test]
async fn reload_slides_timeline_window() -> anyhow::Result<()> {
    let mut parser = live_parser(24).await?;

    let first = parser
        .parse(include_str!("../fixtures/dash/live-timeline-1.mpd"))
        .await?;
    assert!(first.dynamic);
    assert_eq!(first.minimum_update_period, Some(2.0));
    let index = indexed(&first.periods[0].streams[0].segments);
    assert_eq!(index.lock().await.len(), 5);

    advance(&parser, 16).await;
    let second = parser
        .parse(include_str!("../fixtures/dash/live-timeline-2.mpd"))
        .await?;
    let reloaded = indexed(&second.periods[0].streams[0].segments);
    assert!(Arc::ptr_eq(&index, &reloaded));

    {
        let index = index.lock().await;
        assert_ordered(index.references());
        // availability window is [16, 36] with 4 second segments
        assert_eq!(index.len(), 5);
        assert_eq!(index.num_evicted(), 4);
        assert_eq!(index.references()[0].start_time, 16.0);
        assert_eq!(
            index.references()[0].uris()[0].as_str(),
            "https://live.example.com/channel/a1/16000.m4s"
        );
        assert_eq!(index.find(35.0), Some(8));
    }

    let timeline = second.timeline.lock().await;
    assert!(timeline.is_live());
    assert_eq!(timeline.availability_window(), (16.0, 36.0));
    // suggestedPresentationDelay
    assert_eq!(timeline.seek_range_end(), 30.0);
    Ok(())
}

#[tokio::test]
async fn reload_drops_removed_representations() -> anyhow::Result<()> {
    let mut parser = live_parser(24).await?;
    parser
        .parse(include_str!("../fixtures/dash/live-timeline-1.mpd"))
        .await?;
    assert!(parser.index("live,a1").is_some());

    let renamed = include_str!("../fixtures/dash/live-timeline-2.mpd").replace("\"a1\"", "\"a2\"");
    parser.parse(&renamed).await?;
    assert!(parser.index("live,a1").is_none());
    assert!(parser.index("live,a2").is_some());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn generated_period_finishes_after_it_leaves_window() -> anyhow::Result<()> {
    let mut parser = live_parser(10).await?;
    let manifest = parser
        .parse(
            r#"<MPD type="dynamic" availabilityStartTime="2024-01-01T00:00:00Z" timeShiftBufferDepth="PT8S">
              <Period id="p1" start="PT0S" duration="PT20S">
                <AdaptationSet contentType="video">
                  <SegmentTemplate duration="4" media="p1/$Number$.m4s"/>
                  <Representation id="v"/>
                </AdaptationSet>
              </Period>
              <Period id="p2" start="PT20S">
                <AdaptationSet contentType="video">
                  <SegmentTemplate duration="4" media="p2/$Number$.m4s"/>
                  <Representation id="v"/>
                </AdaptationSet>
              </Period>
            </MPD>"#,
        )
        .await?;

    let first = indexed(&manifest.periods[0].streams[0].segments);
    let second = indexed(&manifest.periods[1].streams[0].segments);
    assert_eq!(first.lock().await.len(), 2);
    assert!(first.lock().await.is_updating());
    assert!(second.lock().await.is_empty());
    assert!(second.lock().await.is_updating());

    // the first period is entirely behind the window now
    advance(&parser, 70).await;
    tokio::time::sleep(Duration::from_secs(9)).await;

    {
        let first = first.lock().await;
        assert!(first.is_empty());
        assert!(!first.is_updating());
        assert_eq!(first.num_evicted(), 5);
    }
    {
        let second = second.lock().await;
        assert!(second.is_updating());
        assert_ordered(second.references());
        assert_eq!(second.references().first().map(|r| r.start_time), Some(68.0));
        assert_eq!(second.references().last().map(|r| r.end_time), Some(76.0));
    }

    parser.stop();
    Ok(())
}

#[tokio::test]
async fn reload_closing_period_fits_index() -> anyhow::Result<()> {
    let mut parser = live_parser(24).await?;
    parser
        .parse(include_str!("../fixtures/dash/live-timeline-1.mpd"))
        .await?;

    let closed = include_str!("../fixtures/dash/live-timeline-2.mpd").replace(
        "</MPD>",
        r#"<Period id="next" start="PT24S">
            <AdaptationSet contentType="audio" mimeType="audio/mp4">
              <SegmentTemplate duration="4" media="next/$Number$.m4s"/>
              <Representation id="a1" bandwidth="128000"/>
            </AdaptationSet>
          </Period>
        </MPD>"#,
    );
    let manifest = parser.parse(&closed).await?;
    assert_eq!(manifest.periods[0].duration, Some(24.0));

    let index = indexed(&manifest.periods[0].streams[0].segments);
    {
        let index = index.lock().await;
        assert_ordered(index.references());
        assert!(index.iter().all(|r| r.end_time <= 24.0));
        assert_eq!(index.references().last().map(|r| r.end_time), Some(24.0));
    }

    parser.stop();
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn regenerated_index_keeps_positions() -> anyhow::Result<()> {
    const MPD: &str = r#"<MPD type="dynamic" availabilityStartTime="2024-01-01T00:00:00Z" timeShiftBufferDepth="PT8S">
      <Period id="live" start="PT0S">
        <AdaptationSet contentType="video">
          <SegmentTemplate duration="4" media="$Number$.m4s"/>
          <Representation id="v"/>
        </AdaptationSet>
      </Period>
    </MPD>"#;

    let mut parser = live_parser(40).await?;
    let first = parser.parse(MPD).await?;
    let index = indexed(&first.periods[0].streams[0].segments);
    let before: Vec<(u64, f64)> = {
        let index = index.lock().await;
        index
            .iter()
            .map(|r| (index.find(r.start_time).unwrap(), r.start_time))
            .collect()
    };
    assert!(!before.is_empty());

    advance(&parser, 8).await;
    let second = parser.parse(MPD).await?;
    let reloaded = indexed(&second.periods[0].streams[0].segments);
    assert!(Arc::ptr_eq(&index, &reloaded));

    let index = index.lock().await;
    assert!(index.num_evicted() > 0);
    let first_start = index.references()[0].start_time;
    assert!(first_start > before[0].1);
    // every position still names the segment it named before the reload
    let (origin_position, origin_start) = before[0];
    for reference in index.iter() {
        let position = index.find(reference.start_time).unwrap();
        let expected = origin_position as f64 + (reference.start_time - origin_start) / 4.0;
        assert_eq!(position as f64, expected);
    }
    for (position, start) in &before {
        if let Some(reference) = index.get(*position) {
            assert_eq!(reference.start_time, *start);
        }
    }
    drop(index);

    parser.stop();
    Ok(())
}
