use std::sync::Arc;

use iori_manifest::{
    hls::{create_references, parse_playlist, MediaPlaylistTracker, PlaylistParser, PlaylistType},
    ManifestError,
};
use url::Url;

use crate::{assert_ordered, setup_tracing};

fn playlist_uri() -> Url {
    Url::parse("https://cdn.example.com/hls/playlist.m3u8").unwrap()
}

#[test]
fn master_playlist_variants() -> anyhow::Result<()> {
    setup_tracing();
    let playlist = parse_playlist(include_str!("../fixtures/hls/master.m3u8"), &playlist_uri())?;
    assert_eq!(playlist.playlist_type, PlaylistType::Master);
    assert!(playlist.segments.is_empty());
    assert!(playlist.tag("EXT-X-MEDIA").is_some());

    let variants: Vec<_> = playlist.variants().collect();
    assert_eq!(variants.len(), 2);
    assert_eq!(variants[0].attribute_value("URI"), Some("720p/index.m3u8"));
    assert_eq!(
        variants[0].attribute_value("CODECS"),
        Some("avc1.4d401f,mp4a.40.2")
    );
    assert_eq!(
        variants[1].attribute_value("URI"),
        Some("https://cdn.example.com/1080p/index.m3u8?token=abc")
    );
    Ok(())
}

#[test]
fn media_playlist_references() -> anyhow::Result<()> {
    setup_tracing();
    let playlist = parse_playlist(include_str!("../fixtures/hls/media-vod.m3u8"), &playlist_uri())?;
    assert_eq!(playlist.playlist_type, PlaylistType::Media);
    assert!(playlist.has_end_list());
    assert_eq!(playlist.target_duration(), Some(6.0));
    assert_eq!(playlist.segments.len(), 3);
    assert!(playlist.segments[0].tag("EXT-X-KEY").is_some());
    assert!(playlist.segments[2].tag("EXT-X-DISCONTINUITY").is_some());

    let references = create_references(&playlist, 0.0)?;
    assert_eq!(references.len(), 3);
    assert_ordered(&references);
    assert!((references[2].end_time - 16.016).abs() < 1e-9);
    assert_eq!(
        references[1].uris()[0].as_str(),
        "https://cdn.example.com/hls/seg-1.m4s"
    );

    // the map applies until the next one
    let init = references[0].init_segment.as_ref().expect("init segment");
    assert!(Arc::ptr_eq(init, references[2].init_segment.as_ref().unwrap()));
    assert_eq!(init.uris()[0].as_str(), "https://cdn.example.com/hls/init.mp4");
    Ok(())
}

#[test]
fn low_latency_partial_segments() -> anyhow::Result<()> {
    let playlist = parse_playlist(include_str!("../fixtures/hls/low-latency.m3u8"), &playlist_uri())?;
    assert_eq!(playlist.segments.len(), 3);
    assert!(playlist.tag("EXT-X-SERVER-CONTROL").is_some());
    assert_eq!(playlist.segments[1].partial_segments.len(), 2);

    let pending = &playlist.segments[2];
    assert!(pending.verbatim_uri.is_empty());
    assert_eq!(pending.partial_segments.len(), 2);
    assert_eq!(pending.partial_segments[1].name(), "EXT-X-PRELOAD-HINT");

    // the pending segment has no uri yet
    let references = create_references(&playlist, 80.0)?;
    assert_eq!(references.len(), 2);
    assert_eq!(references[1].end_time, 88.0);
    Ok(())
}

#[test]
fn tag_ids_are_unique_per_parser() -> anyhow::Result<()> {
    let mut parser = PlaylistParser::new();
    let master = parser.parse(include_str!("../fixtures/hls/master.m3u8"), &playlist_uri())?;
    let media = parser.parse(include_str!("../fixtures/hls/live-1.m3u8"), &playlist_uri())?;

    let mut ids: Vec<u64> = master
        .tags
        .iter()
        .chain(media.tags.iter())
        .chain(media.segments.iter().flat_map(|segment| segment.tags.iter()))
        .map(|tag| tag.id)
        .collect();
    let count = ids.len();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), count);
    Ok(())
}

#[test]
fn malformed_playlists() {
    assert!(matches!(
        parse_playlist("#EXT-X-VERSION:3\n", &playlist_uri()),
        Err(ManifestError::PlaylistHeaderMissing)
    ));
    // the line after EXT-X-STREAM-INF should have been its uri
    assert!(matches!(
        parse_playlist(
            "#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=1\n#EXT-X-TARGETDURATION:6\nlow.m3u8\n",
            &playlist_uri()
        ),
        Err(ManifestError::InvalidPlaylistHierarchy(name)) if name == "EXT-X-TARGETDURATION"
    ));
}

#[test]
fn live_reload_keeps_start_times() -> anyhow::Result<()> {
    setup_tracing();
    let mut tracker = MediaPlaylistTracker::new();

    let first = parse_playlist(include_str!("../fixtures/hls/live-1.m3u8"), &playlist_uri())?;
    assert_eq!(tracker.update(&first)?, 3);

    let second = parse_playlist(include_str!("../fixtures/hls/live-2.m3u8"), &playlist_uri())?;
    // 103 and 104 are new, 100 left the playlist
    assert_eq!(tracker.update(&second)?, 2);

    let index = tracker.index();
    assert_ordered(index.references());
    assert_eq!(index.len(), 4);
    assert_eq!(index.num_evicted(), 1);
    assert_eq!(index.references()[0].start_time, 4.0);
    assert_eq!(
        index.get(4).map(|r| r.uris()[0].to_string()),
        Some("https://cdn.example.com/hls/104.ts".to_string())
    );
    Ok(())
}
