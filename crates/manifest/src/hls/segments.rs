use std::{collections::BTreeMap, sync::Arc};

use url::Url;

use super::{
    parser::{Playlist, Segment},
    tag::Tag,
};
use crate::{
    error::{ManifestError, ManifestResult},
    index::SegmentIndex,
    segment::{fixed_uris, InitSegmentReference, SegmentReference},
};

/// `<length>[@<offset>]`. Without an offset the range continues where the previous one ended.
fn parse_byte_range(value: &str, previous_end: Option<u64>) -> ManifestResult<(u64, Option<u64>)> {
    let invalid = || ManifestError::invalid_attribute("EXT-X-BYTERANGE", value);
    let (length, offset) = match value.split_once('@') {
        Some((length, offset)) => (length, Some(offset.parse::<u64>().map_err(|_| invalid())?)),
        None => (value, None),
    };
    let length: u64 = length.parse().map_err(|_| invalid())?;
    if length == 0 {
        return Err(invalid());
    }
    let start = offset.or(previous_end).unwrap_or(0);
    let end = start.checked_add(length - 1).ok_or_else(invalid)?;
    Ok((start, Some(end)))
}

fn segment_duration(segment: &Segment) -> ManifestResult<f64> {
    let value = segment
        .tag("EXTINF")
        .ok_or_else(|| ManifestError::missing_attribute(&segment.verbatim_uri, "EXTINF"))?
        .value
        .as_deref()
        .unwrap_or_default();
    value
        .parse()
        .map_err(|_| ManifestError::invalid_attribute("EXTINF", value))
}

fn create_init_segment(playlist_uri: &Url, map: &Tag) -> ManifestResult<InitSegmentReference> {
    let uri = map.required_attribute_value("URI")?;
    let uri = playlist_uri.join(uri)?;
    let (start_byte, end_byte) = match map.attribute_value("BYTERANGE") {
        Some(range) => parse_byte_range(range, None)?,
        None => (0, None),
    };
    Ok(InitSegmentReference::new(fixed_uris(vec![uri]), start_byte, end_byte))
}

/// References paired with their media sequence number.
fn sequenced_references(
    playlist: &Playlist,
    start_time: f64,
) -> ManifestResult<Vec<(u64, SegmentReference)>> {
    let mut references = Vec::with_capacity(playlist.segments.len());
    let mut sequence = playlist.media_sequence();
    let mut time = start_time;
    let mut previous_end_byte = None;
    let mut init: Option<(u64, Arc<InitSegmentReference>)> = None;

    for segment in &playlist.segments {
        if let Some(map) = segment.tag("EXT-X-MAP") {
            if init.as_ref().map(|(id, _)| *id) != Some(map.id) {
                let reference = create_init_segment(&playlist.uri, map)?;
                init = Some((map.id, Arc::new(reference)));
            }
        }
        // a trailing run of partial segments has no uri nor duration yet
        if segment.verbatim_uri.is_empty() {
            continue;
        }

        let duration = segment_duration(segment)?;
        let byte_range = match segment.tag("EXT-X-BYTERANGE").and_then(|t| t.value.as_deref()) {
            Some(range) => Some(parse_byte_range(range, previous_end_byte)?),
            None => None,
        };
        previous_end_byte = byte_range.and_then(|(_, end)| end).map(|end| end.saturating_add(1));

        match &segment.absolute_uri {
            Some(uri) if duration > 0.0 => {
                let mut reference =
                    SegmentReference::new(time, time + duration, fixed_uris(vec![uri.clone()]))
                        .with_init_segment(init.as_ref().map(|(_, init)| init.clone()));
                if let Some((start, end)) = byte_range {
                    reference = reference.with_byte_range(start, end);
                }
                references.push((sequence, reference));
            }
            Some(_) => log::warn!("Skipping segment {} with duration {duration}", segment.verbatim_uri),
            None => log::warn!("Skipping segment with unresolvable uri {}", segment.verbatim_uri),
        }

        sequence += 1;
        time += duration;
    }

    Ok(references)
}

/// Turns the segments of a media playlist into references, the first one starting at
/// `start_time`.
pub fn create_references(playlist: &Playlist, start_time: f64) -> ManifestResult<Vec<SegmentReference>> {
    Ok(sequenced_references(playlist, start_time)?
        .into_iter()
        .map(|(_, reference)| reference)
        .collect())
}

/// Keeps the index of a live media playlist current across reloads.
///
/// Media sequence numbers anchor segments on the timeline: a segment seen in an earlier
/// reload keeps its start time, and segments that left the playlist are evicted.
#[derive(Debug, Default)]
pub struct MediaPlaylistTracker {
    index: SegmentIndex,
    sequence_starts: BTreeMap<u64, f64>,
    target_duration: Option<f64>,
}

impl MediaPlaylistTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn index(&self) -> &SegmentIndex {
        &self.index
    }

    pub fn into_index(self) -> SegmentIndex {
        self.index
    }

    fn start_time_of(&self, sequence: u64) -> f64 {
        if let Some(start) = self.sequence_starts.get(&sequence) {
            return *start;
        }

        let target_duration = self.target_duration.unwrap_or_default();
        match (
            self.sequence_starts.first_key_value(),
            self.sequence_starts.last_key_value(),
            self.index.references().last(),
        ) {
            (_, Some((last_sequence, _)), Some(last)) if sequence > *last_sequence => {
                let missing = sequence - last_sequence - 1;
                if missing > 0 {
                    log::warn!("{missing} segments were missed between playlist reloads");
                }
                last.end_time + missing as f64 * target_duration
            }
            (Some((first_sequence, first_start)), _, _) if sequence < *first_sequence => {
                log::warn!("Media sequence went backwards from {first_sequence} to {sequence}");
                (first_start - (first_sequence - sequence) as f64 * target_duration).max(0.0)
            }
            _ => 0.0,
        }
    }

    /// Applies a reloaded playlist and returns how many references are new.
    pub fn update(&mut self, playlist: &Playlist) -> ManifestResult<usize> {
        if playlist.target_duration().is_some() {
            self.target_duration = playlist.target_duration();
        }

        let media_sequence = playlist.media_sequence();
        let start_time = self.start_time_of(media_sequence);
        let references = sequenced_references(playlist, start_time)?;

        let last_known = self.sequence_starts.last_key_value().map(|(sequence, _)| *sequence);
        let new_count = references
            .iter()
            .filter(|(sequence, _)| last_known.map_or(true, |last| *sequence > last))
            .count();

        for (sequence, reference) in &references {
            self.sequence_starts.entry(*sequence).or_insert(reference.start_time);
        }
        self.sequence_starts = self.sequence_starts.split_off(&media_sequence);

        let window_start = references
            .first()
            .map(|(_, reference)| reference.start_time)
            .unwrap_or(start_time);
        self.index.merge_and_evict(
            references.into_iter().map(|(_, reference)| reference).collect(),
            window_start,
        );

        log::debug!(
            "Media sequence {media_sequence}: {new_count} new segments, {} in index",
            self.index.len()
        );
        Ok(new_count)
    }
}
