use url::Url;

use super::tag::{Attribute, Tag};
use crate::error::{ManifestError, ManifestResult};

/// Tags that only appear in media playlists and describe the playlist as a whole.
pub const MEDIA_PLAYLIST_TAGS: &[&str] = &[
    "EXT-X-TARGETDURATION",
    "EXT-X-MEDIA-SEQUENCE",
    "EXT-X-DISCONTINUITY-SEQUENCE",
    "EXT-X-PLAYLIST-TYPE",
    "EXT-X-I-FRAMES-ONLY",
    "EXT-X-ENDLIST",
    "EXT-X-SERVER-CONTROL",
    "EXT-X-SKIP",
    "EXT-X-PART-INF",
    "EXT-X-DATERANGE",
];

/// Tags that describe the segment following them.
pub const SEGMENT_TAGS: &[&str] = &[
    "EXTINF",
    "EXT-X-BYTERANGE",
    "EXT-X-DISCONTINUITY",
    "EXT-X-PROGRAM-DATE-TIME",
    "EXT-X-KEY",
    "EXT-X-DATERANGE",
    "EXT-X-MAP",
    "EXT-X-GAP",
    "EXT-X-TILES",
    "EXT-X-BITRATE",
];

/// Tags allowed in both kinds of playlist, kept on the playlist even between segments.
const COMMON_PLAYLIST_TAGS: &[&str] = &[
    "EXT-X-VERSION",
    "EXT-X-INDEPENDENT-SEGMENTS",
    "EXT-X-START",
    "EXT-X-DEFINE",
];

const STREAM_INF: &str = "EXT-X-STREAM-INF";
const PART: &str = "EXT-X-PART";
const PRELOAD_HINT: &str = "EXT-X-PRELOAD-HINT";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaylistType {
    Master,
    Media,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    /// As written in the playlist. Empty for a trailing run of partial segments.
    pub verbatim_uri: String,
    pub absolute_uri: Option<Url>,
    pub tags: Vec<Tag>,
    pub partial_segments: Vec<Tag>,
}

impl Segment {
    pub fn tag(&self, name: &str) -> Option<&Tag> {
        self.tags.iter().find(|tag| tag.name() == name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Playlist {
    pub uri: Url,
    pub playlist_type: PlaylistType,
    pub tags: Vec<Tag>,
    pub segments: Vec<Segment>,
}

impl Playlist {
    pub fn tag(&self, name: &str) -> Option<&Tag> {
        self.tags.iter().find(|tag| tag.name() == name)
    }

    pub fn media_sequence(&self) -> u64 {
        self.tag("EXT-X-MEDIA-SEQUENCE")
            .and_then(|tag| tag.value.as_deref())
            .and_then(|value| value.parse().ok())
            .unwrap_or(0)
    }

    pub fn target_duration(&self) -> Option<f64> {
        self.tag("EXT-X-TARGETDURATION")
            .and_then(|tag| tag.value.as_deref())
            .and_then(|value| value.parse().ok())
    }

    pub fn has_end_list(&self) -> bool {
        self.tag("EXT-X-ENDLIST").is_some()
    }

    /// `EXT-X-STREAM-INF` tags of a master playlist. Each carries its playlist in `URI`.
    pub fn variants(&self) -> impl Iterator<Item = &Tag> {
        self.tags.iter().filter(|tag| tag.name() == STREAM_INF)
    }
}

fn is_comment(line: &str) -> bool {
    line.starts_with('#') && !line.starts_with("#EXT")
}

fn tag_name(line: &str) -> Option<&str> {
    let name = line.strip_prefix('#')?;
    if !name.starts_with("EXT") {
        return None;
    }
    Some(name.split_once(':').map(|(name, _)| name).unwrap_or(name))
}

/// Looks at tag names only. A single playlist-level media tag or segment duration makes
/// the whole document a media playlist. The line after `EXT-X-STREAM-INF` is its URI and
/// is not looked at.
fn classify(lines: &[&str]) -> PlaylistType {
    let mut skip = false;
    for line in lines {
        if std::mem::take(&mut skip) {
            continue;
        }
        match tag_name(line) {
            Some(name) if MEDIA_PLAYLIST_TAGS.contains(&name) || name == "EXTINF" || name == PART => {
                return PlaylistType::Media
            }
            Some(STREAM_INF) => skip = true,
            _ => {}
        }
    }
    PlaylistType::Master
}

/// Line-oriented playlist parser.
///
/// Tag ids are handed out in document order and only stay unique within one parser.
#[derive(Debug, Default)]
pub struct PlaylistParser {
    next_id: u64,
}

impl PlaylistParser {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub fn parse(&mut self, text: &str, uri: &Url) -> ManifestResult<Playlist> {
        let lines: Vec<&str> = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect();

        let header = lines.first().copied().unwrap_or_default();
        if header != "#EXTM3U" && !header.starts_with("#EXTM3U ") && !header.starts_with("#EXTM3U\t") {
            return Err(ManifestError::PlaylistHeaderMissing);
        }

        let playlist_type = classify(&lines[1..]);
        let mut tags = Vec::new();
        let mut i = 1;
        while i < lines.len() {
            let line = lines[i];
            if is_comment(line) {
                i += 1;
                continue;
            }

            let name = tag_name(line);
            if playlist_type == PlaylistType::Media {
                let starts_segments = match name {
                    Some(name) => {
                        MEDIA_PLAYLIST_TAGS.contains(&name)
                            || SEGMENT_TAGS.contains(&name)
                            || name == PART
                            || name == PRELOAD_HINT
                    }
                    None => true,
                };
                if starts_segments {
                    let segments = self.parse_segments(uri, &lines[i..], &mut tags)?;
                    return Ok(Playlist {
                        uri: uri.clone(),
                        playlist_type,
                        tags,
                        segments,
                    });
                }
            }

            if name.is_none() {
                log::warn!("Ignoring unexpected URI line in master playlist: {line}");
                i += 1;
                continue;
            }

            let mut tag = Tag::parse(self.next_id(), line)?;
            if MEDIA_PLAYLIST_TAGS.contains(&tag.name()) {
                return Err(ManifestError::InvalidPlaylistHierarchy(tag.name().to_string()));
            }

            if tag.name() == STREAM_INF {
                let uri_line = lines
                    .get(i + 1)
                    .filter(|next| tag_name(next).is_none() && !is_comment(next));
                match uri_line {
                    Some(next) => {
                        // the folded line still consumes an id
                        self.next_id();
                        tag.add_attribute(Attribute::new("URI", *next));
                        i += 1;
                    }
                    None => log::warn!("EXT-X-STREAM-INF without a playlist URI"),
                }
            }
            tags.push(tag);
            i += 1;
        }

        Ok(Playlist {
            uri: uri.clone(),
            playlist_type,
            tags,
            segments: Vec::new(),
        })
    }

    fn parse_segments(
        &mut self,
        uri: &Url,
        lines: &[&str],
        playlist_tags: &mut Vec<Tag>,
    ) -> ManifestResult<Vec<Segment>> {
        let mut segments = Vec::new();
        let mut segment_tags = Vec::new();
        let mut partial_segments = Vec::new();

        for line in lines {
            if is_comment(line) {
                continue;
            }

            if tag_name(line).is_some() {
                let mut tag = Tag::parse(self.next_id(), line)?;
                let name = tag.name();
                if MEDIA_PLAYLIST_TAGS.contains(&name) || COMMON_PLAYLIST_TAGS.contains(&name) {
                    playlist_tags.push(tag);
                } else if name == PART {
                    partial_segments.push(tag);
                } else if name == PRELOAD_HINT {
                    let hint_type = tag.attribute_value("TYPE").map(str::to_string);
                    match hint_type.as_deref() {
                        Some("PART") => partial_segments.push(tag),
                        Some("MAP") => {
                            tag.set_name("EXT-X-MAP");
                            segment_tags.push(tag);
                        }
                        other => log::debug!("Ignoring preload hint of type {other:?}"),
                    }
                } else {
                    segment_tags.push(tag);
                }
                continue;
            }

            let absolute_uri = match uri.join(line) {
                Ok(absolute_uri) => Some(absolute_uri),
                Err(e) => {
                    log::warn!("Failed to resolve segment uri {line}: {e}");
                    None
                }
            };
            segments.push(Segment {
                verbatim_uri: line.to_string(),
                absolute_uri,
                tags: std::mem::take(&mut segment_tags),
                partial_segments: std::mem::take(&mut partial_segments),
            });
        }

        if !partial_segments.is_empty() {
            segments.push(Segment {
                verbatim_uri: String::new(),
                absolute_uri: None,
                tags: segment_tags,
                partial_segments,
            });
        }
        Ok(segments)
    }
}

/// Parses a playlist with a fresh id counter.
pub fn parse_playlist(text: &str, uri: &Url) -> ManifestResult<Playlist> {
    PlaylistParser::new().parse(text, uri)
}
