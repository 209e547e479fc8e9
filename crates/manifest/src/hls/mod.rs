//! HLS playlists.
//!
//! [parser] turns playlist text into tags and segments, [segments] turns a media playlist
//! into segment references.

pub mod parser;
pub mod segments;
pub mod tag;

pub use parser::{parse_playlist, Playlist, PlaylistParser, PlaylistType, Segment};
pub use segments::{create_references, MediaPlaylistTracker};
pub use tag::{Attribute, Tag};
