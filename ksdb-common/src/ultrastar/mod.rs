//! UltraStar TXT codec
//!
//! An UltraStar file is a block of `#KEY:VALUE` headers followed by the
//! note body:
//!
//! ```text
//! #TITLE:Song
//! #ARTIST:Band
//! #MP3:song.mp3
//! #BPM:300
//! #GAP:1200
//! : 0 4 5 Hel
//! : 4 4 7 lo
//! - 10
//! * 12 8 9 world
//! E
//! ```

mod music;
mod parse;
mod write;

pub use music::{Music, Note, NoteType, Voice};
pub use parse::{decode_text, parse, ParseError, KNOWN_TAGS};
pub use write::write;

use std::collections::BTreeMap;

/// A song as described by an UltraStar TXT file
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TxtSong {
    pub title: String,
    pub artist: String,
    pub genre: String,
    pub edition: String,
    pub language: String,
    pub year: Option<i32>,
    pub creator: String,
    pub comment: String,
    /// Headers without a dedicated field, keyed by upper-case tag name
    pub extra: BTreeMap<String, String>,

    /// Audio file reference (`#AUDIO`, falling back to `#MP3`)
    pub audio: Option<String>,
    pub video: Option<String>,
    pub cover: Option<String>,
    pub background: Option<String>,

    pub bpm: f64,
    pub gap_ms: i64,
    pub video_gap_ms: i64,
    pub start_ms: i64,
    pub end_ms: Option<i64>,
    pub preview_start_ms: Option<i64>,
    pub medley_start_beat: Option<i64>,
    pub medley_end_beat: Option<i64>,
    /// `#CALCMEDLEY:OFF`
    pub no_auto_medley: bool,

    pub duet_singer_p1: Option<String>,
    pub duet_singer_p2: Option<String>,

    pub music: Music,
}
