//! Test Helper Utilities
//!
//! Shared utilities for the ksdb integration tests

#![allow(dead_code)]

pub mod app;
pub mod audio_generator;

pub use app::{body_bytes, body_json, body_text, request, TestApp};
pub use audio_generator::{png_bytes, wav_bytes};

/// A minimal valid UltraStar song referencing `song.mp3`
pub const SONG_TXT: &str = "\
#TITLE:Test Song
#ARTIST:Test Artist
#LANGUAGE:English
#YEAR:2004
#MP3:song.mp3
#BPM:280
#GAP:1500
#X-CUSTOM:kept
: 0 4 5 Hel
: 4 4 7 lo
- 10
* 12 8 9  world
E
";
