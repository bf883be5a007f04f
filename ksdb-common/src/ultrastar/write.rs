//! UltraStar TXT writer

use std::fmt::Write as _;

use super::music::Voice;
use super::TxtSong;

/// Serialize a song into UltraStar TXT
pub fn write(song: &TxtSong) -> String {
    let mut out = String::new();

    header(&mut out, "TITLE", &song.title);
    header(&mut out, "ARTIST", &song.artist);
    header(&mut out, "GENRE", &song.genre);
    header(&mut out, "EDITION", &song.edition);
    header(&mut out, "LANGUAGE", &song.language);
    if let Some(year) = song.year {
        header(&mut out, "YEAR", &year.to_string());
    }
    header(&mut out, "CREATOR", &song.creator);
    header(&mut out, "COMMENT", &song.comment);

    if let Some(audio) = &song.audio {
        header(&mut out, "MP3", audio);
    }
    if let Some(cover) = &song.cover {
        header(&mut out, "COVER", cover);
    }
    if let Some(background) = &song.background {
        header(&mut out, "BACKGROUND", background);
    }
    if let Some(video) = &song.video {
        header(&mut out, "VIDEO", video);
    }
    if song.video_gap_ms != 0 {
        header(&mut out, "VIDEOGAP", &ms_to_seconds(song.video_gap_ms));
    }

    header(&mut out, "BPM", &song.bpm.to_string());
    header(&mut out, "GAP", &song.gap_ms.to_string());
    if song.start_ms != 0 {
        header(&mut out, "START", &ms_to_seconds(song.start_ms));
    }
    if let Some(end) = song.end_ms {
        header(&mut out, "END", &end.to_string());
    }
    if let Some(preview) = song.preview_start_ms {
        header(&mut out, "PREVIEWSTART", &ms_to_seconds(preview));
    }
    if let Some(beat) = song.medley_start_beat {
        header(&mut out, "MEDLEYSTARTBEAT", &beat.to_string());
    }
    if let Some(beat) = song.medley_end_beat {
        header(&mut out, "MEDLEYENDBEAT", &beat.to_string());
    }
    if song.no_auto_medley {
        header(&mut out, "CALCMEDLEY", "OFF");
    }
    if let Some(p1) = &song.duet_singer_p1 {
        header(&mut out, "P1", p1);
    }
    if let Some(p2) = &song.duet_singer_p2 {
        header(&mut out, "P2", p2);
    }
    // Unknown tags are kept even when empty so they survive a round trip.
    for (key, value) in &song.extra {
        let _ = writeln!(out, "#{}:{}", key, single_line(value));
    }

    let duet = song.music.is_duet();
    for (idx, voice) in song.music.voices.iter().enumerate() {
        if duet {
            let _ = writeln!(out, "P{}", idx + 1);
        }
        write_voice(&mut out, voice);
    }
    out.push_str("E\n");
    out
}

fn header(out: &mut String, key: &str, value: &str) {
    if !value.is_empty() {
        let _ = writeln!(out, "#{}:{}", key, single_line(value));
    }
}

/// A header value with line breaks flattened so it cannot start a new line
fn single_line(value: &str) -> std::borrow::Cow<'_, str> {
    if value.contains(['\r', '\n']) {
        value.replace(['\r', '\n'], " ").into()
    } else {
        value.into()
    }
}

/// Notes in beat order with each line break placed before the first note
/// that starts at or after it; breaks after the last note close the voice
fn write_voice(out: &mut String, voice: &Voice) {
    let mut breaks = voice.line_breaks.clone();
    breaks.sort_unstable();
    let mut breaks = breaks.into_iter().peekable();

    let mut notes: Vec<_> = voice.notes.iter().collect();
    notes.sort_by_key(|n| n.start);

    for note in notes {
        while let Some(beat) = breaks.next_if(|b| *b <= note.start) {
            let _ = writeln!(out, "- {}", beat);
        }
        let _ = writeln!(
            out,
            "{} {} {} {} {}",
            note.note_type.marker(),
            note.start,
            note.duration,
            note.pitch,
            note.text
        );
    }
    for beat in breaks {
        let _ = writeln!(out, "- {}", beat);
    }
}

fn ms_to_seconds(ms: i64) -> String {
    (ms as f64 / 1000.0).to_string()
}
