//! UltraStar TXT parser

use std::fmt;

use super::music::{Music, Note, NoteType, Voice};
use super::TxtSong;

/// Parse failure with the 1-based line it occurred on (0 = whole file)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub line: usize,
    pub message: String,
}

impl ParseError {
    fn at(line: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.line == 0 {
            write!(f, "{}", self.message)
        } else {
            write!(f, "line {}: {}", self.line, self.message)
        }
    }
}

impl std::error::Error for ParseError {}

/// Header tags with a meaning of their own; anything else lands in `extra`
pub const KNOWN_TAGS: &[&str] = &[
    "TITLE",
    "ARTIST",
    "GENRE",
    "EDITION",
    "LANGUAGE",
    "CREATOR",
    "AUTHOR",
    "COMMENT",
    "YEAR",
    "MP3",
    "AUDIO",
    "VIDEO",
    "COVER",
    "BACKGROUND",
    "BPM",
    "GAP",
    "VIDEOGAP",
    "START",
    "END",
    "PREVIEWSTART",
    "MEDLEYSTARTBEAT",
    "MEDLEYENDBEAT",
    "CALCMEDLEY",
    "P1",
    "P2",
    "DUETSINGERP1",
    "DUETSINGERP2",
    "RELATIVE",
    "ENCODING",
    "VERSION",
];

/// Decode raw file bytes
///
/// UTF-8 (with or without BOM) is used when valid; anything else is read as
/// Latin-1, which is what legacy UltraStar files without `#ENCODING` use.
pub fn decode_text(bytes: &[u8]) -> String {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => bytes.iter().map(|&b| b as char).collect(),
    }
}

/// Parse an UltraStar TXT document
pub fn parse(input: &str) -> Result<TxtSong, ParseError> {
    let input = input.strip_prefix('\u{feff}').unwrap_or(input);
    let mut parser = Parser::default();

    for (idx, line) in input.lines().enumerate() {
        let line_no = idx + 1;
        if line.trim().is_empty() {
            continue;
        }
        if parser.finished {
            break;
        }
        if !parser.in_body && line.starts_with('#') {
            parser.header(line_no, &line[1..])?;
        } else {
            parser.in_body = true;
            parser.body(line_no, line.trim_start())?;
        }
    }

    parser.finish()
}

#[derive(Default)]
struct Parser {
    song: TxtSong,
    mp3: Option<String>,
    bpm_seen: bool,
    relative: bool,
    in_body: bool,
    finished: bool,
    voices: Vec<Voice>,
    /// Voice indexes that receive the following body lines
    targets: Vec<usize>,
    /// Beat offset accumulated in relative mode
    offset: i64,
}

impl Parser {
    fn header(&mut self, line_no: usize, rest: &str) -> Result<(), ParseError> {
        let Some((key, value)) = rest.split_once(':') else {
            return Err(ParseError::at(line_no, format!("header without value: #{}", rest)));
        };
        let key = key.trim().to_ascii_uppercase();
        let value = value.trim();
        let song = &mut self.song;

        match key.as_str() {
            "TITLE" => song.title = value.to_string(),
            "ARTIST" => song.artist = value.to_string(),
            "GENRE" => song.genre = value.to_string(),
            "EDITION" => song.edition = value.to_string(),
            "LANGUAGE" => song.language = value.to_string(),
            "CREATOR" | "AUTHOR" => song.creator = value.to_string(),
            "COMMENT" => song.comment = value.to_string(),
            "YEAR" => {
                song.year = Some(value.parse().map_err(|_| {
                    ParseError::at(line_no, format!("invalid #YEAR: {:?}", value))
                })?)
            }
            "MP3" => self.mp3 = non_empty(value),
            "AUDIO" => song.audio = non_empty(value),
            "VIDEO" => song.video = non_empty(value),
            "COVER" => song.cover = non_empty(value),
            "BACKGROUND" => song.background = non_empty(value),
            "BPM" => {
                let bpm = parse_float(line_no, "#BPM", value)?;
                if bpm <= 0.0 {
                    return Err(ParseError::at(line_no, "#BPM must be positive"));
                }
                song.bpm = bpm;
                self.bpm_seen = true;
            }
            "GAP" => song.gap_ms = parse_float(line_no, "#GAP", value)?.round() as i64,
            "VIDEOGAP" => song.video_gap_ms = seconds_to_ms(parse_float(line_no, "#VIDEOGAP", value)?),
            "START" => song.start_ms = seconds_to_ms(parse_float(line_no, "#START", value)?),
            "END" => song.end_ms = Some(parse_float(line_no, "#END", value)?.round() as i64),
            "PREVIEWSTART" => {
                song.preview_start_ms =
                    Some(seconds_to_ms(parse_float(line_no, "#PREVIEWSTART", value)?))
            }
            "MEDLEYSTARTBEAT" => song.medley_start_beat = Some(parse_int(line_no, value)?),
            "MEDLEYENDBEAT" => song.medley_end_beat = Some(parse_int(line_no, value)?),
            "CALCMEDLEY" => song.no_auto_medley = value.eq_ignore_ascii_case("off"),
            "P1" | "DUETSINGERP1" => song.duet_singer_p1 = non_empty(value),
            "P2" | "DUETSINGERP2" => song.duet_singer_p2 = non_empty(value),
            "RELATIVE" => self.relative = value.eq_ignore_ascii_case("yes"),
            // Decoding happens before parsing; the format version does not
            // change how the supported tags are read.
            "ENCODING" | "VERSION" => {}
            _ => {
                song.extra.insert(key, value.to_string());
            }
        }
        Ok(())
    }

    fn body(&mut self, line_no: usize, line: &str) -> Result<(), ParseError> {
        if self.voices.is_empty() {
            self.voices.push(Voice::default());
            self.targets = vec![0];
        }

        let mut chars = line.chars();
        let marker = chars.next().unwrap_or(' ');
        let rest = chars.as_str();

        match marker {
            'E' => self.finished = true,
            'P' => self.switch_voice(line_no, rest)?,
            '-' => self.line_break(line_no, rest)?,
            _ => match NoteType::from_marker(marker) {
                Some(note_type) => self.note(line_no, note_type, rest)?,
                None => {
                    return Err(ParseError::at(
                        line_no,
                        format!("unexpected line: {:?}", line),
                    ))
                }
            },
        }
        Ok(())
    }

    fn switch_voice(&mut self, line_no: usize, rest: &str) -> Result<(), ParseError> {
        let player = rest.trim();
        self.targets = match player {
            "1" => vec![0],
            "2" => vec![1],
            "3" => vec![0, 1],
            _ => return Err(ParseError::at(line_no, format!("unknown player: P{}", player))),
        };
        while self.voices.len() < 2 {
            self.voices.push(Voice::default());
        }
        self.offset = 0;
        Ok(())
    }

    fn line_break(&mut self, line_no: usize, rest: &str) -> Result<(), ParseError> {
        let mut fields = rest.split_whitespace();
        let first = fields
            .next()
            .ok_or_else(|| ParseError::at(line_no, "line break without beat"))?;
        let first = parse_int(line_no, first)?;
        let second = fields.next().map(|f| parse_int(line_no, f)).transpose()?;

        let beat = offset_beat(line_no, self.offset, first)?;
        for &t in &self.targets {
            self.voices[t].line_breaks.push(beat);
        }
        if self.relative {
            self.offset = offset_beat(line_no, self.offset, second.unwrap_or(first))?;
        }
        Ok(())
    }

    fn note(&mut self, line_no: usize, note_type: NoteType, rest: &str) -> Result<(), ParseError> {
        let (start, rest) = take_field(rest)
            .ok_or_else(|| ParseError::at(line_no, "note without start beat"))?;
        let (duration, rest) = take_field(rest)
            .ok_or_else(|| ParseError::at(line_no, "note without duration"))?;
        let (pitch, text) = take_field(rest)
            .ok_or_else(|| ParseError::at(line_no, "note without pitch"))?;

        let duration = parse_int(line_no, duration)?;
        if duration < 0 {
            return Err(ParseError::at(line_no, "note duration must not be negative"));
        }

        let note = Note {
            note_type,
            start: offset_beat(line_no, self.offset, parse_int(line_no, start)?)?,
            duration,
            pitch: parse_int(line_no, pitch)?,
            text: text.to_string(),
        };
        for &t in &self.targets {
            self.voices[t].notes.push(note.clone());
        }
        Ok(())
    }

    fn finish(mut self) -> Result<TxtSong, ParseError> {
        if !self.bpm_seen {
            return Err(ParseError::at(0, "missing #BPM header"));
        }
        let music = Music {
            voices: std::mem::take(&mut self.voices),
        };
        if music.note_count() == 0 {
            return Err(ParseError::at(0, "song has no notes"));
        }

        let mut song = self.song;
        if song.audio.is_none() {
            song.audio = self.mp3;
        }
        song.music = music;
        Ok(song)
    }
}

/// Split off one whitespace-delimited field
///
/// The returned remainder starts right after the single separator following
/// the field, so note text keeps its leading space.
fn take_field(s: &str) -> Option<(&str, &str)> {
    let s = s.trim_start();
    if s.is_empty() {
        return None;
    }
    match s.find(char::is_whitespace) {
        Some(end) => {
            let sep_len = s[end..].chars().next().map(char::len_utf8).unwrap_or(1);
            Some((&s[..end], &s[end + sep_len..]))
        }
        None => Some((s, "")),
    }
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

fn parse_int(line_no: usize, value: &str) -> Result<i64, ParseError> {
    value
        .trim()
        .parse()
        .map_err(|_| ParseError::at(line_no, format!("invalid number: {:?}", value)))
}

fn offset_beat(line_no: usize, offset: i64, beat: i64) -> Result<i64, ParseError> {
    offset
        .checked_add(beat)
        .ok_or_else(|| ParseError::at(line_no, "beat out of range"))
}

/// Parse a finite decimal that may use a comma as separator
fn parse_float(line_no: usize, tag: &str, value: &str) -> Result<f64, ParseError> {
    value
        .trim()
        .replace(',', ".")
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| ParseError::at(line_no, format!("invalid {}: {:?}", tag, value)))
}

fn seconds_to_ms(seconds: f64) -> i64 {
    (seconds * 1000.0).round() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIMPLE: &str = "#TITLE:Hello\n\
        #ARTIST:World\n\
        #MP3:hello.mp3\n\
        #COVER:hello [CO].jpg\n\
        #BPM:312,5\n\
        #GAP:1200\n\
        #VIDEOGAP:1,5\n\
        #MYTAG:custom\n\
        : 0 4 5 Hel\n\
        : 4 4 7 lo\n\
        - 10\n\
        * 12 8 9  world\n\
        F 22 2 0 ~\n\
        E\n\
        this is ignored\n";

    #[test]
    fn test_parse_headers() {
        let song = parse(SIMPLE).unwrap();
        assert_eq!(song.title, "Hello");
        assert_eq!(song.artist, "World");
        assert_eq!(song.audio.as_deref(), Some("hello.mp3"));
        assert_eq!(song.cover.as_deref(), Some("hello [CO].jpg"));
        assert_eq!(song.bpm, 312.5);
        assert_eq!(song.gap_ms, 1200);
        assert_eq!(song.video_gap_ms, 1500);
        assert_eq!(song.extra.get("MYTAG").map(String::as_str), Some("custom"));
    }

    #[test]
    fn test_parse_notes() {
        let song = parse(SIMPLE).unwrap();
        assert_eq!(song.music.voices.len(), 1);
        let voice = &song.music.voices[0];
        assert_eq!(voice.notes.len(), 4);
        assert_eq!(voice.line_breaks, vec![10]);
        assert_eq!(voice.notes[2].note_type, NoteType::Golden);
        assert_eq!(voice.notes[2].text, " world");
        assert_eq!(voice.notes[3].note_type, NoteType::Freestyle);
        assert_eq!(voice.notes[3].text, "~");
    }

    #[test]
    fn test_audio_overrides_mp3() {
        let song = parse("#MP3:a.mp3\n#AUDIO:b.ogg\n#BPM:100\n: 0 1 0 a\nE\n").unwrap();
        assert_eq!(song.audio.as_deref(), Some("b.ogg"));
    }

    #[test]
    fn test_duet() {
        let song = parse(
            "#P1:Alice\n#P2:Bob\n#BPM:100\nP1\n: 0 1 0 a\n- 2\nP2\n: 5 1 0 b\nP3\n: 9 1 0 c\nE\n",
        )
        .unwrap();
        assert!(song.music.is_duet());
        assert_eq!(song.duet_singer_p1.as_deref(), Some("Alice"));
        assert_eq!(song.music.voices[0].notes.len(), 2);
        assert_eq!(song.music.voices[1].notes.len(), 2);
        assert_eq!(song.music.voices[0].line_breaks, vec![2]);
        assert!(song.music.voices[1].line_breaks.is_empty());
    }

    #[test]
    fn test_relative_mode() {
        let song = parse("#RELATIVE:yes\n#BPM:100\n: 0 2 0 a\n- 4 6\n: 0 2 0 b\n- 3\n: 1 2 0 c\nE\n")
            .unwrap();
        let voice = &song.music.voices[0];
        let starts: Vec<i64> = voice.notes.iter().map(|n| n.start).collect();
        assert_eq!(starts, vec![0, 6, 10]);
        assert_eq!(voice.line_breaks, vec![4, 9]);
    }

    #[test]
    fn test_missing_bpm() {
        let err = parse("#TITLE:x\n: 0 1 0 a\nE\n").unwrap_err();
        assert_eq!(err.line, 0);
        assert!(err.message.contains("BPM"));
    }

    #[test]
    fn test_no_notes() {
        let err = parse("#TITLE:x\n#BPM:100\nE\n").unwrap_err();
        assert!(err.message.contains("no notes"));
    }

    #[test]
    fn test_error_reports_line() {
        let err = parse("#BPM:100\n: 0 1 0 a\n: x 1 0 b\n").unwrap_err();
        assert_eq!(err.line, 3);
        assert_eq!(err.to_string(), "line 3: invalid number: \"x\"");
    }

    #[test]
    fn test_non_finite_numbers_rejected() {
        for header in ["#BPM:NaN", "#BPM:inf", "#BPM:-infinity"] {
            let err = parse(&format!("#TITLE:x\n{}\n: 0 1 0 a\nE\n", header)).unwrap_err();
            assert_eq!(err.line, 2, "{}", header);
            assert!(err.message.contains("#BPM"), "{}", header);
        }
        for header in ["#GAP:inf", "#END:NaN", "#VIDEOGAP:inf", "#START:NaN", "#PREVIEWSTART:-inf"] {
            let err = parse(&format!("#BPM:100\n{}\n: 0 1 0 a\nE\n", header)).unwrap_err();
            assert_eq!(err.line, 2, "{}", header);
        }
    }

    #[test]
    fn test_beat_overflow_rejected() {
        let err = parse("#RELATIVE:yes\n#BPM:100\n: 0 1 0 a\n- 1 9223372036854775807\n: 1 1 0 b\nE\n")
            .unwrap_err();
        assert_eq!(err.line, 5);
        assert_eq!(err.message, "beat out of range");

        let err = parse("#RELATIVE:yes\n#BPM:100\n: 0 1 0 a\n- 9223372036854775807\n- 1\nE\n")
            .unwrap_err();
        assert_eq!(err.line, 5);
    }

    #[test]
    fn test_known_tags_do_not_land_in_extra() {
        let headers: String = KNOWN_TAGS
            .iter()
            .filter(|t| !matches!(**t, "RELATIVE" | "YEAR"))
            .map(|t| format!("#{}:1\n", t))
            .collect();
        let song = parse(&format!("{}: 0 1 0 a\nE\n", headers)).unwrap();
        assert!(song.extra.is_empty(), "{:?}", song.extra);
    }

    #[test]
    fn test_unexpected_line() {
        let err = parse("#BPM:100\n: 0 1 0 a\nnonsense\n").unwrap_err();
        assert_eq!(err.line, 3);
    }

    #[test]
    fn test_decode_latin1() {
        let text = decode_text(b"#TITLE:Caf\xe9\n");
        assert_eq!(text, "#TITLE:Caf\u{e9}\n");
        assert_eq!(decode_text(b"\xEF\xBB\xBF#BPM:1"), "#BPM:1");
    }

    #[test]
    fn test_take_field_keeps_text_spacing() {
        assert_eq!(take_field("12 4 5  lo"), Some(("12", "4 5  lo")));
        assert_eq!(take_field(" 5  lo"), Some(("5", " lo")));
        assert_eq!(take_field("5"), Some(("5", "")));
        assert_eq!(take_field("   "), None);
    }
}
