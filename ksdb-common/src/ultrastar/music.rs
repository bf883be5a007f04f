//! Note data embedded in songs

use serde::{Deserialize, Serialize};

/// Kind of a sung note
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoteType {
    Normal,
    Golden,
    Freestyle,
    Rap,
    GoldenRap,
}

impl NoteType {
    /// Map a body line marker to a note type
    pub fn from_marker(marker: char) -> Option<Self> {
        match marker {
            ':' => Some(Self::Normal),
            '*' => Some(Self::Golden),
            'F' => Some(Self::Freestyle),
            'R' => Some(Self::Rap),
            'G' => Some(Self::GoldenRap),
            _ => None,
        }
    }

    pub fn marker(self) -> char {
        match self {
            Self::Normal => ':',
            Self::Golden => '*',
            Self::Freestyle => 'F',
            Self::Rap => 'R',
            Self::GoldenRap => 'G',
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    #[serde(rename = "type")]
    pub note_type: NoteType,
    /// Start beat (absolute)
    pub start: i64,
    /// Length in beats
    pub duration: i64,
    pub pitch: i64,
    /// Syllable; a leading space marks a word boundary
    pub text: String,
}

/// Notes and line breaks sung by one player
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Voice {
    pub notes: Vec<Note>,
    /// Beats at which a new lyrics line starts
    pub line_breaks: Vec<i64>,
}

/// All voices of a song; two voices make a duet
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Music {
    pub voices: Vec<Voice>,
}

impl Music {
    pub fn is_duet(&self) -> bool {
        self.voices.len() > 1
    }

    pub fn note_count(&self) -> usize {
        self.voices.iter().map(|v| v.notes.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note(start: i64, duration: i64, text: &str) -> Note {
        Note {
            note_type: NoteType::Normal,
            start,
            duration,
            pitch: 0,
            text: text.to_string(),
        }
    }

    #[test]
    fn test_marker_mapping() {
        for t in [
            NoteType::Normal,
            NoteType::Golden,
            NoteType::Freestyle,
            NoteType::Rap,
            NoteType::GoldenRap,
        ] {
            assert_eq!(NoteType::from_marker(t.marker()), Some(t));
        }
        assert_eq!(NoteType::from_marker('-'), None);
    }

    #[test]
    fn test_music_counts() {
        let music = Music {
            voices: vec![
                Voice {
                    notes: vec![note(0, 4, "a")],
                    line_breaks: vec![],
                },
                Voice {
                    notes: vec![note(4, 8, "b"), note(20, 1, "c")],
                    line_breaks: vec![],
                },
            ],
        };
        assert!(music.is_duet());
        assert_eq!(music.note_count(), 3);
    }
}
