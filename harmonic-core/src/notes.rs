//! # Note Table
//!
//! The 88 keys of a standard piano (A0 to C8) in equal temperament with
//! A4 = 440 Hz. Captures are grouped per key index, and the key's frequency
//! is the reference the deviation math measures against.

use once_cell::sync::Lazy;
use std::collections::BTreeMap;

pub const KEY_COUNT: usize = 88;

/// Index of A4 in the table.
pub const A4_INDEX: u8 = 48;

#[derive(Debug, Clone, PartialEq)]
pub struct Note {
    pub index: u8,
    /// e.g. "A4", "C#3"
    pub name: String,
    pub frequency: f32,
}

impl Note {
    /// Ideal frequency of harmonic `harmonic` of this note.
    pub fn harmonic_frequency(&self, harmonic: u32) -> f32 {
        self.frequency * harmonic as f32
    }
}

static NOTES: Lazy<Vec<Note>> = Lazy::new(|| {
    const NOTE_NAMES: [&str; 12] = [
        "A", "A#", "B", "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#",
    ];
    (0..KEY_COUNT)
        .map(|i| {
            // f = 440 · 2^(n/12), n semitones away from A4.
            let frequency = 440.0 * 2.0_f32.powf((i as f32 - A4_INDEX as f32) / 12.0);
            // The octave number changes at C.
            let octave = (i + 9) / 12;
            Note {
                index: i as u8,
                name: format!("{}{}", NOTE_NAMES[i % 12], octave),
                frequency,
            }
        })
        .collect()
});

static NOTE_MAP: Lazy<BTreeMap<&'static str, u8>> = Lazy::new(|| {
    NOTES
        .iter()
        .map(|note| (note.name.as_str(), note.index))
        .collect()
});

pub fn note_by_index(index: u8) -> Option<&'static Note> {
    NOTES.get(index as usize)
}

pub fn note_by_name(name: &str) -> Option<&'static Note> {
    NOTE_MAP.get(name).and_then(|&index| note_by_index(index))
}

/// The key closest to `frequency`, measured in Hz.
pub fn nearest_note(frequency: f32) -> &'static Note {
    NOTES
        .iter()
        .min_by(|a, b| {
            (a.frequency - frequency)
                .abs()
                .total_cmp(&(b.frequency - frequency).abs())
        })
        .unwrap_or(&NOTES[A4_INDEX as usize])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_spans_a0_to_c8() {
        let a0 = note_by_index(0).unwrap();
        assert_eq!(a0.name, "A0");
        assert!((a0.frequency - 27.5).abs() < 1e-3);
        let c8 = note_by_index(87).unwrap();
        assert_eq!(c8.name, "C8");
        assert!(note_by_index(88).is_none());
    }

    #[test]
    fn name_lookup_round_trips_a4() {
        let a4 = note_by_name("A4").unwrap();
        assert_eq!(a4.index, A4_INDEX);
        assert_eq!(a4.frequency, 440.0);
        assert!(note_by_name("H2").is_none());
        assert_eq!(note_by_name("C4").unwrap().index, 39);
    }

    #[test]
    fn nearest_note_snaps() {
        assert_eq!(nearest_note(445.0).name, "A4");
        assert_eq!(nearest_note(221.0).name, "A3");
        assert!((note_by_name("A3").unwrap().harmonic_frequency(2) - 440.0).abs() < 1e-3);
    }
}
