//! FM voices played directly from MIDI notes.
//!
//! The VGM filter hands masked-out channels to this driver. A note sets the
//! channel's block/F-number and keys all four operators; a note off only
//! releases the channel if it is still sounding that same note.

use super::{
    FM_CHANNEL_COUNT, FM_CHANNEL_SLOTS, FmChannels, KEY_ON_REGISTER, RegisterWriter,
    fm_register_base,
};

/// F-numbers for C through B at an 8 MHz master clock.
const PITCH_TABLE: [u16; 12] = [
    // C, C#, D, D#
    617, 654, 693, 734, //
    // E, F, F#, G
    778, 824, 873, 925, //
    // G#, A, A#, B
    980, 1038, 1100, 1165,
];

/// Highest block the 3-bit field can hold.
const MAX_BLOCK: u8 = 7;

const fn build_note_table() -> [u8; 128] {
    let mut table = [0u8; 128];
    let mut i = 0;
    while i < 128 {
        table[i] = (i % 12) as u8;
        i += 1;
    }
    table
}

const fn build_octave_table() -> [u8; 128] {
    let mut table = [0u8; 128];
    let mut i = 0;
    while i < 128 {
        let octave = (i / 12) as u8;
        table[i] = if octave > MAX_BLOCK { MAX_BLOCK } else { octave };
        i += 1;
    }
    table
}

/// Semitone within the octave for each MIDI note.
const NOTE_TABLE: [u8; 128] = build_note_table();
/// Block (octave) for each MIDI note, clamped to the register field.
const OCTAVE_TABLE: [u8; 128] = build_octave_table();

/// Operators keyed by a note on.
const OPERATOR_MASK: u8 = 0x0F;

/// Per-channel note tracking for MIDI-driven FM voices.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FmVoices {
    channel_notes: [Option<u8>; FM_CHANNEL_COUNT],
}

impl FmVoices {
    pub fn new() -> Self {
        Self::default()
    }

    /// Note currently sounding on zero-based `channel`.
    pub fn sounding_note(&self, channel: usize) -> Option<u8> {
        self.channel_notes.get(channel).copied().flatten()
    }

    /// Key every channel in `mask` on or off with `note`.
    pub fn key_mask<W: RegisterWriter>(
        &mut self,
        mask: FmChannels,
        on: bool,
        note: u8,
        out: &mut W,
    ) {
        for channel in mask.channels() {
            self.key(channel, on, note, out);
        }
    }

    /// Key zero-based `channel` on or off with MIDI `note`.
    pub fn key<W: RegisterWriter>(&mut self, channel: usize, on: bool, note: u8, out: &mut W) {
        if channel >= FM_CHANNEL_COUNT {
            return;
        }
        let note = note & 0x7F;

        // Releasing a different note than the one sounding would cut it off
        if !on && self.channel_notes[channel] != Some(note) {
            return;
        }

        if on {
            set_pitch(channel, note, out);
            self.channel_notes[channel] = Some(note);
        } else {
            self.channel_notes[channel] = None;
        }

        // Key-on/off after any pitch config
        let operators = if on { OPERATOR_MASK } else { 0 };
        out.write_register(KEY_ON_REGISTER, operators << 4 | FM_CHANNEL_SLOTS[channel]);
    }

    /// Key off every channel in `mask` regardless of the sounding note.
    pub fn mute<W: RegisterWriter>(&mut self, mask: FmChannels, out: &mut W) {
        for channel in mask.channels() {
            self.channel_notes[channel] = None;
            key_off(channel, out);
        }
    }
}

/// Release all operators of zero-based `channel`.
pub fn key_off<W: RegisterWriter>(channel: usize, out: &mut W) {
    if let Some(&slot) = FM_CHANNEL_SLOTS.get(channel) {
        out.write_register(KEY_ON_REGISTER, slot);
    }
}

fn set_pitch<W: RegisterWriter>(channel: usize, note: u8, out: &mut W) {
    let octave = OCTAVE_TABLE[note as usize];
    let pitch = PITCH_TABLE[NOTE_TABLE[note as usize] as usize];
    let base = fm_register_base(channel);

    // 0xA4 latches on the following 0xA0 write so it goes first
    out.write_register(base + 0xA4, (pitch >> 8) as u8 | octave << 3);
    out.write_register(base + 0xA0, (pitch & 0xFF) as u8);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_note_on_writes_pitch_then_key() {
        let mut voices = FmVoices::new();
        let mut out: Vec<(u16, u8)> = Vec::new();

        // Middle C: semitone 0, octave 5
        voices.key(2, true, 60, &mut out);

        assert_eq!(
            out,
            vec![(0x0A6, 0x02 | 5 << 3), (0x0A2, 0x69), (0x028, 0xF2)]
        );
        assert_eq!(voices.sounding_note(2), Some(60));
    }

    #[test]
    fn test_upper_channels_use_port_1() {
        let mut voices = FmVoices::new();
        let mut out: Vec<(u16, u8)> = Vec::new();

        // A4 (note 69): F-number 1038, octave 5
        voices.key(3, true, 69, &mut out);

        assert_eq!(
            out,
            vec![(0x1A4, 0x04 | 5 << 3), (0x1A0, 0x0E), (0x028, 0xF4)]
        );
    }

    #[test]
    fn test_note_off_requires_matching_note() {
        let mut voices = FmVoices::new();
        let mut out: Vec<(u16, u8)> = Vec::new();
        voices.key(0, true, 64, &mut out);
        out.clear();

        voices.key(0, false, 65, &mut out);
        assert!(out.is_empty());
        assert_eq!(voices.sounding_note(0), Some(64));

        voices.key(0, false, 64, &mut out);
        assert_eq!(out, vec![(0x028, 0x00)]);
        assert_eq!(voices.sounding_note(0), None);
    }

    #[test]
    fn test_high_notes_clamp_block() {
        assert_eq!(OCTAVE_TABLE[127], MAX_BLOCK);
        assert_eq!(NOTE_TABLE[127], 7);
    }

    #[test]
    fn test_mute_mask() {
        let mut voices = FmVoices::new();
        let mut out: Vec<(u16, u8)> = Vec::new();
        voices.key_mask(FmChannels::CH1 | FmChannels::CH6, true, 48, &mut out);
        out.clear();

        voices.mute(FmChannels::CH6, &mut out);
        assert_eq!(out, vec![(0x028, 0x06)]);
        assert_eq!(voices.sounding_note(5), None);
        assert_eq!(voices.sounding_note(0), Some(48));
    }
}
