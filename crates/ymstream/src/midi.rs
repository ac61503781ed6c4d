//! Incremental MIDI message assembly.
//!
//! Bytes arrive from the UART one at a time, so [`MidiParser::push`] never
//! waits for a full message; it returns one once the third byte is in. Only
//! note on/off are decoded.

/// Bytes in a channel voice message.
const MESSAGE_LENGTH: usize = 3;

/// A complete three-byte MIDI message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiMessage {
    NoteOn { channel: u8, note: u8, velocity: u8 },
    NoteOff { channel: u8, note: u8, velocity: u8 },
    /// Any other three-byte message.
    Unsupported { status: u8 },
}

/// Assembles messages from a MIDI byte stream.
#[derive(Debug, Clone, Default)]
pub struct MidiParser {
    partial: [u8; MESSAGE_LENGTH],
    len: usize,
}

impl MidiParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one byte, returning a message when it completes one.
    ///
    /// A status byte always starts a new message, dropping any partial one.
    /// Data bytes seen before any status byte are ignored.
    pub fn push(&mut self, byte: u8) -> Option<MidiMessage> {
        // Realtime bytes may be interleaved anywhere
        if byte >= 0xF8 {
            return None;
        }

        if byte & 0x80 != 0 {
            self.partial[0] = byte;
            self.len = 1;
            return None;
        }
        if self.len == 0 {
            return None;
        }

        self.partial[self.len] = byte;
        self.len += 1;
        if self.len < MESSAGE_LENGTH {
            return None;
        }

        self.len = 0;
        Some(Self::decode(self.partial))
    }

    /// Feed a run of bytes, collecting every completed message.
    pub fn push_all(&mut self, bytes: &[u8]) -> Vec<MidiMessage> {
        bytes.iter().filter_map(|&byte| self.push(byte)).collect()
    }

    fn decode(bytes: [u8; MESSAGE_LENGTH]) -> MidiMessage {
        let [status, note, velocity] = bytes;
        let channel = status & 0x0F;
        let note = note & 0x7F;
        let velocity = velocity & 0x7F;

        match status & 0xF0 {
            0x80 => MidiMessage::NoteOff {
                channel,
                note,
                velocity,
            },
            0x90 if velocity == 0 => MidiMessage::NoteOff {
                channel,
                note,
                velocity,
            },
            0x90 => MidiMessage::NoteOn {
                channel,
                note,
                velocity,
            },
            _ => MidiMessage::Unsupported { status },
        }
    }
}
