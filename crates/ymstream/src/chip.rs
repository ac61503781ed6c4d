//! YM2610/YM2610B register map helpers.
//!
//! Addresses in this module are 9-bit: bit 8 selects the port (port 0:
//! 0x000-0x0FF, port 1: 0x100-0x1FF), matching the layout the VGM `0x58`
//! and `0x59` commands write to.
//!
//! - [`filter`] gates VGM writes by the live mute/solo state.
//! - [`fm`] drives FM voices directly from MIDI notes.
//! - [`pcm`] holds the ADPCM/SSG mute sequences.
//!
//! Direct writes from those helpers go through a [`ChipWriteQueue`] so they
//! reach the chip only as fast as it reports ready.
use std::collections::VecDeque;

use bitflags::bitflags;

use crate::hw::{ChipSink, Port};

pub mod filter;
pub mod fm;
pub mod pcm;

pub use filter::{ChannelFilter, DenyReason, FilterDecision};
pub use fm::FmVoices;

/// Number of FM channels on the YM2610B.
pub const FM_CHANNEL_COUNT: usize = 6;

/// Key-on register slot code for each FM channel. Codes 3 and 7 are unused,
/// so channels 4-6 sit at 4-6.
pub const FM_CHANNEL_SLOTS: [u8; FM_CHANNEL_COUNT] = [0, 1, 2, 4, 5, 6];

/// FM key on/off (port 0 only).
pub const KEY_ON_REGISTER: u16 = 0x028;
/// SSG mixer / tone enable.
pub const SSG_MIXER_REGISTER: u16 = 0x007;
/// ADPCM-B start/repeat/reset control.
pub const ADPCM_B_CONTROL_REGISTER: u16 = 0x010;
/// ADPCM-A key on / dump.
pub const ADPCM_A_KEY_REGISTER: u16 = 0x100;
/// ADPCM-A total level (attenuation).
pub const ADPCM_A_ATL_REGISTER: u16 = 0x101;

bitflags! {
    /// Set of FM channels, bit `n` for channel `n + 1`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct FmChannels: u8 {
        const CH1 = 1 << 0;
        const CH2 = 1 << 1;
        const CH3 = 1 << 2;
        const CH4 = 1 << 3;
        const CH5 = 1 << 4;
        const CH6 = 1 << 5;
    }
}

impl FmChannels {
    /// The single channel with zero-based index `channel`.
    pub fn channel(channel: usize) -> Self {
        if channel < FM_CHANNEL_COUNT {
            Self::from_bits_truncate(1 << channel)
        } else {
            Self::empty()
        }
    }

    /// Whether zero-based channel `channel` is in the set.
    pub fn has_channel(self, channel: usize) -> bool {
        !Self::channel(channel).is_empty() && self.contains(Self::channel(channel))
    }

    /// Zero-based channel indexes in the set, lowest first.
    pub fn channels(self) -> impl Iterator<Item = usize> {
        (0..FM_CHANNEL_COUNT).filter(move |&ch| self.has_channel(ch))
    }
}

/// Zero-based FM channel for a key-on slot code.
pub fn slot_to_channel(slot: u8) -> Option<usize> {
    FM_CHANNEL_SLOTS.iter().position(|&s| s == slot)
}

/// Zero-based FM channel whose pitch `address` sets, if it is a pitch
/// register.
///
/// - 0xA0-0xA2: F-number low 8 bits (per port)
/// - 0xA4-0xA6: block + F-number high 3 bits (per port)
/// - 0xA8-0xAA, 0xAC-0xAE: channel 3 per-operator frequencies (port 0)
pub fn fm_pitch_channel(address: u16) -> Option<usize> {
    let port = ((address >> 8) & 1) as u8;
    let register = (address & 0xFF) as u8;
    match register {
        0xA0..=0xA2 | 0xA4..=0xA6 => slot_to_channel(port << 2 | (register & 0x03)),
        0xA8..=0xAA | 0xAC..=0xAE if port == 0 => Some(2),
        _ => None,
    }
}

/// Base address of the per-channel registers for zero-based FM `channel`.
pub(crate) fn fm_register_base(channel: usize) -> u16 {
    let slot = FM_CHANNEL_SLOTS[channel % FM_CHANNEL_COUNT] as u16;
    (if slot >= 4 { 0x100 } else { 0x000 }) + (slot & 0x03)
}

/// Sink for direct register writes made outside VGM playback.
pub trait RegisterWriter {
    /// Queue `data` for the 9-bit register `address`.
    fn write_register(&mut self, address: u16, data: u8);
}

impl RegisterWriter for Vec<(u16, u8)> {
    fn write_register(&mut self, address: u16, data: u8) {
        self.push((address, data));
    }
}

/// FIFO of direct register writes waiting for the chip to become ready.
#[derive(Debug, Clone, Default)]
pub struct ChipWriteQueue {
    writes: VecDeque<(u16, u8)>,
}

impl ChipWriteQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn clear(&mut self) {
        self.writes.clear();
    }

    /// Write queued entries to `sink` while it reports ready.
    ///
    /// Returns `true` once the queue is empty.
    pub fn flush<C: ChipSink>(&mut self, sink: &mut C) -> bool {
        while let Some(&(address, data)) = self.writes.front() {
            if !sink.ready() {
                return false;
            }
            sink.write(Port::from_address(address), address as u8, data);
            self.writes.pop_front();
        }
        true
    }
}

impl RegisterWriter for ChipWriteQueue {
    fn write_register(&mut self, address: u16, data: u8) {
        self.writes.push_back((address & 0x1FF, data));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::RecordingChip;

    #[test]
    fn test_slot_table_is_non_contiguous() {
        assert_eq!(slot_to_channel(2), Some(2));
        assert_eq!(slot_to_channel(3), None);
        assert_eq!(slot_to_channel(4), Some(3));
        assert_eq!(slot_to_channel(6), Some(5));
        assert_eq!(slot_to_channel(7), None);
    }

    #[test]
    fn test_fm_pitch_channel() {
        assert_eq!(fm_pitch_channel(0x0A0), Some(0));
        assert_eq!(fm_pitch_channel(0x0A6), Some(2));
        assert_eq!(fm_pitch_channel(0x1A4), Some(3));
        assert_eq!(fm_pitch_channel(0x1A2), Some(5));
        assert_eq!(fm_pitch_channel(0x0A3), None);
        assert_eq!(fm_pitch_channel(0x0AD), Some(2));
        assert_eq!(fm_pitch_channel(0x1AD), None);
        assert_eq!(fm_pitch_channel(0x028), None);
    }

    #[test]
    fn test_fm_register_base() {
        assert_eq!(fm_register_base(0), 0x000);
        assert_eq!(fm_register_base(2), 0x002);
        assert_eq!(fm_register_base(3), 0x100);
        assert_eq!(fm_register_base(5), 0x102);
    }

    #[test]
    fn test_fm_channels_iteration() {
        let mask = FmChannels::CH2 | FmChannels::CH5;
        assert_eq!(mask.channels().collect::<Vec<_>>(), vec![1, 4]);
        assert!(FmChannels::all().has_channel(5));
        assert!(!FmChannels::all().has_channel(6));
    }

    #[test]
    fn test_queue_waits_for_ready_sink() {
        let mut queue = ChipWriteQueue::new();
        queue.write_register(0x028, 0x01);
        queue.write_register(0x101, 0x3F);

        let mut chip = RecordingChip::new();
        chip.set_busy(true);
        assert!(!queue.flush(&mut chip));
        assert_eq!(queue.len(), 2);

        chip.set_busy(false);
        assert!(queue.flush(&mut chip));
        assert_eq!(
            chip.writes(),
            &[(Port::A, 0x28, 0x01), (Port::B, 0x01, 0x3F)]
        );
    }
}
