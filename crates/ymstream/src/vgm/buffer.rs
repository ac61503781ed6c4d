//! On-device VGM window.
//!
//! The first 0x12000 bytes of the stream (header included) are uploaded once
//! and played straight through. Everything after that is played out of three
//! 0x2000-byte regions the host keeps refilled:
//!
//! ```text
//! 0x00000 ┌──────────────────────┐
//!         │ linear (header+data) │ never refilled
//! 0x12000 ├──────────────────────┤
//!         │ loop                 │ filled once when the loop point is reached
//! 0x14000 ├──────────────────────┤
//!         │ A                    │ ┐
//! 0x16000 ├──────────────────────┤ │ alternating, refilled on exit
//!         │ B                    │ ┘
//! 0x18000 └──────────────────────┘
//! ```
use crate::error::ProtocolError;

/// Total bytes of VGM buffer memory.
pub const VGM_BUFFER_SIZE: usize = 0x18000;

/// Bytes in each of the loop, A and B regions.
pub const REGION_SIZE: usize = 0x2000;

/// End of the linear area, and the stream offset the windowed part of the
/// stream starts at.
pub const LINEAR_END: usize = 0x12000;

/// A fixed sub-range of the VGM buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Region {
    Linear,
    Loop,
    A,
    B,
}

impl Region {
    pub fn start(self) -> usize {
        match self {
            Region::Linear => 0x0,
            Region::Loop => LINEAR_END,
            Region::A => LINEAR_END + REGION_SIZE,
            Region::B => LINEAR_END + 2 * REGION_SIZE,
        }
    }

    /// One past the last byte of the region.
    pub fn end(self) -> usize {
        match self {
            Region::Linear => LINEAR_END,
            other => other.start() + REGION_SIZE,
        }
    }

    /// Region the read cursor moves into when it leaves this one.
    pub fn next(self) -> Region {
        match self {
            Region::Linear | Region::Loop | Region::B => Region::A,
            Region::A => Region::B,
        }
    }

    /// Whether leaving this region hands it back to the host for a refill.
    pub fn refilled_on_exit(self) -> bool {
        matches!(self, Region::A | Region::B)
    }

    /// Region holding buffer offset `offset`.
    pub fn containing(offset: usize) -> Option<Region> {
        [Region::Linear, Region::Loop, Region::A, Region::B]
            .into_iter()
            .find(|region| (region.start()..region.end()).contains(&offset))
    }
}

/// Fixed-size memory the player reads commands from.
#[derive(Debug, Clone)]
pub struct VgmBuffer {
    data: Box<[u8]>,
}

impl VgmBuffer {
    pub fn new() -> Self {
        Self {
            data: vec![0u8; VGM_BUFFER_SIZE].into_boxed_slice(),
        }
    }

    /// Copy `data` into the buffer at `offset`.
    ///
    /// Writes that would run past the end of the buffer are rejected whole.
    pub fn write(&mut self, offset: usize, data: &[u8]) -> Result<(), ProtocolError> {
        let end = offset
            .checked_add(data.len())
            .filter(|&end| end <= VGM_BUFFER_SIZE)
            .ok_or(ProtocolError::WriteOutOfBounds {
                offset,
                length: data.len(),
                capacity: VGM_BUFFER_SIZE,
            })?;
        self.data[offset..end].copy_from_slice(data);
        Ok(())
    }

    /// Byte at buffer offset `offset`.
    ///
    /// The player keeps its cursor inside the buffer, so this indexes
    /// directly.
    pub fn byte(&self, offset: usize) -> u8 {
        self.data[offset]
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Zero the whole buffer.
    pub fn clear(&mut self) {
        self.data.fill(0);
    }
}

impl Default for VgmBuffer {
    fn default() -> Self {
        Self::new()
    }
}
