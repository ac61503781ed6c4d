//! VGM header fields read at playback start.
//!
//! Only the handful of fields the device needs are modelled. Offset fields
//! are stored relative to their own position in the file; `VgmHeaderInfo`
//! resolves them to absolute stream offsets and applies the legacy fallback
//! where `data_offset == 0` means commands start at 0x40.
use crate::binutil::{read_slice, read_u32_le_at};
use crate::error::PlayerError;

/// Identity string every VGM file starts with.
pub const VGM_IDENT: [u8; 4] = *b"Vgm ";

/// Command stream start for files that leave the data offset at zero.
pub const LEGACY_DATA_OFFSET: u32 = 0x40;

/// Enum identifying header fields and their on-disk offsets.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum VgmHeaderField {
    Ident,
    EofOffset,
    Version,
    Gd3Offset,
    TotalSamples,
    LoopOffset,
    LoopSamples,
    DataOffset,
    Ym2610bClock,
}

impl VgmHeaderField {
    pub fn offset(self) -> usize {
        match self {
            VgmHeaderField::Ident => 0x00,
            VgmHeaderField::EofOffset => 0x04,
            VgmHeaderField::Version => 0x08,
            VgmHeaderField::Gd3Offset => 0x14,
            VgmHeaderField::TotalSamples => 0x18,
            VgmHeaderField::LoopOffset => 0x1C,
            VgmHeaderField::LoopSamples => 0x20,
            VgmHeaderField::DataOffset => 0x34,
            VgmHeaderField::Ym2610bClock => 0x4C,
        }
    }

    /// Read the raw little-endian value of this field.
    pub fn read(self, bytes: &[u8]) -> Result<u32, PlayerError> {
        Ok(read_u32_le_at(bytes, self.offset())?)
    }

    /// Read a field stored relative to its own offset, returning the
    /// absolute offset or 0 when the field is unset.
    pub fn read_relative(self, bytes: &[u8]) -> Result<u32, PlayerError> {
        let relative = self.read(bytes)?;
        if relative == 0 {
            return Ok(0);
        }
        Ok((self.offset() as u32).saturating_add(relative))
    }
}

/// Clock field flag selecting the YM2610B variant.
const YM2610B_FLAG: u32 = 0x8000_0000;
/// Clock field flag for a second chip instance.
const DUAL_CHIP_FLAG: u32 = 0x4000_0000;

/// Header values resolved to absolute offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VgmHeaderInfo {
    pub version: u32,
    pub total_samples: u32,
    /// Absolute offset of the first command.
    pub start_offset: u32,
    /// Absolute loop point, 0 when the file does not loop.
    pub loop_offset: u32,
    pub loop_samples: u32,
    /// Raw YM2610 clock field including the variant flags.
    pub ym2610_clock: u32,
}

impl VgmHeaderInfo {
    /// Check the identity string and resolve the header of `bytes`.
    pub fn parse(bytes: &[u8]) -> Result<Self, PlayerError> {
        let ident = read_slice(bytes, VgmHeaderField::Ident.offset(), 4)?;
        if ident != VGM_IDENT {
            let mut found = [0u8; 4];
            found.copy_from_slice(ident);
            return Err(PlayerError::HeaderInvalid(found));
        }

        let start_offset = match VgmHeaderField::DataOffset.read_relative(bytes)? {
            0 => LEGACY_DATA_OFFSET,
            offset => offset,
        };

        Ok(Self {
            version: VgmHeaderField::Version.read(bytes)?,
            total_samples: VgmHeaderField::TotalSamples.read(bytes)?,
            start_offset,
            loop_offset: VgmHeaderField::LoopOffset.read_relative(bytes)?,
            loop_samples: VgmHeaderField::LoopSamples.read(bytes)?,
            ym2610_clock: VgmHeaderField::Ym2610bClock.read(bytes)?,
        })
    }

    /// YM2610 master clock in Hz with the variant flags stripped.
    pub fn clock_hz(&self) -> u32 {
        self.ym2610_clock & !(YM2610B_FLAG | DUAL_CHIP_FLAG)
    }

    pub fn is_ym2610b(&self) -> bool {
        self.ym2610_clock & YM2610B_FLAG != 0
    }

    pub fn has_loop(&self) -> bool {
        self.loop_offset != 0
    }

    /// Version as printed in the file's BCD form, e.g. `1.51`.
    pub fn version_string(&self) -> String {
        format!("{:x}.{:02x}", self.version >> 8, self.version & 0xFF)
    }
}
