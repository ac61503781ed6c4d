//! Error types for playback, host protocol handling and VGM preprocessing.
//!
//! Transport backpressure is not an error: a busy notification slot is
//! reported as [`SendOutcome::Busy`](crate::usb::SendOutcome) and retried on
//! the next poll.

use thiserror::Error;

/// A read past the end of a byte buffer.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("offset out of range: 0x{offset:X} (needed {needed} bytes, available {available})")]
pub struct OutOfRange {
    /// Index that was attempted to be accessed.
    pub offset: usize,
    /// Number of bytes required for the operation.
    pub needed: usize,
    /// Bytes actually available from `offset`.
    pub available: usize,
}

/// Errors raised by the VGM interpreter.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerError {
    /// The buffer does not start with the `"Vgm "` identity string.
    #[error("VGM identity string not found (got {0:02X?})")]
    HeaderInvalid([u8; 4]),

    /// The buffer ends inside the header.
    #[error("VGM header truncated: {0}")]
    HeaderTruncated(#[from] OutOfRange),

    /// The resolved data offset does not leave room for commands in the
    /// linear playback area.
    #[error("VGM data offset 0x{0:X} is outside the linear playback area")]
    DataOffsetOutOfRange(u32),

    /// An opcode the player does not implement.
    #[error("unsupported command 0x{opcode:02X} at stream offset 0x{offset:X}")]
    UnexpectedOpcode { opcode: u8, offset: u32 },

    /// A data block (0x67) was found in the command stream.
    #[error("data block at stream offset 0x{offset:X}: blocks must be stripped before playback")]
    PrematureDataBlock { offset: u32 },

    /// The player was stepped before `init_playback` succeeded.
    #[error("player used before initialization")]
    UninitializedCall,
}

impl PlayerError {
    /// Whether the error stops playback.
    ///
    /// `UninitializedCall` is a logged no-op; everything else requires a new
    /// `START_PLAYBACK` from the host.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, PlayerError::UninitializedCall)
    }
}

/// Errors raised while handling host control requests and bulk data.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    /// More bulk data arrived than the negotiated length. Ingestion stays
    /// disabled until the next `SET_WRITE_MODE`.
    #[error("received {received} bytes with only {remaining} remaining in the session")]
    ProtocolOverrun { received: usize, remaining: usize },

    /// `SET_WRITE_MODE` selector is not PCM-A, PCM-B or VGM.
    #[error("unexpected write mode: 0x{0:X}")]
    UnknownWriteMode(u16),

    /// `SET_WRITE_MODE` payload was not 8 bytes.
    #[error("expected 8 bytes of write mode payload (got {0})")]
    PayloadLength(usize),

    /// `SET_WRITE_MODE` asked for zero bytes.
    #[error("expected non-zero write length")]
    ZeroLength,

    /// A vendor request code this device does not know.
    #[error("unknown vendor request 0x{0:02X}")]
    UnknownRequest(u8),

    /// The request direction does not match the request code.
    #[error("request 0x{0:02X} sent with the wrong direction")]
    DirectionMismatch(u8),

    /// The request was not addressed to the interface with `wIndex == 0`.
    #[error("request is not addressed to interface 0")]
    NotInterfaceScoped,

    /// Ingested bytes would land outside the target memory.
    #[error("write of {length} bytes at 0x{offset:X} exceeds 0x{capacity:X} byte target")]
    WriteOutOfBounds {
        offset: usize,
        length: usize,
        capacity: usize,
    },
}

/// Errors raised while stripping data blocks out of a VGM file.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PreprocessError {
    /// The file ended inside a header field or command.
    #[error("truncated VGM: {0}")]
    Truncated(#[from] OutOfRange),

    /// The file does not start with `"Vgm "`.
    #[error("invalid ident: {0:02X?}")]
    InvalidIdent([u8; 4]),

    /// A command the device cannot play.
    #[error("unrecognized command byte 0x{opcode:02X} at offset 0x{offset:X}")]
    UnknownCommand { opcode: u8, offset: usize },

    /// A data block that is not ADPCM-A (0x82) or ADPCM-B (0x83) ROM data.
    #[error("unexpected data block type 0x{block_type:02X} at offset 0x{offset:X}")]
    UnsupportedBlock { block_type: u8, offset: usize },

    /// A ROM data block declaring a zero total ROM size.
    #[error("data block at offset 0x{0:X} declares a zero total ROM size")]
    EmptyRomSize(usize),

    /// `0x67` not followed by the `0x66` compatibility byte.
    #[error("data block at offset 0x{offset:X} has marker 0x{marker:02X}, expected 0x66")]
    BadBlockMarker { marker: u8, offset: usize },

    /// ROM data reaching past the 24-bit ADPCM address space.
    #[error(
        "data block at offset 0x{offset:X} covers ROM 0x{rom_offset:X}+0x{length:X}, past the ADPCM address space"
    )]
    BlockOutOfRange {
        rom_offset: u32,
        length: usize,
        offset: usize,
    },

    /// The rebased sample ROMs do not fit in sample memory.
    #[error("sample data needs 0x{needed:X} bytes, sample memory holds 0x{capacity:X}")]
    SampleMemoryFull { needed: usize, capacity: usize },
}

/// Errors raised while driving the in-process device/host bench.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BenchError {
    #[error("control request failed: {0}")]
    Protocol(#[from] ProtocolError),

    /// The device stopped taking bulk data in the middle of an upload.
    #[error("upload to 0x{offset:X} stalled with {remaining} bytes outstanding")]
    UploadStalled { offset: usize, remaining: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uninitialized_call_is_not_fatal() {
        assert!(!PlayerError::UninitializedCall.is_fatal());
        assert!(PlayerError::PrematureDataBlock { offset: 0x40 }.is_fatal());
        assert!(PlayerError::HeaderInvalid(*b"RIFF").is_fatal());
    }

    #[test]
    fn test_display_messages() {
        let err = PlayerError::UnexpectedOpcode {
            opcode: 0xB7,
            offset: 0x1234,
        };
        assert_eq!(
            err.to_string(),
            "unsupported command 0xB7 at stream offset 0x1234"
        );
        let err = ProtocolError::ProtocolOverrun {
            received: 64,
            remaining: 8,
        };
        assert!(err.to_string().contains("64 bytes"));
    }
}
