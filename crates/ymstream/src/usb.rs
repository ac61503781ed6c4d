//! Host-facing streaming protocol.
//!
//! The host opens an upload with a vendor `SET_WRITE_MODE` control request,
//! sends the bytes over the bulk OUT endpoint, and triggers playback with
//! `START_PLAYBACK`. While playing, the device asks for refills with 16-byte
//! notifications on the interrupt IN endpoint.
//!
//! - [`control`] decodes and encodes the vendor control requests.
//! - [`session`] tracks the upload in progress and the notification slot.
//! - [`notify`] is the notification wire format.
use std::convert::TryFrom;

use crate::error::ProtocolError;

pub mod control;
pub mod notify;
pub mod session;

pub use control::{ControlRequest, ControlResponse, SetupPacket};
pub use notify::Notification;
pub use session::{Packet, StreamingSession};

/// Destination of an upload session, selected by `wValue` of
/// `SET_WRITE_MODE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteMode {
    /// ADPCM-A sample ROM.
    PcmA,
    /// ADPCM-B sample ROM.
    PcmB,
    /// VGM command buffer.
    Vgm,
}

impl WriteMode {
    pub fn selector(self) -> u16 {
        match self {
            WriteMode::PcmA => 0x00,
            WriteMode::PcmB => 0x01,
            WriteMode::Vgm => 0x02,
        }
    }

    pub fn is_pcm(self) -> bool {
        matches!(self, WriteMode::PcmA | WriteMode::PcmB)
    }
}

impl TryFrom<u16> for WriteMode {
    type Error = ProtocolError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(WriteMode::PcmA),
            0x01 => Ok(WriteMode::PcmB),
            0x02 => Ok(WriteMode::Vgm),
            other => Err(ProtocolError::UnknownWriteMode(other)),
        }
    }
}

/// Result of trying to queue a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Queued,
    /// The previous notification has not been collected yet; retry on the
    /// next poll.
    Busy,
}

impl SendOutcome {
    pub fn is_queued(self) -> bool {
        self == SendOutcome::Queued
    }
}
