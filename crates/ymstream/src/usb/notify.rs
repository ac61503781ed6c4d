//! Interrupt IN notification format.
//!
//! Every notification is four little-endian 32-bit words. The low byte of
//! the first word tags the message; buffering requests carry their 24-bit
//! sequence number in the upper three bytes.
use crate::binutil::{read_u32_le_at, write_u32};
use crate::hw::NOTIFICATION_SIZE;
use crate::vgm::BufferRequest;

pub const BUFFERING_REQUEST_TAG: u8 = 0x01;
pub const STATUS_REPORT_TAG: u8 = 0x02;

/// Sequence numbers wrap at 24 bits.
pub const SEQUENCE_MASK: u32 = 0x00FF_FFFF;

/// Status word sent when playback starts.
pub const STATUS_PLAYBACK_STARTED: u32 = 0x0000_0001;

/// A message from the device to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notification {
    /// Copy `length` bytes of the stream from `stream_offset` to the VGM
    /// buffer at `target_offset`.
    BufferingRequest {
        sequence: u32,
        target_offset: u32,
        stream_offset: u32,
        length: u32,
    },
    StatusReport { status: u32 },
}

impl Notification {
    pub fn buffering(sequence: u32, request: &BufferRequest) -> Self {
        Notification::BufferingRequest {
            sequence: sequence & SEQUENCE_MASK,
            target_offset: request.target_offset,
            stream_offset: request.stream_offset,
            length: request.length,
        }
    }

    pub fn encode(&self) -> [u8; NOTIFICATION_SIZE] {
        let mut bytes = [0u8; NOTIFICATION_SIZE];
        match *self {
            Notification::BufferingRequest {
                sequence,
                target_offset,
                stream_offset,
                length,
            } => {
                write_u32(
                    &mut bytes,
                    0,
                    (sequence & SEQUENCE_MASK) << 8 | BUFFERING_REQUEST_TAG as u32,
                );
                write_u32(&mut bytes, 4, target_offset);
                write_u32(&mut bytes, 8, stream_offset);
                write_u32(&mut bytes, 12, length);
            }
            Notification::StatusReport { status } => {
                write_u32(&mut bytes, 0, STATUS_REPORT_TAG as u32);
                write_u32(&mut bytes, 4, status);
            }
        }
        bytes
    }

    /// Parse a notification, returning `None` for short messages and unknown
    /// tags.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        let header = read_u32_le_at(bytes, 0).ok()?;
        let word = |index: usize| read_u32_le_at(bytes, index * 4).ok();

        match (header & 0xFF) as u8 {
            BUFFERING_REQUEST_TAG => Some(Notification::BufferingRequest {
                sequence: header >> 8,
                target_offset: word(1)?,
                stream_offset: word(2)?,
                length: word(3)?,
            }),
            STATUS_REPORT_TAG => Some(Notification::StatusReport { status: word(1)? }),
            _ => None,
        }
    }

    /// The refill this notification asks for, if it is a buffering request.
    pub fn as_request(&self) -> Option<BufferRequest> {
        match *self {
            Notification::BufferingRequest {
                target_offset,
                stream_offset,
                length,
                ..
            } => Some(BufferRequest {
                target_offset,
                stream_offset,
                length,
            }),
            Notification::StatusReport { .. } => None,
        }
    }
}
