//! Vendor control requests.
//!
//! All requests are addressed to the streaming interface with `wIndex == 0`,
//! and the direction bit of `bmRequestType` has to agree with bit 7 of the
//! request code: `READ_STATUS` (0x80) is device-to-host, the others are
//! host-to-device.
use std::convert::TryFrom;

use super::WriteMode;
use crate::binutil::read_u32_le_at;
use crate::error::ProtocolError;

pub const SET_WRITE_MODE: u8 = 0x00;
pub const START_PLAYBACK: u8 = 0x01;
pub const READ_STATUS: u8 = 0x80;

/// Placeholder answer to `READ_STATUS`.
pub const PLACEHOLDER_STATUS: [u8; 2] = [0x55, 0xAA];

/// Bytes of `SET_WRITE_MODE` data stage.
pub const WRITE_MODE_PAYLOAD_SIZE: usize = 8;

const DIRECTION_IN: u8 = 0x80;
const TYPE_MASK: u8 = 0x60;
const TYPE_VENDOR: u8 = 0x40;
const RECIPIENT_MASK: u8 = 0x1F;
const RECIPIENT_INTERFACE: u8 = 0x01;

/// The eight-byte setup stage of a control transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetupPacket {
    pub request_type: u8,
    pub request: u8,
    pub value: u16,
    pub index: u16,
    pub length: u16,
}

impl SetupPacket {
    /// Vendor request to interface 0 with the direction taken from bit 7 of
    /// `request`.
    pub fn vendor(request: u8, value: u16, length: u16) -> Self {
        Self {
            request_type: (request & DIRECTION_IN) | TYPE_VENDOR | RECIPIENT_INTERFACE,
            request,
            value,
            index: 0,
            length,
        }
    }

    pub fn is_vendor(&self) -> bool {
        self.request_type & TYPE_MASK == TYPE_VENDOR
    }

    /// Device-to-host transfer.
    pub fn is_read(&self) -> bool {
        self.request_type & DIRECTION_IN != 0
    }

    fn is_interface_scoped(&self) -> bool {
        self.index == 0 && self.request_type & RECIPIENT_MASK == RECIPIENT_INTERFACE
    }
}

/// A decoded vendor request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlRequest {
    ReadStatus,
    StartPlayback,
    SetWriteMode {
        mode: WriteMode,
        start_offset: u32,
        length: u32,
    },
}

/// What the control pipe should answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlResponse {
    /// Not a vendor request; another handler may take it.
    Continue,
    /// Status stage only.
    Ack,
    /// Data stage for a device-to-host request.
    Data([u8; 2]),
}

impl ControlRequest {
    /// Decode a request from its setup stage and host-to-device `data`.
    ///
    /// Returns `Ok(None)` for requests that are not vendor requests.
    pub fn decode(setup: &SetupPacket, data: &[u8]) -> Result<Option<Self>, ProtocolError> {
        if !setup.is_vendor() {
            return Ok(None);
        }
        if (setup.request_type ^ setup.request) & DIRECTION_IN != 0 {
            return Err(ProtocolError::DirectionMismatch(setup.request));
        }
        if !setup.is_interface_scoped() {
            return Err(ProtocolError::NotInterfaceScoped);
        }

        let request = match setup.request {
            READ_STATUS => ControlRequest::ReadStatus,
            START_PLAYBACK => ControlRequest::StartPlayback,
            SET_WRITE_MODE => {
                let mode = WriteMode::try_from(setup.value)?;
                if data.len() != WRITE_MODE_PAYLOAD_SIZE {
                    return Err(ProtocolError::PayloadLength(data.len()));
                }
                let start_offset = read_u32_le_at(data, 0)
                    .map_err(|_| ProtocolError::PayloadLength(data.len()))?;
                let length = read_u32_le_at(data, 4)
                    .map_err(|_| ProtocolError::PayloadLength(data.len()))?;
                if length == 0 {
                    return Err(ProtocolError::ZeroLength);
                }
                ControlRequest::SetWriteMode {
                    mode,
                    start_offset,
                    length,
                }
            }
            other => return Err(ProtocolError::UnknownRequest(other)),
        };
        Ok(Some(request))
    }

    /// Setup stage and data stage the host sends for this request.
    pub fn encode(&self) -> (SetupPacket, Vec<u8>) {
        match *self {
            ControlRequest::ReadStatus => (
                SetupPacket::vendor(READ_STATUS, 0, PLACEHOLDER_STATUS.len() as u16),
                Vec::new(),
            ),
            ControlRequest::StartPlayback => (SetupPacket::vendor(START_PLAYBACK, 0, 0), Vec::new()),
            ControlRequest::SetWriteMode {
                mode,
                start_offset,
                length,
            } => {
                let mut data = Vec::with_capacity(WRITE_MODE_PAYLOAD_SIZE);
                data.extend_from_slice(&start_offset.to_le_bytes());
                data.extend_from_slice(&length.to_le_bytes());
                (
                    SetupPacket::vendor(
                        SET_WRITE_MODE,
                        mode.selector(),
                        WRITE_MODE_PAYLOAD_SIZE as u16,
                    ),
                    data,
                )
            }
        }
    }
}
