//! Upload session and notification slot state.
use log::{debug, info, warn};

use super::control::{ControlRequest, ControlResponse, PLACEHOLDER_STATUS, SetupPacket};
use super::notify::{Notification, SEQUENCE_MASK};
use super::{SendOutcome, WriteMode};
use crate::error::ProtocolError;
use crate::hw::{BULK_PACKET_SIZE, OutDescriptor, Transport};
use crate::vgm::BufferRequest;

/// One bulk packet handed to the caller for storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Packet {
    pub mode: WriteMode,
    /// Target offset of the first byte.
    pub offset: usize,
    data: [u8; BULK_PACKET_SIZE],
    len: usize,
}

impl Packet {
    pub fn bytes(&self) -> &[u8] {
        &self.data[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Device side of the streaming protocol.
#[derive(Debug, Clone, Default)]
pub struct StreamingSession {
    write_mode: Option<WriteMode>,
    start_offset: usize,
    write_offset: usize,
    end_offset: usize,
    active: bool,
    bd_index: usize,
    sequence_counter: u32,
    playback_start_pending: bool,
}

impl StreamingSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether an upload is still expecting data.
    pub fn active(&self) -> bool {
        self.active
    }

    pub fn write_mode(&self) -> Option<WriteMode> {
        self.write_mode
    }

    pub fn start_offset(&self) -> usize {
        self.start_offset
    }

    /// Target offset of the next byte expected.
    pub fn write_offset(&self) -> usize {
        self.write_offset
    }

    pub fn end_offset(&self) -> usize {
        self.end_offset
    }

    /// Bytes still expected by the current upload.
    pub fn remaining(&self) -> usize {
        self.end_offset.saturating_sub(self.write_offset)
    }

    /// Sequence number the next buffering request will carry.
    pub fn sequence_counter(&self) -> u32 {
        self.sequence_counter
    }

    pub fn reset_sequence_counter(&mut self) {
        self.sequence_counter = 0;
    }

    /// The host selected our configuration: forget everything and arm the
    /// bulk endpoint.
    pub fn configure<T: Transport>(&mut self, transport: &mut T) {
        self.write_mode = None;
        self.start_offset = 0;
        self.write_offset = 0;
        self.end_offset = 0;
        self.active = false;
        self.sequence_counter = 0;
        self.playback_start_pending = false;
        self.enable_write(transport);
    }

    fn enable_write<T: Transport>(&mut self, transport: &mut T) {
        self.bd_index = 0;
        transport.set_out_enabled(true);
        transport.arm_out(0);
        transport.arm_out(1);
    }

    fn disable_write<T: Transport>(&mut self, transport: &mut T) {
        transport.set_out_enabled(false);
    }

    /// Handle a control transfer addressed to the streaming interface.
    pub fn handle_control<T: Transport>(
        &mut self,
        transport: &mut T,
        setup: &SetupPacket,
        data: &[u8],
    ) -> Result<ControlResponse, ProtocolError> {
        debug!("control request 0x{:02X}", setup.request);
        let request = match ControlRequest::decode(setup, data) {
            Ok(Some(request)) => request,
            Ok(None) => return Ok(ControlResponse::Continue),
            Err(err) => {
                warn!("control request rejected: {}", err);
                return Err(err);
            }
        };

        match request {
            ControlRequest::ReadStatus => Ok(ControlResponse::Data(PLACEHOLDER_STATUS)),
            ControlRequest::StartPlayback => {
                self.request_playback_start();
                Ok(ControlResponse::Ack)
            }
            ControlRequest::SetWriteMode {
                mode,
                start_offset,
                length,
            } => {
                self.set_write_mode(transport, mode, start_offset as usize, length as usize)?;
                Ok(ControlResponse::Ack)
            }
        }
    }

    /// Open an upload of `length` bytes to `mode` starting at `start_offset`.
    ///
    /// Re-arms the bulk endpoint if an overrun had disabled it.
    pub fn set_write_mode<T: Transport>(
        &mut self,
        transport: &mut T,
        mode: WriteMode,
        start_offset: usize,
        length: usize,
    ) -> Result<(), ProtocolError> {
        if length == 0 {
            return Err(ProtocolError::ZeroLength);
        }

        self.write_mode = Some(mode);
        self.start_offset = start_offset;
        self.write_offset = start_offset;
        self.end_offset = start_offset.saturating_add(length);
        self.active = true;

        info!(
            "write mode {:?}: 0x{:X} bytes at 0x{:X}",
            mode, length, start_offset
        );

        if !transport.out_enabled() {
            self.enable_write(transport);
        }
        Ok(())
    }

    pub fn request_playback_start(&mut self) {
        self.playback_start_pending = true;
    }

    /// Consume a pending `START_PLAYBACK`.
    ///
    /// Returns `false` while an upload is still active, since the control
    /// request can overtake the last bulk packets.
    pub fn take_playback_start(&mut self) -> bool {
        if self.active {
            return false;
        }
        std::mem::take(&mut self.playback_start_pending)
    }

    pub fn playback_start_pending(&self) -> bool {
        self.playback_start_pending
    }

    /// Collect at most one bulk packet.
    ///
    /// Receiving more bytes than the session has left disables the endpoint
    /// until the next `SET_WRITE_MODE`.
    pub fn poll_data<T: Transport>(
        &mut self,
        transport: &mut T,
    ) -> Result<Option<Packet>, ProtocolError> {
        if !self.active || !transport.out_enabled() {
            return Ok(None);
        }
        let Some(mode) = self.write_mode else {
            return Ok(None);
        };

        let bd = self.bd_index;
        let len = match transport.out_descriptor(bd) {
            OutDescriptor::Pending => return Ok(None),
            OutDescriptor::Invalid => {
                warn!("invalid data on bulk descriptor {}", bd);
                self.rearm(transport, bd);
                return Ok(None);
            }
            OutDescriptor::Received(len) => len,
        };

        let remaining = self.remaining();
        if len > remaining {
            warn!(
                "received more bytes than expected ({} with {} remaining)",
                len, remaining
            );
            self.disable_write(transport);
            self.active = false;
            return Err(ProtocolError::ProtocolOverrun {
                received: len,
                remaining,
            });
        }

        let mut packet = None;
        if len == 0 {
            warn!("zero length packet on bulk descriptor {}", bd);
        } else if len > BULK_PACKET_SIZE {
            warn!("packet length {} exceeds {} bytes, dropped", len, BULK_PACKET_SIZE);
        } else {
            let mut data = [0u8; BULK_PACKET_SIZE];
            transport.read_out(bd, &mut data[..len]);
            packet = Some(Packet {
                mode,
                offset: self.write_offset,
                data,
                len,
            });
        }

        self.write_offset += len;
        if self.write_offset == self.end_offset {
            info!(
                "upload complete (0x{:X} bytes total)",
                self.end_offset - self.start_offset
            );
            self.active = false;
        }

        self.rearm(transport, bd);
        Ok(packet)
    }

    fn rearm<T: Transport>(&mut self, transport: &mut T, bd: usize) {
        transport.arm_out(bd);
        self.bd_index = bd ^ 1;
    }

    /// Send a buffering request stamped with the current sequence number.
    ///
    /// The counter only advances when the notification was queued.
    pub fn request_buffering<T: Transport>(
        &mut self,
        transport: &mut T,
        request: &BufferRequest,
    ) -> SendOutcome {
        let message = Notification::buffering(self.sequence_counter, request);
        let outcome = Self::submit(transport, &message);
        if outcome.is_queued() {
            self.sequence_counter = (self.sequence_counter + 1) & SEQUENCE_MASK;
        }
        outcome
    }

    pub fn report_status<T: Transport>(&mut self, transport: &mut T, status: u32) -> SendOutcome {
        Self::submit(transport, &Notification::StatusReport { status })
    }

    fn submit<T: Transport>(transport: &mut T, message: &Notification) -> SendOutcome {
        if transport.in_busy() {
            debug!("notification send pending");
            return SendOutcome::Busy;
        }
        transport.submit_in(message.encode());
        SendOutcome::Queued
    }
}
