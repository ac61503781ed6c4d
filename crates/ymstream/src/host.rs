//! Host side of the streaming protocol.
//!
//! [`HostStreamer`] owns a preprocessed stream, produces the uploads that
//! precede playback and turns each buffering notification into the slice
//! of the stream the device asked for.
use log::{debug, warn};

use crate::hw::BULK_PACKET_SIZE;
use crate::preprocess::{PcmBlock, PreprocessedVgm};
use crate::usb::{ControlRequest, Notification, WriteMode};
use crate::usb::notify::SEQUENCE_MASK;
use crate::vgm::LINEAR_END;

/// One `SET_WRITE_MODE` transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upload {
    pub mode: WriteMode,
    pub offset: u32,
    pub data: Vec<u8>,
}

impl Upload {
    pub fn write_mode_request(&self) -> ControlRequest {
        ControlRequest::SetWriteMode {
            mode: self.mode,
            start_offset: self.offset,
            length: self.data.len() as u32,
        }
    }

    /// The bulk packets the transfer is split into.
    pub fn packets(&self) -> impl Iterator<Item = &[u8]> {
        self.data.chunks(BULK_PACKET_SIZE)
    }
}

/// Serves refills for one stream.
#[derive(Debug, Clone)]
pub struct HostStreamer {
    stream: Vec<u8>,
    pcm_blocks: Vec<PcmBlock>,
    sequence: u32,
    served: u64,
    ignored: u64,
}

impl HostStreamer {
    pub fn new(vgm: PreprocessedVgm) -> Self {
        Self::from_parts(vgm.data, vgm.pcm_blocks)
    }

    pub fn from_parts(stream: Vec<u8>, pcm_blocks: Vec<PcmBlock>) -> Self {
        Self {
            stream,
            pcm_blocks,
            sequence: 0,
            served: 0,
            ignored: 0,
        }
    }

    pub fn stream(&self) -> &[u8] {
        &self.stream
    }

    /// Sample ROM uploads followed by the linear area.
    pub fn initial_uploads(&self) -> Vec<Upload> {
        let mut uploads: Vec<Upload> = self
            .pcm_blocks
            .iter()
            .map(|block| Upload {
                mode: block.kind.write_mode(),
                offset: block.offset,
                data: block.data.clone(),
            })
            .collect();

        let linear = self.stream.len().min(LINEAR_END);
        if linear > 0 {
            uploads.push(Upload {
                mode: WriteMode::Vgm,
                offset: 0,
                data: self.stream[..linear].to_vec(),
            });
        }
        uploads
    }

    /// Answer a notification read from the interrupt endpoint.
    ///
    /// Returns `None` for status reports, out of sequence requests and
    /// requests entirely past the end of the stream.
    pub fn handle_notification(&mut self, message: &[u8]) -> Option<Upload> {
        let notification = Notification::decode(message);
        let Some(Notification::BufferingRequest { sequence, .. }) = notification else {
            debug!("ignoring notification {:?}", notification);
            return None;
        };
        if sequence != self.sequence {
            warn!(
                "ignoring request with sequence {} (expected {})",
                sequence, self.sequence
            );
            self.ignored += 1;
            return None;
        }
        self.sequence = (self.sequence + 1) & SEQUENCE_MASK;

        let request = notification.and_then(|n| n.as_request())?;
        let start = (request.stream_offset as usize).min(self.stream.len());
        let end = start
            .saturating_add(request.length as usize)
            .min(self.stream.len());
        if start == end {
            debug!(
                "request at 0x{:X} is past the end of the stream",
                request.stream_offset
            );
            return None;
        }

        self.served += 1;
        Some(Upload {
            mode: WriteMode::Vgm,
            offset: request.target_offset,
            data: self.stream[start..end].to_vec(),
        })
    }

    /// Expect sequence 0 again, as after `START_PLAYBACK`.
    pub fn reset_sequence(&mut self) {
        self.sequence = 0;
    }

    pub fn sequence_counter(&self) -> u32 {
        self.sequence
    }

    /// Buffering requests answered with data.
    pub fn served(&self) -> u64 {
        self.served
    }

    /// Buffering requests dropped for a sequence mismatch.
    pub fn ignored(&self) -> u64 {
        self.ignored
    }
}
