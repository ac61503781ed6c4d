//! VGM interpreter and double-buffer coordinator.
//!
//! [`VgmPlayer::update`] consumes commands from the [`VgmBuffer`] until it
//! reaches a wait, an end of stream, a region crossing or a busy chip, and
//! reports what the caller has to do next: arm the timer, send a buffering
//! request upstream, or stop on a fatal error.
//!
//! The player tracks two positions. `buffer_index` is the physical cursor in
//! the window; `index` is the logical offset in the full stream at the moment
//! the cursor last entered a region. The logical position of the next byte is
//! `index + (buffer_index - previous_buffer_index)`, which is what refill
//! requests are addressed by.
use std::collections::VecDeque;

use log::{debug, error, info, trace, warn};

use super::buffer::{LINEAR_END, REGION_SIZE, Region, VgmBuffer};
use super::header::VgmHeaderInfo;
use crate::chip::ChannelFilter;
use crate::error::PlayerError;
use crate::hw::{ChipSink, PlaybackTimer, Port};

/// Samples waited by `0x62` (one 60 Hz frame at 44.1 kHz).
pub const WAIT_60HZ_FRAME: u32 = 735;
/// Samples waited by `0x63` (one 50 Hz frame at 44.1 kHz).
pub const WAIT_50HZ_FRAME: u32 = 882;

/// Interpreter options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlayerConfig {
    log_writes: bool,
}

impl PlayerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Trace every register write together with the filter decision.
    pub fn with_log_writes(mut self, enabled: bool) -> Self {
        self.log_writes = enabled;
        self
    }

    pub fn log_writes(&self) -> bool {
        self.log_writes
    }
}

/// Lifecycle of the interpreter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerState {
    /// No successful `init_playback` yet.
    Uninitialized,
    Playing,
    /// A fatal error stopped playback; only `init_playback` leaves this state.
    Errored,
}

/// Ask the host to copy a slice of the stream into a buffer region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferRequest {
    /// Buffer offset the data lands at.
    pub target_offset: u32,
    /// Logical stream offset of the first byte.
    pub stream_offset: u32,
    pub length: u32,
}

impl BufferRequest {
    fn region(region: Region, stream_offset: u32) -> Self {
        Self {
            target_offset: region.start() as u32,
            stream_offset,
            length: REGION_SIZE as u32,
        }
    }
}

/// Outcome of one interpreter step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateResult {
    /// Samples until the next step. The timer has already been armed.
    pub delay: u32,
    /// Refill to forward to the host, oldest first.
    pub request: Option<BufferRequest>,
    /// The step stopped in front of a write because the chip was busy.
    pub chip_busy: bool,
    pub error: Option<PlayerError>,
}

impl UpdateResult {
    pub fn buffering_needed(&self) -> bool {
        self.request.is_some()
    }
}

/// Interpreter state that persists between steps.
#[derive(Debug, Clone)]
pub struct PlayerContext {
    initialized: bool,
    index: u32,
    start_offset: u32,
    region: Region,
    buffer_index: usize,
    previous_buffer_index: usize,
    loop_buffer_loaded: bool,
    loop_offset: u32,
    loop_count: u32,
    filter: ChannelFilter,
}

impl PlayerContext {
    pub fn new() -> Self {
        Self {
            initialized: false,
            index: 0,
            start_offset: 0,
            region: Region::Linear,
            buffer_index: 0,
            previous_buffer_index: 0,
            loop_buffer_loaded: false,
            loop_offset: 0,
            loop_count: 0,
            filter: ChannelFilter::new(),
        }
    }

    pub fn initialized(&self) -> bool {
        self.initialized
    }

    /// Logical stream offset at the last region entry.
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn start_offset(&self) -> u32 {
        self.start_offset
    }

    /// Region the cursor is in.
    pub fn region(&self) -> Region {
        self.region
    }

    pub fn buffer_index(&self) -> usize {
        self.buffer_index
    }

    pub fn previous_buffer_index(&self) -> usize {
        self.previous_buffer_index
    }

    pub fn loop_buffer_loaded(&self) -> bool {
        self.loop_buffer_loaded
    }

    pub fn loop_offset(&self) -> u32 {
        self.loop_offset
    }

    pub fn loop_count(&self) -> u32 {
        self.loop_count
    }

    /// Logical stream offset of the next byte to be read.
    pub fn stream_offset(&self) -> u32 {
        self.index + (self.buffer_index - self.previous_buffer_index) as u32
    }

    pub fn filter(&self) -> &ChannelFilter {
        &self.filter
    }

    pub fn filter_mut(&mut self) -> &mut ChannelFilter {
        &mut self.filter
    }

    /// Put the cursor at the start of `region`, which holds the stream from
    /// `stream_offset`.
    fn enter(&mut self, region: Region, buffer_index: usize, stream_offset: u32) {
        self.region = region;
        self.buffer_index = buffer_index;
        self.previous_buffer_index = buffer_index;
        self.index = stream_offset;
    }
}

impl Default for PlayerContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Interpreter for YM2610 VGM command streams.
#[derive(Debug, Clone)]
pub struct VgmPlayer {
    config: PlayerConfig,
    state: PlayerState,
    context: PlayerContext,
    header: Option<VgmHeaderInfo>,
    requests: VecDeque<BufferRequest>,
    crossings: u32,
}

impl VgmPlayer {
    pub fn new(config: PlayerConfig) -> Self {
        Self {
            config,
            state: PlayerState::Uninitialized,
            context: PlayerContext::new(),
            header: None,
            requests: VecDeque::new(),
            crossings: 0,
        }
    }

    pub fn state(&self) -> PlayerState {
        self.state
    }

    pub fn context(&self) -> &PlayerContext {
        &self.context
    }

    pub fn filter(&self) -> &ChannelFilter {
        &self.context.filter
    }

    /// Live mute/solo state. Changes apply to the very next write.
    pub fn filter_mut(&mut self) -> &mut ChannelFilter {
        &mut self.context.filter
    }

    /// Header of the current playback.
    pub fn header(&self) -> Option<&VgmHeaderInfo> {
        self.header.as_ref()
    }

    pub fn loop_count(&self) -> u32 {
        self.context.loop_count
    }

    /// Number of refills queued but not yet handed out.
    pub fn pending_requests(&self) -> usize {
        self.requests.len()
    }

    /// Take the oldest queued refill.
    pub fn take_request(&mut self) -> Option<BufferRequest> {
        self.requests.pop_front()
    }

    /// Start playback of the stream whose first 0x12000 bytes are in
    /// `buffer`.
    ///
    /// Streaming state is reset and the A/B preload is queued. The filter's
    /// mask and flags survive; the remembered ADPCM-A level does not.
    pub fn init_playback(&mut self, buffer: &VgmBuffer) -> Result<(), PlayerError> {
        self.requests.clear();
        self.crossings = 0;
        self.header = None;
        self.context.initialized = false;
        self.context.loop_count = 0;
        self.context.loop_buffer_loaded = false;
        self.context.filter.reset_adpcma_atl();

        let header = match self.check_header(buffer) {
            Ok(header) => header,
            Err(err) => {
                error!("cannot start playback: {}", err);
                self.state = PlayerState::Errored;
                return Err(err);
            }
        };

        info!("start offset: 0x{:08X}", header.start_offset);
        info!("loop offset:  0x{:08X}", header.loop_offset);
        info!("YM2610 clock: {}Hz", header.clock_hz());

        self.context.start_offset = header.start_offset;
        self.context.loop_offset = header.loop_offset;
        self.context.initialized = true;
        self.header = Some(header);
        self.restart();
        self.state = PlayerState::Playing;

        info!("starting VGM playback");
        Ok(())
    }

    fn check_header(&self, buffer: &VgmBuffer) -> Result<VgmHeaderInfo, PlayerError> {
        let header = VgmHeaderInfo::parse(buffer.as_slice())?;
        if header.start_offset as usize >= LINEAR_END {
            return Err(PlayerError::DataOffsetOutOfRange(header.start_offset));
        }
        Ok(header)
    }

    /// Rewind to the start of the stream and queue the A/B preload.
    fn restart(&mut self) {
        let start = self.context.start_offset;
        self.context.enter(Region::Linear, start as usize, start);
        self.queue_preload(LINEAR_END as u32);
    }

    /// Queue A and B with the stream from `stream_offset` onwards.
    fn queue_preload(&mut self, stream_offset: u32) {
        self.queue(BufferRequest::region(Region::A, stream_offset));
        self.queue(BufferRequest::region(
            Region::B,
            stream_offset + REGION_SIZE as u32,
        ));
    }

    fn queue(&mut self, request: BufferRequest) {
        debug!(
            "buffering request: 0x{:X} bytes of stream 0x{:X} to 0x{:X}",
            request.length, request.stream_offset, request.target_offset
        );
        self.requests.push_back(request);
    }

    /// Run commands until the next wait, region crossing, end of stream or
    /// busy chip.
    ///
    /// Waits arm `timer`; writes go through the channel filter to `chip`.
    pub fn update<C: ChipSink, T: PlaybackTimer>(
        &mut self,
        buffer: &VgmBuffer,
        chip: &mut C,
        timer: &mut T,
    ) -> UpdateResult {
        let mut result = UpdateResult::default();

        if self.state != PlayerState::Playing || !self.context.initialized {
            warn!("player update called before playback was initialized");
            result.error = Some(PlayerError::UninitializedCall);
            return result;
        }

        loop {
            let opcode = self.peek_byte(buffer);
            if matches!(opcode, 0x58 | 0x59) && !chip.ready() {
                result.chip_busy = true;
                break;
            }

            let crossings = self.crossings;
            match self.step(buffer, chip) {
                Ok(0) => {
                    if opcode == 0x66 {
                        break;
                    }
                }
                Ok(delay) => {
                    timer.arm(delay);
                    result.delay = delay;
                    break;
                }
                Err(err) => {
                    self.fail(err);
                    result.error = Some(err);
                    break;
                }
            }

            if self.crossings != crossings {
                break;
            }
        }

        result.request = self.requests.pop_front();
        result
    }

    /// Execute one command, returning its delay in samples.
    fn step<C: ChipSink>(&mut self, buffer: &VgmBuffer, chip: &mut C) -> Result<u32, PlayerError> {
        let offset = self.context.stream_offset();
        let opcode = self.next_byte(buffer);

        match opcode {
            0x58 | 0x59 => {
                let port = if opcode == 0x58 { Port::A } else { Port::B };
                let register = self.next_byte(buffer);
                let data = self.next_byte(buffer);
                self.write(chip, port, register, data);
                Ok(0)
            }
            0x70..=0x7F => Ok((opcode & 0x0F) as u32 + 1),
            0x61 => {
                let lo = self.next_byte(buffer) as u32;
                let hi = self.next_byte(buffer) as u32;
                Ok(hi << 8 | lo)
            }
            0x62 => Ok(WAIT_60HZ_FRAME),
            0x63 => Ok(WAIT_50HZ_FRAME),
            0x66 => {
                self.end_of_stream();
                Ok(0)
            }
            0x67 => Err(PlayerError::PrematureDataBlock { offset }),
            _ => Err(PlayerError::UnexpectedOpcode { opcode, offset }),
        }
    }

    fn write<C: ChipSink>(&mut self, chip: &mut C, port: Port, register: u8, data: u8) {
        let decision = self.context.filter.filter(port, register, data);
        if self.config.log_writes {
            trace!(
                "({:03X}) = {:02X}: {:?}",
                port.address(register),
                data,
                decision
            );
        }
        if decision.is_allowed() {
            chip.write(port, register, data);
        }
    }

    fn end_of_stream(&mut self) {
        self.context.loop_count += 1;

        let loop_offset = self.context.loop_offset;
        if loop_offset != 0 && self.context.loop_buffer_loaded {
            info!(
                "looping from cached loop point 0x{:X} (loop {})",
                loop_offset, self.context.loop_count
            );
            self.context
                .enter(Region::Loop, Region::Loop.start(), loop_offset);
            self.queue_preload(loop_offset + REGION_SIZE as u32);
        } else {
            if loop_offset != 0 {
                warn!(
                    "loop point 0x{:X} was never reached, restarting from the beginning",
                    loop_offset
                );
            } else {
                info!("restarting (loop {})", self.context.loop_count);
            }
            self.restart();
        }
    }

    fn fail(&mut self, err: PlayerError) {
        error!("playback stopped: {}", err);
        self.state = PlayerState::Errored;
        self.context.initialized = false;
        self.requests.clear();
    }

    /// Byte the next read will return, without moving the cursor.
    fn peek_byte(&self, buffer: &VgmBuffer) -> u8 {
        let region = self.context.region;
        if self.context.buffer_index >= region.end() {
            buffer.byte(region.next().start())
        } else {
            buffer.byte(self.context.buffer_index)
        }
    }

    /// Read one byte, moving into the next region first when the cursor sits
    /// at the end of the current one.
    fn next_byte(&mut self, buffer: &VgmBuffer) -> u8 {
        if self.context.buffer_index >= self.context.region.end() {
            self.cross_region();
        }
        self.check_loop_point();

        let byte = buffer.byte(self.context.buffer_index);
        self.context.buffer_index += 1;
        byte
    }

    fn cross_region(&mut self) {
        let vacated = self.context.region;
        let next = vacated.next();
        let stream_offset = self.context.stream_offset();

        if vacated.refilled_on_exit() {
            self.queue(BufferRequest {
                target_offset: vacated.start() as u32,
                stream_offset: stream_offset + REGION_SIZE as u32,
                length: REGION_SIZE as u32,
            });
        }

        self.context.enter(next, next.start(), stream_offset);
        self.crossings = self.crossings.wrapping_add(1);
    }

    /// Queue the loop region the first time the loop point comes up.
    fn check_loop_point(&mut self) {
        let loop_offset = self.context.loop_offset;
        if loop_offset == 0 || self.context.loop_buffer_loaded {
            return;
        }
        if self.context.stream_offset() >= loop_offset {
            debug!("loop point 0x{:X} reached, caching loop region", loop_offset);
            self.queue(BufferRequest::region(Region::Loop, loop_offset));
            self.context.loop_buffer_loaded = true;
        }
    }
}

impl Default for VgmPlayer {
    fn default() -> Self {
        Self::new(PlayerConfig::default())
    }
}
