//! Device main loop.
//!
//! [`Firmware`] owns every piece of device state and the four peripherals,
//! and advances all of them from a single [`poll`](Firmware::poll) call:
//!
//! 1. Drain direct register writes (mutes, MIDI voices) into the chip.
//! 2. Ingest at most one bulk packet into the VGM buffer or sample memory.
//! 3. Step the player if playing, the timer has run out and no direct writes
//!    are waiting.
//! 4. Send queued notifications until the IN slot is busy.
//! 5. Start playback if the host asked for it and no upload is active.
use std::collections::VecDeque;

use log::{debug, error, info, warn};

use crate::binutil::swap_words;
use crate::chip::{ChipWriteQueue, FmChannels, FmVoices, fm, pcm};
use crate::error::{PlayerError, ProtocolError};
use crate::hw::{BULK_PACKET_SIZE, ChipSink, PlaybackTimer, SampleMemory, Transport};
use crate::midi::{MidiMessage, MidiParser};
use crate::usb::notify::STATUS_PLAYBACK_STARTED;
use crate::usb::{ControlResponse, Packet, SendOutcome, SetupPacket, StreamingSession, WriteMode};
use crate::vgm::{BufferRequest, LINEAR_END, PlayerConfig, VgmBuffer, VgmPlayer};

/// Firmware options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirmwareConfig {
    player: PlayerConfig,
    initial_mask: FmChannels,
    stop_on_linear_upload: bool,
}

impl FirmwareConfig {
    pub fn new() -> Self {
        Self {
            player: PlayerConfig::default(),
            initial_mask: FmChannels::all(),
            stop_on_linear_upload: true,
        }
    }

    pub fn with_player(mut self, player: PlayerConfig) -> Self {
        self.player = player;
        self
    }

    /// FM channels the log may play at power-on.
    pub fn with_initial_mask(mut self, mask: FmChannels) -> Self {
        self.initial_mask = mask;
        self
    }

    /// Stop playback when an upload writes into the linear area.
    pub fn with_stop_on_linear_upload(mut self, enabled: bool) -> Self {
        self.stop_on_linear_upload = enabled;
        self
    }

    pub fn player(&self) -> PlayerConfig {
        self.player
    }

    pub fn initial_mask(&self) -> FmChannels {
        self.initial_mask
    }

    pub fn stop_on_linear_upload(&self) -> bool {
        self.stop_on_linear_upload
    }
}

impl Default for FirmwareConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// User input from buttons and the MIDI port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiveControl {
    /// Let the log play exactly these FM channels.
    SetFmMask(FmChannels),
    /// Let the log play only zero-based FM channel `n`.
    SoloFm(usize),
    /// Give every channel back to the log and clear both filters.
    UnmuteAll,
    SetPitchFilter(bool),
    /// Silence ADPCM and block the log's PCM key-ons.
    SetPcmMuted(bool),
    /// One byte from the MIDI UART.
    Midi(u8),
}

/// Counters kept for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FirmwareStats {
    pub polls: u64,
    pub steps: u64,
    pub packets: u64,
    pub bytes_received: u64,
    pub buffering_requests: u64,
    pub status_reports: u64,
    /// Polls that found the notification slot still occupied.
    pub notify_busy: u64,
    /// Steps that stopped in front of a write because the chip was busy.
    pub chip_busy: u64,
    pub protocol_errors: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outgoing {
    Buffering(BufferRequest),
    Status(u32),
}

/// The device: peripherals plus all playback and protocol state.
pub struct Firmware<C, T, S, U>
where
    C: ChipSink,
    T: PlaybackTimer,
    S: SampleMemory,
    U: Transport,
{
    config: FirmwareConfig,
    chip: C,
    timer: T,
    samples: S,
    transport: U,
    buffer: VgmBuffer,
    player: VgmPlayer,
    session: StreamingSession,
    chip_queue: ChipWriteQueue,
    voices: FmVoices,
    midi: MidiParser,
    outbox: VecDeque<Outgoing>,
    playback_active: bool,
    pcm_muted: bool,
    last_error: Option<PlayerError>,
    last_protocol_error: Option<ProtocolError>,
    stats: FirmwareStats,
}

impl<C, T, S, U> Firmware<C, T, S, U>
where
    C: ChipSink,
    T: PlaybackTimer,
    S: SampleMemory,
    U: Transport,
{
    /// Bring the device up: PCM fetches off until samples are loaded, chip
    /// out of reset.
    pub fn new(config: FirmwareConfig, chip: C, timer: T, samples: S, transport: U) -> Self {
        let mut firmware = Self {
            config,
            chip,
            timer,
            samples,
            transport,
            buffer: VgmBuffer::new(),
            player: VgmPlayer::new(config.player()),
            session: StreamingSession::new(),
            chip_queue: ChipWriteQueue::new(),
            voices: FmVoices::new(),
            midi: MidiParser::new(),
            outbox: VecDeque::new(),
            playback_active: false,
            pcm_muted: false,
            last_error: None,
            last_protocol_error: None,
            stats: FirmwareStats::default(),
        };
        firmware.samples.set_pcm_enabled(false);
        firmware.chip.set_reset(false);
        firmware
            .player
            .filter_mut()
            .set_fm_key_on_mask(config.initial_mask());
        firmware
    }

    /// The host selected the device configuration.
    pub fn configure_usb(&mut self) {
        self.session.configure(&mut self.transport);
        self.outbox.clear();
    }

    /// Handle a vendor control transfer.
    pub fn control(
        &mut self,
        setup: &SetupPacket,
        data: &[u8],
    ) -> Result<ControlResponse, ProtocolError> {
        self.session
            .handle_control(&mut self.transport, setup, data)
            .inspect_err(|&err| self.last_protocol_error = Some(err))
    }

    /// Run one iteration of the main loop.
    pub fn poll(&mut self) {
        self.stats.polls += 1;

        self.chip_queue.flush(&mut self.chip);

        self.ingest();

        if self.playback_active && self.timer.elapsed() && self.chip_queue.is_empty() {
            self.step();
        }

        self.flush_outbox();

        if self.session.take_playback_start() {
            self.start_playback();
        }
    }

    fn ingest(&mut self) {
        match self.session.poll_data(&mut self.transport) {
            Ok(Some(packet)) => self.store(&packet),
            Ok(None) => {}
            Err(err) => {
                self.stats.protocol_errors += 1;
                self.last_protocol_error = Some(err);
            }
        }
    }

    fn store(&mut self, packet: &Packet) {
        self.stats.packets += 1;
        self.stats.bytes_received += packet.len() as u64;

        match packet.mode {
            WriteMode::Vgm => {
                if self.config.stop_on_linear_upload
                    && self.playback_active
                    && packet.offset < LINEAR_END
                {
                    info!("upload into the linear area, stopping playback");
                    self.stop_playback();
                }
                if let Err(err) = self.buffer.write(packet.offset, packet.bytes()) {
                    warn!("VGM packet dropped: {}", err);
                    self.last_protocol_error = Some(err);
                }
            }
            WriteMode::PcmA | WriteMode::PcmB => {
                if self.playback_active {
                    info!("sample upload, stopping playback");
                    self.stop_playback();
                }
                // Sample memory is not safe to fetch from while it loads
                self.samples.set_pcm_enabled(false);
                self.write_samples(packet.offset, packet.bytes());
            }
        }
    }

    fn write_samples(&mut self, offset: usize, bytes: &[u8]) {
        let fits = offset
            .checked_add(bytes.len())
            .is_some_and(|end| end <= S::CAPACITY);
        if !fits {
            let err = ProtocolError::WriteOutOfBounds {
                offset,
                length: bytes.len(),
                capacity: S::CAPACITY,
            };
            warn!("PCM packet dropped: {}", err);
            self.last_protocol_error = Some(err);
            return;
        }

        // Words arrive byte swapped
        let mut words = [0u8; BULK_PACKET_SIZE];
        let words = &mut words[..bytes.len()];
        words.copy_from_slice(bytes);
        swap_words(words);
        self.samples.write(offset, words);
    }

    fn step(&mut self) {
        self.stats.steps += 1;
        let result = self
            .player
            .update(&self.buffer, &mut self.chip, &mut self.timer);

        if result.chip_busy {
            self.stats.chip_busy += 1;
        }
        if let Some(request) = result.request {
            self.outbox.push_back(Outgoing::Buffering(request));
        }
        self.drain_player_requests();

        if let Some(err) = result.error
            && err.is_fatal()
        {
            self.fail(err);
        }
    }

    fn drain_player_requests(&mut self) {
        while let Some(request) = self.player.take_request() {
            self.outbox.push_back(Outgoing::Buffering(request));
        }
    }

    fn flush_outbox(&mut self) {
        while let Some(&message) = self.outbox.front() {
            let outcome = match message {
                Outgoing::Buffering(request) => {
                    self.session.request_buffering(&mut self.transport, &request)
                }
                Outgoing::Status(status) => self.session.report_status(&mut self.transport, status),
            };
            match outcome {
                SendOutcome::Queued => {
                    match message {
                        Outgoing::Buffering(_) => self.stats.buffering_requests += 1,
                        Outgoing::Status(_) => self.stats.status_reports += 1,
                    }
                    self.outbox.pop_front();
                }
                SendOutcome::Busy => {
                    self.stats.notify_busy += 1;
                    break;
                }
            }
        }
    }

    fn start_playback(&mut self) {
        self.outbox.clear();
        self.session.reset_sequence_counter();
        self.outbox.push_back(Outgoing::Status(STATUS_PLAYBACK_STARTED));

        match self.player.init_playback(&self.buffer) {
            Ok(()) => {
                self.drain_player_requests();
                self.samples.set_pcm_enabled(true);
                self.last_error = None;
                self.playback_active = true;
            }
            Err(err) => self.fail(err),
        }
    }

    fn stop_playback(&mut self) {
        self.playback_active = false;
    }

    /// Silence the chip and wait for a new `START_PLAYBACK`.
    fn fail(&mut self, err: PlayerError) {
        error!("stopping playback: {}", err);
        self.stop_playback();
        self.last_error = Some(err);
        self.voices.mute(FmChannels::all(), &mut self.chip_queue);
        pcm::mute_all(&mut self.chip_queue);
    }

    /// Apply a user input. Register writes it causes are queued and reach
    /// the chip ahead of the next player step.
    pub fn live(&mut self, control: LiveControl) {
        match control {
            LiveControl::SetFmMask(mask) => self.set_fm_mask(mask),
            LiveControl::SoloFm(channel) => self.set_fm_mask(FmChannels::channel(channel)),
            LiveControl::UnmuteAll => {
                self.set_fm_mask(FmChannels::all());
                self.player.filter_mut().set_filter_fm_pitch(false);
                self.set_pcm_muted(false);
            }
            LiveControl::SetPitchFilter(enabled) => {
                self.player.filter_mut().set_filter_fm_pitch(enabled);
            }
            LiveControl::SetPcmMuted(muted) => self.set_pcm_muted(muted),
            LiveControl::Midi(byte) => {
                if let Some(message) = self.midi.push(byte) {
                    self.handle_midi(message);
                }
            }
        }
    }

    fn set_fm_mask(&mut self, mask: FmChannels) {
        let previous = self.player.filter().fm_key_on_mask();
        self.player.filter_mut().set_fm_key_on_mask(mask);

        // Channels leaving the log would otherwise hold their last note
        for channel in (previous - mask).channels() {
            fm::key_off(channel, &mut self.chip_queue);
        }
        // Channels returning to the log drop any MIDI note
        self.voices.mute(mask - previous, &mut self.chip_queue);

        debug!("FM mask {:#04X} -> {:#04X}", previous.bits(), mask.bits());
    }

    fn set_pcm_muted(&mut self, muted: bool) {
        if muted == self.pcm_muted {
            return;
        }
        self.pcm_muted = muted;
        self.player.filter_mut().set_filter_pcm_key_on(muted);

        if muted {
            pcm::mute_adpcm_a(&mut self.chip_queue);
            pcm::mute_adpcm_b(&mut self.chip_queue);
        } else {
            let atl = self.player.filter().adpcma_last_atl();
            pcm::unmute_adpcm_a(&mut self.chip_queue, atl);
        }
    }

    fn handle_midi(&mut self, message: MidiMessage) {
        // The user plays the channels the log does not
        let free = !self.player.filter().fm_key_on_mask();
        match message {
            MidiMessage::NoteOn { note, .. } => {
                self.voices.key_mask(free, true, note, &mut self.chip_queue)
            }
            MidiMessage::NoteOff { note, .. } => {
                self.voices.key_mask(free, false, note, &mut self.chip_queue)
            }
            MidiMessage::Unsupported { status } => {
                debug!("ignoring MIDI message 0x{:02X}", status)
            }
        }
    }

    pub fn config(&self) -> &FirmwareConfig {
        &self.config
    }

    pub fn playback_active(&self) -> bool {
        self.playback_active
    }

    pub fn pcm_muted(&self) -> bool {
        self.pcm_muted
    }

    /// Fatal error that stopped the last playback.
    pub fn last_error(&self) -> Option<PlayerError> {
        self.last_error
    }

    pub fn last_protocol_error(&self) -> Option<ProtocolError> {
        self.last_protocol_error
    }

    pub fn stats(&self) -> &FirmwareStats {
        &self.stats
    }

    pub fn player(&self) -> &VgmPlayer {
        &self.player
    }

    pub fn session(&self) -> &StreamingSession {
        &self.session
    }

    pub fn buffer(&self) -> &VgmBuffer {
        &self.buffer
    }

    /// Notifications waiting for the IN slot.
    pub fn pending_notifications(&self) -> usize {
        self.outbox.len()
    }

    /// Direct register writes waiting for the chip.
    pub fn queued_chip_writes(&self) -> usize {
        self.chip_queue.len()
    }

    pub fn chip(&self) -> &C {
        &self.chip
    }

    pub fn chip_mut(&mut self) -> &mut C {
        &mut self.chip
    }

    pub fn timer(&self) -> &T {
        &self.timer
    }

    pub fn timer_mut(&mut self) -> &mut T {
        &mut self.timer
    }

    pub fn samples(&self) -> &S {
        &self.samples
    }

    pub fn transport(&self) -> &U {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut U {
        &mut self.transport
    }
}
