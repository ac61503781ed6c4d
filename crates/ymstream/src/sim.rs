//! Software stand-ins for the device peripherals, and a bench that runs the
//! firmware against an in-process host.
//!
//! The doubles record what the firmware did to them so tests can assert on
//! it. [`Bench`] wires a [`Firmware`] built from them to a [`HostStreamer`]
//! that answers every notification immediately.
use std::cell::Cell;
use std::collections::VecDeque;

use log::{debug, info};

use crate::error::{BenchError, PlayerError};
use crate::firmware::{Firmware, FirmwareConfig, FirmwareStats};
use crate::host::{HostStreamer, Upload};
use crate::hw::{
    BULK_PACKET_SIZE, ChipSink, NOTIFICATION_SIZE, OutDescriptor, PlaybackTimer, Port,
    SampleMemory, Transport,
};
use crate::usb::ControlRequest;

/// Chip sink that keeps every write it receives.
#[derive(Debug, Clone, Default)]
pub struct RecordingChip {
    writes: Vec<(Port, u8, u8)>,
    recording: bool,
    write_count: u64,
    dropped: u64,
    busy: bool,
    busy_every: Option<u64>,
    ready_checks: Cell<u64>,
    in_reset: bool,
}

impl RecordingChip {
    pub fn new() -> Self {
        Self {
            recording: true,
            in_reset: true,
            ..Self::default()
        }
    }

    /// Report busy on every `n`th readiness check. Values below 2 disable
    /// the pattern.
    pub fn with_busy_every(mut self, n: u64) -> Self {
        self.busy_every = (n >= 2).then_some(n);
        self
    }

    /// Keep writes in memory, or only count them.
    pub fn with_recording(mut self, recording: bool) -> Self {
        self.recording = recording;
        self
    }

    pub fn set_busy(&mut self, busy: bool) {
        self.busy = busy;
    }

    /// Recorded writes, oldest first.
    pub fn writes(&self) -> &[(Port, u8, u8)] {
        &self.writes
    }

    pub fn clear_writes(&mut self) {
        self.writes.clear();
    }

    /// Writes latched, recorded or not.
    pub fn write_count(&self) -> u64 {
        self.write_count
    }

    /// Writes issued while busy.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn in_reset(&self) -> bool {
        self.in_reset
    }
}

impl ChipSink for RecordingChip {
    fn ready(&self) -> bool {
        if self.busy {
            return false;
        }
        let checks = self.ready_checks.get() + 1;
        self.ready_checks.set(checks);
        match self.busy_every {
            Some(n) => checks % n != 0,
            None => true,
        }
    }

    fn write(&mut self, port: Port, register: u8, data: u8) {
        if self.busy {
            self.dropped += 1;
            return;
        }
        self.write_count += 1;
        if self.recording {
            self.writes.push((port, register, data));
        }
    }

    fn set_reset(&mut self, active: bool) {
        self.in_reset = active;
    }
}

/// Playback timer driven by the caller instead of a clock.
///
/// An instant timer runs out as soon as it is armed; a manual one waits for
/// [`advance`](Self::advance). Both add every armed count to
/// [`total_ticks`](Self::total_ticks).
#[derive(Debug, Clone, Default)]
pub struct SimTimer {
    manual: bool,
    remaining: u32,
    armed: u32,
    total_ticks: u64,
}

impl SimTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn manual() -> Self {
        Self {
            manual: true,
            ..Self::default()
        }
    }

    /// Count down `ticks` samples.
    pub fn advance(&mut self, ticks: u32) {
        self.remaining = self.remaining.saturating_sub(ticks);
    }

    /// Run the current count out.
    pub fn expire(&mut self) {
        self.remaining = 0;
    }

    /// Last armed count.
    pub fn armed(&self) -> u32 {
        self.armed
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    /// Sum of every armed count.
    pub fn total_ticks(&self) -> u64 {
        self.total_ticks
    }
}

impl PlaybackTimer for SimTimer {
    fn arm(&mut self, ticks: u32) {
        if ticks == 0 {
            return;
        }
        self.armed = ticks;
        self.total_ticks += ticks as u64;
        if self.manual {
            self.remaining = ticks;
        }
    }

    fn elapsed(&self) -> bool {
        self.remaining == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Slot {
    Idle,
    Armed,
    Full(Vec<u8>),
    Invalid,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum HostPacket {
    Data(Vec<u8>),
    Invalid,
}

/// Endpoint pair backed by queues.
///
/// Host packets wait in a queue and land in the bulk descriptors in
/// ping-pong order whenever the device arms one. Packets sent while the
/// endpoint is disabled are stalled and thrown away.
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    out_enabled: bool,
    slots: [Slot; 2],
    next_slot: usize,
    queue: VecDeque<HostPacket>,
    stalled: u64,
    in_slot: Option<[u8; NOTIFICATION_SIZE]>,
    notifications: u64,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self {
            out_enabled: false,
            slots: [Slot::Idle, Slot::Idle],
            next_slot: 0,
            queue: VecDeque::new(),
            stalled: 0,
            in_slot: None,
            notifications: 0,
        }
    }

    /// Host sends one bulk packet.
    pub fn push_out(&mut self, data: &[u8]) {
        self.push(HostPacket::Data(data.to_vec()));
    }

    /// Host sends `data` split into full-size packets.
    pub fn push_bulk(&mut self, data: &[u8]) {
        for chunk in data.chunks(BULK_PACKET_SIZE) {
            self.push_out(chunk);
        }
    }

    /// A transfer that completes with an error.
    pub fn push_invalid(&mut self) {
        self.push(HostPacket::Invalid);
    }

    fn push(&mut self, packet: HostPacket) {
        if !self.out_enabled {
            self.stalled += 1;
            return;
        }
        self.queue.push_back(packet);
        self.pump();
    }

    /// Move queued host packets into armed descriptors.
    pub fn pump(&mut self) {
        while self.out_enabled && self.slots[self.next_slot] == Slot::Armed {
            let Some(packet) = self.queue.pop_front() else {
                break;
            };
            self.slots[self.next_slot] = match packet {
                HostPacket::Data(data) => Slot::Full(data),
                HostPacket::Invalid => Slot::Invalid,
            };
            self.next_slot ^= 1;
        }
    }

    /// Host packets not yet taken by the device.
    pub fn queued_out(&self) -> usize {
        self.queue.len()
            + self
                .slots
                .iter()
                .filter(|slot| matches!(slot, Slot::Full(_) | Slot::Invalid))
                .count()
    }

    /// Packets refused because the endpoint was disabled.
    pub fn stalled(&self) -> u64 {
        self.stalled
    }

    /// Host reads the pending notification.
    pub fn take_in(&mut self) -> Option<[u8; NOTIFICATION_SIZE]> {
        self.in_slot.take()
    }

    /// Notifications submitted so far.
    pub fn notifications(&self) -> u64 {
        self.notifications
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for MemoryTransport {
    fn set_out_enabled(&mut self, enabled: bool) {
        self.out_enabled = enabled;
        if enabled {
            self.slots = [Slot::Idle, Slot::Idle];
            self.next_slot = 0;
        } else {
            self.stalled += self.queue.len() as u64;
            self.queue.clear();
        }
    }

    fn out_enabled(&self) -> bool {
        self.out_enabled
    }

    fn out_descriptor(&self, bd: usize) -> OutDescriptor {
        match self.slots.get(bd) {
            Some(Slot::Full(data)) => OutDescriptor::Received(data.len()),
            Some(Slot::Invalid) => OutDescriptor::Invalid,
            _ => OutDescriptor::Pending,
        }
    }

    fn read_out(&mut self, bd: usize, dest: &mut [u8]) {
        if let Some(Slot::Full(data)) = self.slots.get(bd) {
            let len = dest.len().min(data.len());
            dest[..len].copy_from_slice(&data[..len]);
        }
    }

    fn arm_out(&mut self, bd: usize) {
        if let Some(slot) = self.slots.get_mut(bd) {
            *slot = Slot::Armed;
        }
        self.pump();
    }

    fn in_busy(&self) -> bool {
        self.in_slot.is_some()
    }

    fn submit_in(&mut self, message: [u8; NOTIFICATION_SIZE]) {
        self.in_slot = Some(message);
        self.notifications += 1;
    }
}

/// Sample memory kept in a growable vector.
#[derive(Debug, Clone, Default)]
pub struct RamSampleMemory {
    data: Vec<u8>,
    pcm_enabled: bool,
    bytes_written: u64,
}

impl RamSampleMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Memory contents up to the highest byte written.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn pcm_enabled(&self) -> bool {
        self.pcm_enabled
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }
}

impl SampleMemory for RamSampleMemory {
    fn write(&mut self, offset: usize, data: &[u8]) {
        let end = offset + data.len();
        if self.data.len() < end {
            self.data.resize(end, 0);
        }
        self.data[offset..end].copy_from_slice(data);
        self.bytes_written += data.len() as u64;
    }

    fn set_pcm_enabled(&mut self, enabled: bool) {
        self.pcm_enabled = enabled;
    }
}

/// Firmware built from the software doubles.
pub type SimFirmware = Firmware<RecordingChip, SimTimer, RamSampleMemory, MemoryTransport>;

/// Samples per second the VGM timebase runs at.
pub const VGM_SAMPLE_RATE: u64 = 44_100;

/// Bench run limits and double behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BenchConfig {
    loops: u32,
    max_ticks: u64,
    busy_every: u64,
    record_writes: bool,
}

impl BenchConfig {
    pub fn new() -> Self {
        Self {
            loops: 1,
            max_ticks: 10 * 60 * VGM_SAMPLE_RATE,
            busy_every: 0,
            record_writes: false,
        }
    }

    /// Stop once the stream has ended this many times.
    pub fn with_loops(mut self, loops: u32) -> Self {
        self.loops = loops;
        self
    }

    /// Stop after this many samples of playback.
    pub fn with_max_ticks(mut self, ticks: u64) -> Self {
        self.max_ticks = ticks;
        self
    }

    /// Make the chip report busy on every `n`th readiness check.
    pub fn with_busy_every(mut self, n: u64) -> Self {
        self.busy_every = n;
        self
    }

    pub fn with_record_writes(mut self, enabled: bool) -> Self {
        self.record_writes = enabled;
        self
    }

    pub fn loops(&self) -> u32 {
        self.loops
    }

    pub fn max_ticks(&self) -> u64 {
        self.max_ticks
    }

    pub fn busy_every(&self) -> u64 {
        self.busy_every
    }

    pub fn record_writes(&self) -> bool {
        self.record_writes
    }
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Polls allowed for one upload before it counts as stalled.
const UPLOAD_POLL_LIMIT: usize = 1 << 20;

/// What happened during a bench run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BenchReport {
    pub loops: u32,
    /// Samples of playback.
    pub ticks: u64,
    pub chip_writes: u64,
    pub refills_served: u64,
    pub notifications_ignored: u64,
    pub firmware: FirmwareStats,
    pub error: Option<PlayerError>,
}

impl BenchReport {
    pub fn seconds(&self) -> f64 {
        self.ticks as f64 / VGM_SAMPLE_RATE as f64
    }
}

/// Device and host in one process.
pub struct Bench {
    config: BenchConfig,
    firmware: SimFirmware,
    host: HostStreamer,
}

impl Bench {
    pub fn new(firmware_config: FirmwareConfig, config: BenchConfig, host: HostStreamer) -> Self {
        let chip = RecordingChip::new()
            .with_busy_every(config.busy_every())
            .with_recording(config.record_writes());
        let firmware = Firmware::new(
            firmware_config,
            chip,
            SimTimer::manual(),
            RamSampleMemory::new(),
            MemoryTransport::new(),
        );
        Self {
            config,
            firmware,
            host,
        }
    }

    pub fn firmware(&self) -> &SimFirmware {
        &self.firmware
    }

    pub fn firmware_mut(&mut self) -> &mut SimFirmware {
        &mut self.firmware
    }

    pub fn host(&self) -> &HostStreamer {
        &self.host
    }

    /// Upload everything, start playback and run until the loop count, the
    /// tick limit or a fatal error.
    pub fn run(&mut self) -> Result<BenchReport, BenchError> {
        self.firmware.configure_usb();

        for upload in self.host.initial_uploads() {
            self.upload(&upload)?;
        }
        self.start()?;

        while self.firmware.playback_active() {
            let player = self.firmware.player();
            if player.loop_count() >= self.config.loops()
                || self.firmware.timer().total_ticks() >= self.config.max_ticks()
            {
                break;
            }
            // Time only passes here, so uploads finish between two steps
            self.firmware.timer_mut().expire();
            self.firmware.poll();
            self.serve_notification()?;
        }

        let report = self.report();
        info!(
            "bench finished after {:.2}s, {} loops, {} refills",
            report.seconds(),
            report.loops,
            report.refills_served
        );
        Ok(report)
    }

    /// Send `START_PLAYBACK` and poll until the device has started.
    pub fn start(&mut self) -> Result<(), BenchError> {
        self.control(ControlRequest::StartPlayback)?;
        self.host.reset_sequence();
        self.firmware.poll();
        Ok(())
    }

    /// Answer the pending notification, if any.
    pub fn serve_notification(&mut self) -> Result<(), BenchError> {
        let Some(message) = self.firmware.transport_mut().take_in() else {
            return Ok(());
        };
        if let Some(upload) = self.host.handle_notification(&message) {
            self.upload(&upload)?;
        }
        Ok(())
    }

    /// Run one upload to completion, polling the firmware as it goes.
    pub fn upload(&mut self, upload: &Upload) -> Result<(), BenchError> {
        debug!(
            "upload {:?}: 0x{:X} bytes at 0x{:X}",
            upload.mode,
            upload.data.len(),
            upload.offset
        );
        self.control(upload.write_mode_request())?;
        for packet in upload.packets() {
            self.firmware.transport_mut().push_out(packet);
        }

        for _ in 0..UPLOAD_POLL_LIMIT {
            if !self.firmware.session().active() {
                return Ok(());
            }
            self.firmware.poll();
        }
        Err(BenchError::UploadStalled {
            offset: upload.offset as usize,
            remaining: self.firmware.session().remaining(),
        })
    }

    fn control(&mut self, request: ControlRequest) -> Result<(), BenchError> {
        let (setup, data) = request.encode();
        self.firmware.control(&setup, &data)?;
        Ok(())
    }

    pub fn report(&self) -> BenchReport {
        BenchReport {
            loops: self.firmware.player().loop_count(),
            ticks: self.firmware.timer().total_ticks(),
            chip_writes: self.firmware.chip().write_count(),
            refills_served: self.host.served(),
            notifications_ignored: self.host.ignored(),
            firmware: *self.firmware.stats(),
            error: self.firmware.last_error(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_busy_pattern() {
        let chip = RecordingChip::new().with_busy_every(3);
        let pattern: Vec<bool> = (0..6).map(|_| chip.ready()).collect();
        assert_eq!(pattern, vec![true, true, false, true, true, false]);
    }

    #[test]
    fn test_manual_timer() {
        let mut timer = SimTimer::manual();
        assert!(timer.elapsed());
        timer.arm(0);
        assert!(timer.elapsed());
        timer.arm(100);
        assert!(!timer.elapsed());
        timer.advance(60);
        assert_eq!(timer.remaining(), 40);
        timer.advance(60);
        assert!(timer.elapsed());
        assert_eq!(timer.total_ticks(), 100);
    }

    #[test]
    fn test_transport_ping_pong() {
        let mut transport = MemoryTransport::new();
        transport.push_out(&[1]);
        assert_eq!(transport.stalled(), 1);

        transport.set_out_enabled(true);
        transport.push_out(&[1, 2]);
        assert_eq!(transport.out_descriptor(0), OutDescriptor::Pending);

        transport.arm_out(0);
        transport.arm_out(1);
        transport.push_out(&[3, 4, 5]);
        assert_eq!(transport.out_descriptor(0), OutDescriptor::Received(2));
        assert_eq!(transport.out_descriptor(1), OutDescriptor::Received(3));

        let mut dest = [0u8; 3];
        transport.read_out(1, &mut dest);
        assert_eq!(dest, [3, 4, 5]);
    }

    #[test]
    fn test_bench_upload_sends_packets() {
        let host = HostStreamer::from_parts(Vec::new(), Vec::new());
        let mut bench = Bench::new(FirmwareConfig::new(), BenchConfig::new(), host);
        bench.firmware_mut().configure_usb();

        let upload = Upload {
            mode: crate::usb::WriteMode::PcmA,
            offset: 0x40,
            data: (0..100u8).collect(),
        };
        bench.upload(&upload).unwrap();

        assert_eq!(bench.firmware().stats().packets, 2);
        assert_eq!(bench.firmware().stats().bytes_received, 100);
        let samples = bench.firmware().samples();
        assert_eq!(&samples.data()[0x40..0x44], &[3, 2, 1, 0]);
        assert_eq!(&samples.data()[0xA0..0xA4], &[99, 98, 97, 96]);
    }

    #[test]
    fn test_sample_memory_grows() {
        let mut memory = RamSampleMemory::new();
        memory.write(4, &[9, 9]);
        assert_eq!(memory.data(), &[0, 0, 0, 0, 9, 9]);
    }
}
