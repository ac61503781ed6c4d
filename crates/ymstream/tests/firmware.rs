use ymstream::error::{PlayerError, ProtocolError};
use ymstream::firmware::{FirmwareConfig, LiveControl};
use ymstream::host::HostStreamer;
use ymstream::hw::{Port, SampleMemory};
use ymstream::preprocess::preprocess;
use ymstream::sim::{
    Bench, BenchConfig, MemoryTransport, RamSampleMemory, RecordingChip, SimFirmware, SimTimer,
};
use ymstream::usb::{ControlRequest, WriteMode};
use ymstream::{Firmware, FmChannels};

fn firmware_with(config: FirmwareConfig) -> SimFirmware {
    let mut firmware = Firmware::new(
        config,
        RecordingChip::new(),
        SimTimer::manual(),
        RamSampleMemory::new(),
        MemoryTransport::new(),
    );
    firmware.configure_usb();
    firmware
}

fn firmware() -> SimFirmware {
    firmware_with(FirmwareConfig::new())
}

fn header(loop_offset: Option<usize>) -> Vec<u8> {
    let mut bytes = vec![0u8; 0x40];
    bytes[0..4].copy_from_slice(b"Vgm ");
    bytes[0x34..0x38].copy_from_slice(&0x0Cu32.to_le_bytes());
    if let Some(offset) = loop_offset {
        bytes[0x1C..0x20].copy_from_slice(&((offset - 0x1C) as u32).to_le_bytes());
    }
    bytes
}

fn vgm(commands: &[u8]) -> Vec<u8> {
    let mut bytes = header(None);
    bytes.extend_from_slice(commands);
    bytes
}

fn upload(firmware: &mut SimFirmware, mode: WriteMode, offset: u32, data: &[u8]) {
    let (setup, payload) = ControlRequest::SetWriteMode {
        mode,
        start_offset: offset,
        length: data.len() as u32,
    }
    .encode();
    firmware.control(&setup, &payload).unwrap();
    firmware.transport_mut().push_bulk(data);
    for _ in 0..10_000 {
        if !firmware.session().active() {
            return;
        }
        firmware.poll();
    }
    panic!("upload did not complete");
}

/// Upload `stream` as the linear area and start playing it.
fn play(firmware: &mut SimFirmware, stream: &[u8]) {
    upload(firmware, WriteMode::Vgm, 0, stream);
    let (setup, payload) = ControlRequest::StartPlayback.encode();
    firmware.control(&setup, &payload).unwrap();
    firmware.poll();
    assert!(firmware.playback_active());
}

/// Let the current wait run out and poll once.
fn tick(firmware: &mut SimFirmware) {
    firmware.timer_mut().expire();
    firmware.poll();
}

#[test]
fn test_solo_channel_filters_log_key_ons() {
    let mut firmware = firmware();
    play(
        &mut firmware,
        &vgm(&[0x58, 0x28, 0xF0, 0x58, 0x28, 0xF2, 0x62, 0x66]),
    );

    firmware.live(LiveControl::SoloFm(2));
    assert_eq!(firmware.queued_chip_writes(), 5);
    tick(&mut firmware);

    // Key-offs for the channels that left the log, then the one key-on
    // still allowed
    assert_eq!(
        firmware.chip().writes(),
        &[
            (Port::A, 0x28, 0x00),
            (Port::A, 0x28, 0x01),
            (Port::A, 0x28, 0x04),
            (Port::A, 0x28, 0x05),
            (Port::A, 0x28, 0x06),
            (Port::A, 0x28, 0xF2),
        ]
    );
}

#[test]
fn test_pcm_unmute_restores_last_level() {
    let mut firmware = firmware();
    play(
        &mut firmware,
        &vgm(&[0x59, 0x01, 0x2A, 0x62, 0x59, 0x00, 0x01, 0x62, 0x66]),
    );
    tick(&mut firmware);

    firmware.live(LiveControl::SetPcmMuted(true));
    firmware.poll();
    assert!(firmware.pcm_muted());

    // The log's ADPCM-A key-on is held back while muted
    tick(&mut firmware);

    firmware.live(LiveControl::SetPcmMuted(false));
    firmware.poll();
    assert!(!firmware.pcm_muted());

    assert_eq!(
        firmware.chip().writes(),
        &[
            (Port::B, 0x01, 0x2A),
            (Port::B, 0x00, 0xBF),
            (Port::B, 0x01, 0x00),
            (Port::A, 0x10, 0x80),
            (Port::A, 0x10, 0x00),
            (Port::B, 0x01, 0x2A),
        ]
    );
}

#[test]
fn test_pcm_upload_swaps_words_back() {
    let mut firmware = firmware();
    upload(
        &mut firmware,
        WriteMode::PcmA,
        0x100,
        &[1, 2, 3, 4, 5, 6, 7, 8],
    );

    let samples = firmware.samples();
    assert_eq!(&samples.data()[0x100..0x108], &[4, 3, 2, 1, 8, 7, 6, 5]);
    assert!(!samples.pcm_enabled());
}

#[test]
fn test_pcm_upload_past_capacity_is_dropped() {
    let mut firmware = firmware();
    let offset = (RamSampleMemory::CAPACITY - 4) as u32;
    upload(&mut firmware, WriteMode::PcmB, offset, &[0xAA; 8]);

    assert_eq!(firmware.samples().bytes_written(), 0);
    assert_eq!(
        firmware.last_protocol_error(),
        Some(ProtocolError::WriteOutOfBounds {
            offset: RamSampleMemory::CAPACITY - 4,
            length: 8,
            capacity: RamSampleMemory::CAPACITY,
        })
    );
}

#[test]
fn test_fatal_error_mutes_and_waits_for_start() {
    let mut firmware = firmware();
    let stream = vgm(&[0x62, 0xB7, 0x00, 0x00]);
    play(&mut firmware, &stream);
    tick(&mut firmware);
    tick(&mut firmware);

    assert!(!firmware.playback_active());
    assert_eq!(
        firmware.last_error(),
        Some(PlayerError::UnexpectedOpcode {
            opcode: 0xB7,
            offset: 0x41,
        })
    );

    // The mute sequence drains on the following poll
    firmware.poll();
    assert_eq!(firmware.queued_chip_writes(), 0);
    assert_eq!(
        firmware.chip().writes(),
        &[
            (Port::A, 0x28, 0x00),
            (Port::A, 0x28, 0x01),
            (Port::A, 0x28, 0x02),
            (Port::A, 0x28, 0x04),
            (Port::A, 0x28, 0x05),
            (Port::A, 0x28, 0x06),
            (Port::A, 0x07, 0xFF),
            (Port::B, 0x00, 0xBF),
            (Port::B, 0x01, 0x00),
            (Port::A, 0x10, 0x80),
            (Port::A, 0x10, 0x00),
        ]
    );

    // Only a new start resumes
    tick(&mut firmware);
    assert!(!firmware.playback_active());
    let (setup, payload) = ControlRequest::StartPlayback.encode();
    firmware.control(&setup, &payload).unwrap();
    firmware.poll();
    assert!(firmware.playback_active());
    assert_eq!(firmware.last_error(), None);
}

#[test]
fn test_refill_upload_keeps_playing() {
    let mut firmware = firmware();
    play(&mut firmware, &vgm(&[0x62, 0x62, 0x66]));

    upload(&mut firmware, WriteMode::Vgm, 0x14000, &[0x62; 0x80]);
    assert!(firmware.playback_active());

    upload(&mut firmware, WriteMode::Vgm, 0x100, &[0x62; 0x40]);
    assert!(!firmware.playback_active());
}

#[test]
fn test_linear_upload_can_keep_playing() {
    let config = FirmwareConfig::new().with_stop_on_linear_upload(false);
    let mut firmware = firmware_with(config);
    play(&mut firmware, &vgm(&[0x62, 0x62, 0x66]));

    upload(&mut firmware, WriteMode::Vgm, 0x100, &[0x62; 0x40]);
    assert!(firmware.playback_active());

    // Sample uploads always stop playback
    upload(&mut firmware, WriteMode::PcmA, 0, &[0; 4]);
    assert!(!firmware.playback_active());
}

#[test]
fn test_midi_plays_channels_outside_the_mask() {
    let mut firmware = firmware();

    // Everything belongs to the log: notes have nowhere to go
    for byte in [0x90, 60, 100] {
        firmware.live(LiveControl::Midi(byte));
    }
    assert_eq!(firmware.queued_chip_writes(), 0);

    firmware.live(LiveControl::SetFmMask(FmChannels::all() - FmChannels::CH1));
    for byte in [0x90, 60, 100, 0x80, 61, 0, 0x80, 60, 0] {
        firmware.live(LiveControl::Midi(byte));
    }
    firmware.poll();

    assert_eq!(
        firmware.chip().writes(),
        &[
            (Port::A, 0x28, 0x00),
            (Port::A, 0xA4, 0x2A),
            (Port::A, 0xA0, 0x69),
            (Port::A, 0x28, 0xF0),
            (Port::A, 0x28, 0x00),
        ]
    );
}

#[test]
fn test_unmute_all_clears_filters() {
    let mut firmware = firmware();
    firmware.live(LiveControl::SoloFm(4));
    firmware.live(LiveControl::SetPitchFilter(true));
    firmware.live(LiveControl::SetPcmMuted(true));

    firmware.live(LiveControl::UnmuteAll);
    let filter = firmware.player().filter();
    assert_eq!(filter.fm_key_on_mask(), FmChannels::all());
    assert!(!filter.filter_fm_pitch());
    assert!(!filter.filter_pcm_key_on());
    assert!(!firmware.pcm_muted());
}

/// Unprocessed VGM with one ADPCM-A block ahead of `units` seven-byte groups
/// (two writes and a one-sample wait) and a loop at `loop_unit`.
fn looping_vgm(units: usize, loop_unit: usize, rom: &[u8]) -> (Vec<u8>, Vec<(Port, u8, u8)>) {
    let block_len = 15 + rom.len();
    let mut bytes = header(Some(0x40 + block_len + 7 * loop_unit));

    bytes.extend_from_slice(&[0x67, 0x66, 0x82]);
    bytes.extend_from_slice(&(8 + rom.len() as u32).to_le_bytes());
    bytes.extend_from_slice(&0x1000u32.to_le_bytes());
    bytes.extend_from_slice(&0x200u32.to_le_bytes());
    bytes.extend_from_slice(rom);

    let mut writes = Vec::with_capacity(units * 2);
    for i in 0..units {
        let register = 0xB0 + (i % 3) as u8;
        let data = i as u8;
        bytes.extend_from_slice(&[0x58, register, data, 0x59, register, !data, 0x70]);
        writes.push((Port::A, register, data));
        writes.push((Port::B, register, !data));
    }
    bytes.push(0x66);
    (bytes, writes)
}

fn run_bench(busy_every: u64) {
    let units = 0x1A000 / 7;
    let loop_unit = (0x13000 - 0x40) / 7;
    let rom: Vec<u8> = (0..16u8).collect();
    let (original, expected) = looping_vgm(units, loop_unit, &rom);

    let prepared = preprocess(&original).unwrap();
    let config = BenchConfig::new()
        .with_loops(2)
        .with_busy_every(busy_every)
        .with_record_writes(true);
    let mut bench = Bench::new(FirmwareConfig::new(), config, HostStreamer::new(prepared));
    let report = bench.run().unwrap();

    assert_eq!(report.loops, 2);
    assert_eq!(report.error, None);
    assert_eq!(report.notifications_ignored, 0);
    assert!(report.refills_served > 0);
    assert!(report.ticks >= (2 * units - loop_unit) as u64);

    // First pass plays everything, the second replays from the loop point
    let writes = bench.firmware().chip().writes();
    let first = 2 * units;
    let second = 2 * (units - loop_unit);
    assert_eq!(&writes[..first], expected.as_slice());
    assert_eq!(&writes[first..first + second], &expected[2 * loop_unit..]);

    // Sample ROM lands in its original byte order
    let samples = bench.firmware().samples();
    assert_eq!(&samples.data()[0x200..0x210], rom.as_slice());
    assert!(samples.pcm_enabled());
}

#[test]
fn test_bench_streams_looping_file() {
    run_bench(0);
}

#[test]
fn test_bench_survives_busy_chip() {
    run_bench(3);
}
