use ymstream::error::ProtocolError;
use ymstream::firmware::FirmwareConfig;
use ymstream::hw::Transport;
use ymstream::sim::{MemoryTransport, RamSampleMemory, RecordingChip, SimFirmware, SimTimer};
use ymstream::usb::control::PLACEHOLDER_STATUS;
use ymstream::usb::notify::STATUS_PLAYBACK_STARTED;
use ymstream::usb::{ControlRequest, ControlResponse, Notification, SetupPacket, WriteMode};
use ymstream::{BufferRequest, Firmware};

fn firmware() -> SimFirmware {
    let mut firmware = Firmware::new(
        FirmwareConfig::new(),
        RecordingChip::new(),
        SimTimer::manual(),
        RamSampleMemory::new(),
        MemoryTransport::new(),
    );
    firmware.configure_usb();
    firmware
}

fn vgm(commands: &[u8]) -> Vec<u8> {
    let mut bytes = vec![0u8; 0x40];
    bytes[0..4].copy_from_slice(b"Vgm ");
    bytes[0x34..0x38].copy_from_slice(&0x0Cu32.to_le_bytes());
    bytes.extend_from_slice(commands);
    bytes
}

fn send(
    firmware: &mut SimFirmware,
    request: ControlRequest,
) -> Result<ControlResponse, ProtocolError> {
    let (setup, data) = request.encode();
    firmware.control(&setup, &data)
}

fn open(firmware: &mut SimFirmware, mode: WriteMode, offset: u32, length: usize) {
    send(
        firmware,
        ControlRequest::SetWriteMode {
            mode,
            start_offset: offset,
            length: length as u32,
        },
    )
    .unwrap();
}

fn upload(firmware: &mut SimFirmware, mode: WriteMode, offset: u32, data: &[u8]) {
    open(firmware, mode, offset, data.len());
    firmware.transport_mut().push_bulk(data);
    for _ in 0..10_000 {
        if !firmware.session().active() {
            return;
        }
        firmware.poll();
    }
    panic!("upload did not complete");
}

fn start(firmware: &mut SimFirmware) {
    send(firmware, ControlRequest::StartPlayback).unwrap();
    firmware.poll();
}

/// Poll once and collect the notification sent, if any.
fn next_notification(firmware: &mut SimFirmware) -> Option<Notification> {
    firmware.poll();
    firmware
        .transport_mut()
        .take_in()
        .and_then(|message| Notification::decode(&message))
}

fn buffering(sequence: u32, target: u32, stream: u32) -> Notification {
    Notification::buffering(
        sequence,
        &BufferRequest {
            target_offset: target,
            stream_offset: stream,
            length: 0x2000,
        },
    )
}

#[test]
fn test_playback_start_reports_status_then_preload() {
    let mut firmware = firmware();
    upload(&mut firmware, WriteMode::Vgm, 0, &vgm(&[0x62, 0x66]));
    start(&mut firmware);
    assert!(firmware.playback_active());

    assert_eq!(
        next_notification(&mut firmware),
        Some(Notification::StatusReport {
            status: STATUS_PLAYBACK_STARTED
        })
    );
    assert_eq!(
        next_notification(&mut firmware),
        Some(buffering(0, 0x14000, 0x12000))
    );
    assert_eq!(
        next_notification(&mut firmware),
        Some(buffering(1, 0x16000, 0x14000))
    );
    assert_eq!(next_notification(&mut firmware), None);
    assert_eq!(firmware.session().sequence_counter(), 2);
}

#[test]
fn test_sequence_restarts_with_each_playback() {
    let mut firmware = firmware();
    upload(&mut firmware, WriteMode::Vgm, 0, &vgm(&[0x62, 0x66]));
    start(&mut firmware);
    while next_notification(&mut firmware).is_some() {}
    assert_eq!(firmware.session().sequence_counter(), 2);

    start(&mut firmware);
    assert_eq!(firmware.session().sequence_counter(), 0);
    assert!(matches!(
        next_notification(&mut firmware),
        Some(Notification::StatusReport { .. })
    ));
    assert_eq!(
        next_notification(&mut firmware),
        Some(buffering(0, 0x14000, 0x12000))
    );
}

#[test]
fn test_busy_slot_keeps_notifications_in_order() {
    let mut firmware = firmware();
    upload(&mut firmware, WriteMode::Vgm, 0, &vgm(&[0x62, 0x66]));
    start(&mut firmware);

    // The host does not read: the first notification occupies the slot
    for _ in 0..5 {
        firmware.poll();
    }
    assert_eq!(firmware.pending_notifications(), 2);
    assert!(firmware.stats().notify_busy >= 4);
    assert_eq!(firmware.session().sequence_counter(), 0);

    let mut tags = Vec::new();
    while let Some(message) = firmware.transport_mut().take_in() {
        tags.push(Notification::decode(&message));
        firmware.poll();
    }
    assert_eq!(
        tags,
        vec![
            Some(Notification::StatusReport {
                status: STATUS_PLAYBACK_STARTED
            }),
            Some(buffering(0, 0x14000, 0x12000)),
            Some(buffering(1, 0x16000, 0x14000)),
        ]
    );
}

#[test]
fn test_exact_length_upload_lands_in_buffer() {
    let mut firmware = firmware();
    let data: Vec<u8> = (0..100u8).collect();
    upload(&mut firmware, WriteMode::Vgm, 0x14000, &data);

    assert!(!firmware.session().active());
    assert_eq!(firmware.session().write_offset(), 0x14000 + 100);
    assert_eq!(&firmware.buffer().as_slice()[0x14000..0x14064], data.as_slice());
    assert_eq!(firmware.stats().packets, 2);
    assert_eq!(firmware.last_protocol_error(), None);
}

#[test]
fn test_overrun_stalls_until_next_write_mode() {
    let mut firmware = firmware();
    open(&mut firmware, WriteMode::Vgm, 0, 40);
    firmware.transport_mut().push_out(&[0x11; 64]);
    firmware.poll();

    assert_eq!(
        firmware.last_protocol_error(),
        Some(ProtocolError::ProtocolOverrun {
            received: 64,
            remaining: 40,
        })
    );
    assert_eq!(firmware.stats().protocol_errors, 1);
    assert!(!firmware.session().active());
    assert!(!firmware.transport().out_enabled());
    assert_eq!(firmware.buffer().as_slice()[0], 0);

    // Stalled until the host negotiates again
    firmware.transport_mut().push_out(&[0x22; 8]);
    assert_eq!(firmware.transport().stalled(), 1);

    upload(&mut firmware, WriteMode::Vgm, 0, &[0x33; 8]);
    assert_eq!(&firmware.buffer().as_slice()[..8], &[0x33; 8]);
}

#[test]
fn test_start_waits_for_upload_to_finish() {
    let mut firmware = firmware();
    let data = vgm(&[0x62, 0x66]);
    open(&mut firmware, WriteMode::Vgm, 0, data.len());
    firmware.transport_mut().push_out(&data[..64]);

    send(&mut firmware, ControlRequest::StartPlayback).unwrap();
    firmware.poll();
    assert!(!firmware.playback_active());
    assert!(firmware.session().playback_start_pending());

    firmware.transport_mut().push_out(&data[64..]);
    firmware.poll();
    assert!(firmware.playback_active());
    assert!(!firmware.session().playback_start_pending());
}

#[test]
fn test_control_requests() {
    let mut firmware = firmware();

    assert_eq!(
        send(&mut firmware, ControlRequest::ReadStatus),
        Ok(ControlResponse::Data(PLACEHOLDER_STATUS))
    );

    let unknown = SetupPacket::vendor(0x05, 0, 0);
    assert_eq!(
        firmware.control(&unknown, &[]),
        Err(ProtocolError::UnknownRequest(0x05))
    );
    assert_eq!(
        firmware.last_protocol_error(),
        Some(ProtocolError::UnknownRequest(0x05))
    );

    let mut standard = SetupPacket::vendor(0x01, 0, 0);
    standard.request_type = 0x00;
    assert_eq!(firmware.control(&standard, &[]), Ok(ControlResponse::Continue));

    let bad_mode = SetupPacket::vendor(0x00, 7, 8);
    assert_eq!(
        firmware.control(&bad_mode, &[0; 8]),
        Err(ProtocolError::UnknownWriteMode(7))
    );

    let short = SetupPacket::vendor(0x00, 2, 4);
    assert_eq!(
        firmware.control(&short, &[0; 4]),
        Err(ProtocolError::PayloadLength(4))
    );

    let zero = ControlRequest::SetWriteMode {
        mode: WriteMode::Vgm,
        start_offset: 0,
        length: 0,
    };
    assert_eq!(send(&mut firmware, zero), Err(ProtocolError::ZeroLength));
}
