use ymstream::error::PreprocessError;
use ymstream::firmware::FirmwareConfig;
use ymstream::host::HostStreamer;
use ymstream::preprocess::{PcmKind, preprocess};
use ymstream::sim::{Bench, BenchConfig};
use ymstream::usb::WriteMode;
use ymstream::vgm::{LINEAR_END, VgmHeaderField};

fn header() -> Vec<u8> {
    let mut bytes = vec![0u8; 0x40];
    bytes[0..4].copy_from_slice(b"Vgm ");
    bytes[0x34..0x38].copy_from_slice(&0x0Cu32.to_le_bytes());
    bytes
}

fn set_loop(bytes: &mut [u8], absolute: usize) {
    bytes[0x1C..0x20].copy_from_slice(&((absolute - 0x1C) as u32).to_le_bytes());
}

fn rom_block(block_type: u8, rom_size: u32, offset: u32, data: &[u8]) -> Vec<u8> {
    let mut block = vec![0x67, 0x66, block_type];
    block.extend_from_slice(&(8 + data.len() as u32).to_le_bytes());
    block.extend_from_slice(&rom_size.to_le_bytes());
    block.extend_from_slice(&offset.to_le_bytes());
    block.extend_from_slice(data);
    block
}

#[test]
fn test_blocks_are_stripped_and_swapped() {
    let mut vgm = header();
    vgm.extend_from_slice(&[0x58, 0x28, 0xF0]);
    vgm.extend(rom_block(0x82, 0x10000, 0x0, &[1, 2, 3, 4, 5, 6, 7, 8]));
    vgm.extend(rom_block(0x83, 0x20000, 0x400, &[9, 10, 11, 12]));
    vgm.extend_from_slice(&[0x61, 0x10, 0x00, 0x62, 0x66]);
    // GD3 and padding after the end are dropped
    vgm.extend_from_slice(b"Gd3 \x00\x01\x00\x00");

    let prepared = preprocess(&vgm).unwrap();

    let mut expected = header();
    expected.extend_from_slice(&[0x58, 0x28, 0xF0, 0x61, 0x10, 0x00, 0x62, 0x66]);
    assert_eq!(&prepared.data[0x40..], &expected[0x40..]);

    assert_eq!(prepared.pcm_blocks.len(), 2);
    let a = &prepared.pcm_blocks[0];
    assert_eq!(a.kind, PcmKind::A);
    assert_eq!(a.rom_size, 0x10000);
    assert_eq!(a.data, vec![4, 3, 2, 1, 8, 7, 6, 5]);
    let b = &prepared.pcm_blocks[1];
    assert_eq!(b.kind, PcmKind::B);
    assert_eq!(b.rom_offset, 0x400);
    // ADPCM-B goes to the bank after ADPCM-A
    assert_eq!(b.offset, 0x10400);
    assert_eq!(b.data, vec![12, 11, 10, 9]);

    let stats = prepared.stats;
    assert_eq!(stats.port0_writes, 1);
    assert_eq!(stats.waits, 2);
    assert_eq!(stats.wait_samples, 16 + 735);
    assert_eq!(stats.data_blocks, 2);
    assert!(stats.end_of_stream);
}

#[test]
fn test_header_offsets_are_rewritten() {
    let mut vgm = header();
    vgm.extend(rom_block(0x82, 0x1000, 0x0, &[0; 16]));
    let loop_point = vgm.len();
    vgm.extend_from_slice(&[0x58, 0x28, 0xF1, 0x62, 0x66]);
    set_loop(&mut vgm, loop_point);
    // Bogus GD3 pointer
    vgm[0x14..0x18].copy_from_slice(&0x100u32.to_le_bytes());

    let prepared = preprocess(&vgm).unwrap();
    let data = &prepared.data;
    assert_eq!(VgmHeaderField::DataOffset.read_relative(data), Ok(0x40));
    assert_eq!(VgmHeaderField::LoopOffset.read_relative(data), Ok(0x40));
    assert_eq!(&prepared.data[0x14..0x18], &[0, 0, 0, 0]);

    let eof = u32::from_le_bytes(prepared.data[0x04..0x08].try_into().unwrap());
    assert_eq!(eof as usize + 4, prepared.data.len());
}

#[test]
fn test_loop_off_command_boundary_is_dropped() {
    let mut vgm = header();
    vgm.extend_from_slice(&[0x58, 0x28, 0xF1, 0x62, 0x66]);
    set_loop(&mut vgm, 0x41);

    let prepared = preprocess(&vgm).unwrap();
    assert_eq!(&prepared.data[0x1C..0x20], &[0, 0, 0, 0]);
}

#[test]
fn test_contiguous_blocks_merge() {
    let mut vgm = header();
    vgm.extend(rom_block(0x82, 0x1000, 0x000, &[0x11; 0x100]));
    vgm.extend(rom_block(0x82, 0x1000, 0x100, &[0x22; 0x100]));
    vgm.extend(rom_block(0x82, 0x1000, 0x300, &[0x33; 0x100]));
    vgm.push(0x66);

    let prepared = preprocess(&vgm).unwrap();
    assert_eq!(prepared.stats.data_blocks, 3);
    assert_eq!(prepared.stats.merged_blocks, 1);
    assert_eq!(prepared.pcm_blocks.len(), 2);
    assert_eq!(prepared.pcm_blocks[0].data.len(), 0x200);
    assert_eq!(prepared.pcm_blocks[0].data[0x100], 0x22);
    assert_eq!(prepared.pcm_blocks[1].offset, 0x300);
}

#[test]
fn test_rejections() {
    assert!(matches!(
        preprocess(b"RIFF\0\0\0\0"),
        Err(PreprocessError::InvalidIdent(ident)) if &ident == b"RIFF"
    ));

    let mut unknown = header();
    unknown.extend_from_slice(&[0x62, 0xB2, 0x00, 0x00, 0x66]);
    assert_eq!(
        preprocess(&unknown),
        Err(PreprocessError::UnknownCommand {
            opcode: 0xB2,
            offset: 0x41,
        })
    );

    let mut block = header();
    block.extend(rom_block(0x81, 0x1000, 0, &[0; 4]));
    assert_eq!(
        preprocess(&block),
        Err(PreprocessError::UnsupportedBlock {
            block_type: 0x81,
            offset: 0x40,
        })
    );

    let mut empty_rom = header();
    empty_rom.extend(rom_block(0x82, 0, 0, &[0; 4]));
    assert_eq!(preprocess(&empty_rom), Err(PreprocessError::EmptyRomSize(0x40)));

    let mut marker = header();
    let mut block = rom_block(0x82, 0x1000, 0, &[0; 4]);
    block[1] = 0x67;
    marker.extend(block);
    assert_eq!(
        preprocess(&marker),
        Err(PreprocessError::BadBlockMarker {
            marker: 0x67,
            offset: 0x40,
        })
    );

    let mut wrapping = header();
    wrapping.extend(rom_block(0x83, 0x1000, 0xFFFF_FFF0, &[0; 0x20]));
    assert_eq!(
        preprocess(&wrapping),
        Err(PreprocessError::BlockOutOfRange {
            rom_offset: 0xFFFF_FFF0,
            length: 0x20,
            offset: 0x40,
        })
    );

    // One 64 KiB bank per block, one more than sample memory holds
    let mut full = header();
    for bank in 0..=0x80u32 {
        full.extend(rom_block(0x82, 0x100_0000, bank << 16, &[0; 4]));
    }
    full.push(0x66);
    assert!(matches!(
        preprocess(&full),
        Err(PreprocessError::SampleMemoryFull { .. })
    ));

    let mut truncated = header();
    truncated.extend_from_slice(&[0x58, 0x28]);
    assert!(matches!(
        preprocess(&truncated),
        Err(PreprocessError::Truncated(_))
    ));
}

#[test]
fn test_host_uploads_samples_before_stream() {
    let mut vgm = header();
    vgm.extend(rom_block(0x83, 0x1000, 0x80, &[0; 8]));
    vgm.extend(std::iter::repeat_n(0x70, LINEAR_END));
    vgm.push(0x66);

    let host = HostStreamer::new(preprocess(&vgm).unwrap());
    let uploads = host.initial_uploads();

    assert_eq!(uploads.len(), 2);
    assert_eq!(uploads[0].mode, WriteMode::PcmB);
    assert_eq!(uploads[0].offset, 0x80);
    assert_eq!(uploads[1].mode, WriteMode::Vgm);
    assert_eq!(uploads[1].offset, 0);
    assert_eq!(uploads[1].data.len(), LINEAR_END);
    assert_eq!(&uploads[1].data[..4], b"Vgm ");
}

#[test]
fn test_a_and_b_samples_do_not_overlap() {
    let mut vgm = header();
    vgm.extend(rom_block(0x83, 0x1000, 0, &[0xBB; 8]));
    vgm.extend(rom_block(0x82, 0x1000, 0, &[0xAA; 8]));
    // ADPCM-A ch1 start high, ADPCM-B start and end high
    vgm.extend_from_slice(&[0x59, 0x18, 0x00, 0x58, 0x13, 0x00, 0x58, 0x15, 0x00]);
    vgm.extend_from_slice(&[0x62, 0x66]);

    let prepared = preprocess(&vgm).unwrap();
    let placed: Vec<_> = prepared
        .pcm_blocks
        .iter()
        .map(|block| (block.kind, block.rom_offset, block.offset))
        .collect();
    assert_eq!(placed, vec![(PcmKind::A, 0, 0), (PcmKind::B, 0, 0x10000)]);
    assert_eq!(
        &prepared.data[0x40..0x49],
        &[0x59, 0x18, 0x00, 0x58, 0x13, 0x01, 0x58, 0x15, 0x01]
    );
    assert_eq!(prepared.stats.bank_writes, 3);
    assert_eq!(prepared.stats.remapped_bank_writes, 2);

    let mut bench = Bench::new(
        FirmwareConfig::new(),
        BenchConfig::new(),
        HostStreamer::new(prepared),
    );
    bench.run().unwrap();
    let samples = bench.firmware().samples().data();
    assert_eq!(&samples[..8], &[0xAA; 8]);
    assert_eq!(&samples[0x10000..0x10008], &[0xBB; 8]);
}

#[test]
fn test_samples_are_kept_within_one_megabyte() {
    let mut vgm = header();
    // Fifteen small blocks fill banks 0-14
    for bank in 0..15u32 {
        vgm.extend(rom_block(0x82, 0x100_0000, bank << 16, &[0; 4]));
    }
    // Would run from 0xF8000 across the 1 MiB boundary
    vgm.extend(rom_block(0x82, 0x100_0000, 0x20_8000, &[0x11; 0x10000]));
    vgm.extend_from_slice(&[0x59, 0x18, 0x20, 0x59, 0x28, 0x21, 0x59, 0x19, 0x03, 0x66]);

    let prepared = preprocess(&vgm).unwrap();
    let large = prepared.pcm_blocks.last().unwrap();
    assert_eq!(large.rom_offset, 0x20_8000);
    assert_eq!(large.offset, 0x10_8000);
    assert_eq!(prepared.pcm_blocks[14].offset, 0xE_0000);

    let commands = &prepared.data[0x40..];
    assert_eq!(
        commands,
        &[0x59, 0x18, 0x10, 0x59, 0x28, 0x11, 0x59, 0x19, 0x03, 0x66]
    );
}
