//! Host-side VGM preparation.
//!
//! The device cannot take data blocks in the command stream, so ADPCM ROM
//! blocks are cut out here and uploaded to sample memory ahead of playback.
//! Everything after the first end-of-stream command (GD3 tag included) is
//! dropped, and the loop offset is moved to account for the removed bytes.
//!
//! ADPCM-A and ADPCM-B ROM images share one sample memory on the device, so
//! the blocks are rebased into separate 64 KiB banks. The low 16 address
//! bits of every sample stay as they were; only the bank bytes written to
//! the high address registers are rewritten. A group of blocks never
//! straddles a 1 MiB boundary, which the ADPCM address counters cannot
//! carry across.
use std::collections::HashMap;

use log::{debug, info, warn};

use crate::binutil::{
    read_slice, read_u8_at, read_u16_le_at, read_u32_le_at, swap_words, write_u32,
};
use crate::error::PreprocessError;
use crate::hw::SAMPLE_MEMORY_SIZE;
use crate::usb::WriteMode;
use crate::vgm::VgmHeaderField;
use crate::vgm::header::{LEGACY_DATA_OFFSET, VGM_IDENT};

/// Data block type for YM2610 ADPCM-A ROM.
pub const BLOCK_TYPE_ADPCM_A: u8 = 0x82;
/// Data block type for YM2610 ADPCM-B ROM.
pub const BLOCK_TYPE_ADPCM_B: u8 = 0x83;

/// Bytes before the ROM data in a ROM block: `0x67 0x66 tt ssssssss
/// rrrrrrrr oooooooo`.
const ROM_BLOCK_HEADER_SIZE: usize = 15;
/// Size and start fields counted in the block size.
const ROM_BLOCK_FIELDS_SIZE: u32 = 8;
/// Second byte of every data block.
const BLOCK_MARKER: u8 = 0x66;

/// Reach of the 24-bit ADPCM address registers.
const ADPCM_ADDRESS_LIMIT: u64 = 1 << 24;
/// Address bits above this are set through the high address registers.
const BANK_SHIFT: u32 = 16;
/// ADPCM address counters wrap within 1 MiB.
const SEGMENT_SHIFT: u32 = 20;
const BANKS_PER_SEGMENT: u32 = 1 << (SEGMENT_SHIFT - BANK_SHIFT);

/// Sample ROM a data block belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PcmKind {
    A,
    B,
}

impl PcmKind {
    pub fn write_mode(self) -> WriteMode {
        match self {
            PcmKind::A => WriteMode::PcmA,
            PcmKind::B => WriteMode::PcmB,
        }
    }

    fn from_block_type(block_type: u8) -> Option<Self> {
        match block_type {
            BLOCK_TYPE_ADPCM_A => Some(PcmKind::A),
            BLOCK_TYPE_ADPCM_B => Some(PcmKind::B),
            _ => None,
        }
    }

    /// Sample ROM addressed by a write to the high address register at
    /// `address` (`port << 8 | register`).
    fn from_bank_register(address: u16) -> Option<Self> {
        match address {
            // ADPCM-A start and end, high byte
            0x118..=0x11D | 0x128..=0x12D => Some(PcmKind::A),
            // ADPCM-B start and end, high byte
            0x013 | 0x015 => Some(PcmKind::B),
            _ => None,
        }
    }
}

/// ADPCM data cut out of the command stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcmBlock {
    pub kind: PcmKind,
    /// Offset in the shared sample memory after rebasing.
    pub offset: u32,
    /// Offset in the chip's own sample ROM, as the file declared it.
    pub rom_offset: u32,
    /// Total ROM size the block declared.
    pub rom_size: u32,
    /// ROM bytes with every 32-bit word byte swapped for upload.
    pub data: Vec<u8>,
}

impl PcmBlock {
    /// End of the block in sample memory.
    pub fn end(&self) -> u32 {
        self.offset + self.data.len() as u32
    }

    /// End of the block in the chip's sample ROM.
    pub fn rom_end(&self) -> u32 {
        self.rom_offset + self.data.len() as u32
    }

    fn first_bank(&self) -> u32 {
        self.rom_offset >> BANK_SHIFT
    }

    fn last_bank(&self) -> u32 {
        (self.rom_end() - 1) >> BANK_SHIFT
    }
}

/// Counts gathered while walking the command stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommandStats {
    pub port0_writes: u64,
    pub port1_writes: u64,
    pub waits: u64,
    pub wait_samples: u64,
    pub data_blocks: u64,
    /// Blocks folded into the preceding one.
    pub merged_blocks: u64,
    /// Writes to ADPCM high address registers.
    pub bank_writes: u64,
    /// Bank writes whose value changed with rebasing.
    pub remapped_bank_writes: u64,
    pub end_of_stream: bool,
}

/// A VGM ready for streaming.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreprocessedVgm {
    /// Header and command stream without data blocks.
    pub data: Vec<u8>,
    pub pcm_blocks: Vec<PcmBlock>,
    pub stats: CommandStats,
}

/// Where each original 64 KiB bank of a sample ROM ended up.
#[derive(Debug, Default)]
struct BankMap {
    banks: HashMap<(PcmKind, u8), u8>,
}

impl BankMap {
    fn insert(&mut self, kind: PcmKind, from: u32, to: u32) {
        self.banks.insert((kind, from as u8), to as u8);
    }

    fn get(&self, kind: PcmKind, bank: u8) -> Option<u8> {
        self.banks.get(&(kind, bank)).copied()
    }

    fn has_kind(&self, kind: PcmKind) -> bool {
        self.banks.keys().any(|&(k, _)| k == kind)
    }
}

/// Strip ADPCM data blocks out of `vgm`.
pub fn preprocess(vgm: &[u8]) -> Result<PreprocessedVgm, PreprocessError> {
    let ident = read_slice(vgm, VgmHeaderField::Ident.offset(), 4)?;
    if ident != VGM_IDENT {
        let mut found = [0u8; 4];
        found.copy_from_slice(ident);
        return Err(PreprocessError::InvalidIdent(found));
    }

    let start_index = match relative_field(vgm, VgmHeaderField::DataOffset)? {
        0 => LEGACY_DATA_OFFSET as usize,
        offset => offset,
    };
    let loop_index = relative_field(vgm, VgmHeaderField::LoopOffset)?;
    debug!("start index 0x{:X}, loop index 0x{:X}", start_index, loop_index);

    let mut out = read_slice(vgm, 0, start_index)?.to_vec();
    let mut blocks: Vec<PcmBlock> = Vec::new();
    let mut stats = CommandStats::default();
    let mut loop_adjusted = None;
    let mut index = start_index;
    // Output offsets of bank bytes, rewritten once the blocks are placed
    let mut bank_writes: Vec<(usize, PcmKind)> = Vec::new();

    while index < vgm.len() {
        if loop_index != 0 && index == loop_index && loop_adjusted.is_none() {
            loop_adjusted = Some(out.len());
        }

        let opcode = vgm[index];
        let length = match opcode {
            0x58 | 0x59 => {
                let port: u16 = if opcode == 0x58 {
                    stats.port0_writes += 1;
                    0
                } else {
                    stats.port1_writes += 1;
                    1
                };
                let register = read_u8_at(vgm, index + 1)? as u16;
                if let Some(kind) = PcmKind::from_bank_register(port << 8 | register) {
                    stats.bank_writes += 1;
                    bank_writes.push((out.len() + 2, kind));
                }
                3
            }
            0x70..=0x7F => {
                stats.waits += 1;
                stats.wait_samples += (opcode & 0x0F) as u64 + 1;
                1
            }
            0x61 => {
                stats.waits += 1;
                stats.wait_samples += read_u16_le_at(vgm, index + 1)? as u64;
                3
            }
            0x62 | 0x63 => {
                stats.waits += 1;
                stats.wait_samples += if opcode == 0x62 { 735 } else { 882 };
                1
            }
            0x66 => {
                out.push(opcode);
                stats.end_of_stream = true;
                break;
            }
            0x67 => {
                index += take_block(vgm, index, &mut blocks)?;
                stats.data_blocks += 1;
                continue;
            }
            _ => return Err(PreprocessError::UnknownCommand { opcode, offset: index }),
        };

        out.extend_from_slice(read_slice(vgm, index, length)?);
        index += length;
    }

    if !stats.end_of_stream {
        warn!("no end of stream command, stream ends at 0x{:X}", index);
    }

    blocks.sort_by_key(|block| (block.kind, block.rom_offset));
    stats.merged_blocks = merge_contiguous(&mut blocks);
    let banks = rebase(&mut blocks)?;
    stats.remapped_bank_writes = remap_bank_writes(&mut out, &bank_writes, &banks);
    rewrite_header(&mut out, loop_index, loop_adjusted);

    info!(
        "{} data blocks stripped ({} after merging), 0x{:X} bytes of commands",
        stats.data_blocks,
        blocks.len(),
        out.len() - start_index
    );

    Ok(PreprocessedVgm {
        data: out,
        pcm_blocks: blocks,
        stats,
    })
}

fn relative_field(vgm: &[u8], field: VgmHeaderField) -> Result<usize, PreprocessError> {
    let relative = read_u32_le_at(vgm, field.offset())? as usize;
    Ok(if relative == 0 {
        0
    } else {
        field.offset() + relative
    })
}

/// Cut the data block at `index` out of `vgm`, returning its length.
fn take_block(
    vgm: &[u8],
    index: usize,
    blocks: &mut Vec<PcmBlock>,
) -> Result<usize, PreprocessError> {
    let marker = read_u8_at(vgm, index + 1)?;
    if marker != BLOCK_MARKER {
        return Err(PreprocessError::BadBlockMarker {
            marker,
            offset: index,
        });
    }
    let block_type = read_u8_at(vgm, index + 2)?;
    let size = read_u32_le_at(vgm, index + 3)?;

    let Some(kind) = PcmKind::from_block_type(block_type) else {
        return Err(PreprocessError::UnsupportedBlock {
            block_type,
            offset: index,
        });
    };

    let rom_size = read_u32_le_at(vgm, index + 7)?;
    if rom_size == 0 {
        return Err(PreprocessError::EmptyRomSize(index));
    }
    let offset = read_u32_le_at(vgm, index + 11)?;

    let data_size = size.saturating_sub(ROM_BLOCK_FIELDS_SIZE) as usize;
    if data_size == 0 {
        // Some files carry empty blocks; nothing to upload
        debug!("empty {:?} block at 0x{:X}", kind, index);
    } else {
        if offset as u64 + data_size as u64 > ADPCM_ADDRESS_LIMIT {
            return Err(PreprocessError::BlockOutOfRange {
                rom_offset: offset,
                length: data_size,
                offset: index,
            });
        }
        let mut data = read_slice(vgm, index + ROM_BLOCK_HEADER_SIZE, data_size)?.to_vec();
        swap_words(&mut data);
        debug!(
            "{:?} block: 0x{:X} bytes at ROM 0x{:X} (ROM size 0x{:X})",
            kind, data_size, offset, rom_size
        );
        blocks.push(PcmBlock {
            kind,
            offset,
            rom_offset: offset,
            rom_size,
            data,
        });
    }

    Ok(ROM_BLOCK_HEADER_SIZE + data_size)
}

/// Fold each block into the previous one when it continues it directly.
fn merge_contiguous(blocks: &mut Vec<PcmBlock>) -> u64 {
    let mut merged: Vec<PcmBlock> = Vec::with_capacity(blocks.len());
    let mut count = 0;

    for block in blocks.drain(..) {
        if let Some(last) = merged.last_mut()
            && last.kind == block.kind
            && last.rom_end() == block.rom_offset
        {
            last.data.extend_from_slice(&block.data);
            count += 1;
            continue;
        }
        merged.push(block);
    }

    *blocks = merged;
    count
}

/// Give every block its place in sample memory.
///
/// Blocks are sorted by kind and ROM offset. Runs of blocks sharing 64 KiB
/// banks keep their relative layout and are packed bank after bank, moved
/// up to the next 1 MiB boundary when they would otherwise straddle one.
fn rebase(blocks: &mut [PcmBlock]) -> Result<BankMap, PreprocessError> {
    let mut banks = BankMap::default();
    let mut next_bank = 0;
    let mut index = 0;

    while index < blocks.len() {
        let kind = blocks[index].kind;
        let first_bank = blocks[index].first_bank();
        let mut last_bank = blocks[index].last_bank();
        let mut end = index + 1;
        while end < blocks.len()
            && blocks[end].kind == kind
            && blocks[end].first_bank() <= last_bank
        {
            last_bank = last_bank.max(blocks[end].last_bank());
            end += 1;
        }

        let group = &mut blocks[index..end];
        let base = first_bank << BANK_SHIFT;
        let low = group[0].rom_offset - base;
        let rom_end = group.iter().map(PcmBlock::rom_end).fold(0, u32::max);
        let length = rom_end - group[0].rom_offset;
        let span = |bank: u32| {
            let start = (bank << BANK_SHIFT) + low;
            (start, start + length - 1)
        };

        let mut target = next_bank;
        let (start, last) = span(target);
        if start >> SEGMENT_SHIFT != last >> SEGMENT_SHIFT {
            if low as u64 + length as u64 <= 1 << SEGMENT_SHIFT {
                target = (target / BANKS_PER_SEGMENT + 1) * BANKS_PER_SEGMENT;
                debug!(
                    "moving {:?} bank 0x{:02X} past a 1 MiB boundary",
                    kind, first_bank
                );
            } else {
                warn!(
                    "{:?} samples at ROM 0x{:X} span more than 1 MiB",
                    kind, group[0].rom_offset
                );
            }
        }

        let (_, last) = span(target);
        if last as usize >= SAMPLE_MEMORY_SIZE {
            return Err(PreprocessError::SampleMemoryFull {
                needed: last as usize + 1,
                capacity: SAMPLE_MEMORY_SIZE,
            });
        }

        for block in group.iter_mut() {
            block.offset = (target << BANK_SHIFT) + (block.rom_offset - base);
            debug!(
                "{:?} block at ROM 0x{:X} placed at 0x{:X} (0x{:X} bytes)",
                kind,
                block.rom_offset,
                block.offset,
                block.data.len()
            );
        }
        for bank in first_bank..=last_bank {
            banks.insert(kind, bank, target + bank - first_bank);
        }

        next_bank = target + last_bank - first_bank + 1;
        index = end;
    }

    Ok(banks)
}

/// Point high address register writes at the rebased banks, returning how
/// many changed.
fn remap_bank_writes(out: &mut [u8], bank_writes: &[(usize, PcmKind)], banks: &BankMap) -> u64 {
    let mut changed = 0;
    for &(index, kind) in bank_writes {
        let bank = out[index];
        match banks.get(kind, bank) {
            Some(remapped) => {
                if remapped != bank {
                    out[index] = remapped;
                    changed += 1;
                }
            }
            None if banks.has_kind(kind) => {
                warn!(
                    "{:?} bank 0x{:02X} at 0x{:X} holds no samples, left as is",
                    kind, bank, index
                );
            }
            None => {}
        }
    }
    changed
}

/// Point the header at the stripped stream.
fn rewrite_header(out: &mut [u8], loop_index: usize, loop_adjusted: Option<usize>) {
    let loop_field = VgmHeaderField::LoopOffset.offset();
    let loop_relative = match (loop_index, loop_adjusted) {
        (0, _) => 0,
        (_, Some(adjusted)) => {
            debug!("loop index 0x{:X} -> 0x{:X}", loop_index, adjusted);
            (adjusted - loop_field) as u32
        }
        (_, None) => {
            warn!(
                "loop index 0x{:X} is not on a command boundary, dropping the loop",
                loop_index
            );
            0
        }
    };
    write_u32(out, loop_field, loop_relative);

    // GD3 and anything else after the end of stream is gone
    write_u32(out, VgmHeaderField::Gd3Offset.offset(), 0);
    let eof_field = VgmHeaderField::EofOffset.offset();
    write_u32(out, eof_field, (out.len() - eof_field) as u32);
}
