use std::fs::{self, File};
use std::io::{Read, stdin};
use std::path::{Path, PathBuf};

use anyhow::Context;
use comfy_table::{Cell, ContentArrangement, Table, presets::NOTHING};
use flate2::read::GzDecoder;
use log::info;
use ymstream::preprocess::{PcmBlock, PcmKind, PreprocessedVgm};
use ymstream::vgm::{LINEAR_END, VgmHeaderInfo};

const GZIP_MAGIC: [u8; 2] = [0x1F, 0x8B];

/// Read a VGM from `path`, or stdin when it is `-`, inflating gzip input.
///
/// Compression is detected from the content so that `.vgz` files and piped
/// archives both work.
pub fn read_vgm_as_vec(path: &PathBuf) -> anyhow::Result<Vec<u8>> {
    let mut raw = Vec::new();
    if path == Path::new("-") {
        stdin()
            .read_to_end(&mut raw)
            .context("failed to read from stdin")?;
    } else {
        File::open(path)
            .with_context(|| format!("failed to open input file: {}", path.display()))?
            .read_to_end(&mut raw)
            .with_context(|| format!("failed to read input file: {}", path.display()))?;
    }

    if !raw.starts_with(&GZIP_MAGIC) {
        return Ok(raw);
    }
    let mut out = Vec::new();
    GzDecoder::new(&raw[..])
        .read_to_end(&mut out)
        .context("failed to decompress gzip input")?;
    Ok(out)
}

fn new_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(NOTHING)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

fn display_name(path: &Path) -> String {
    if path == Path::new("-") {
        return "<stdin>".to_string();
    }
    path.canonicalize()
        .unwrap_or_else(|_| path.to_path_buf())
        .display()
        .to_string()
}

fn hex(value: u32) -> String {
    format!("0x{:X}", value)
}

/// Print the header, command counts and sample blocks of a VGM.
pub fn info(path: &Path, data: &[u8]) -> anyhow::Result<()> {
    let header = VgmHeaderInfo::parse(data).context("failed to parse VGM header")?;
    let prepared = ymstream::preprocess(data).context("failed to walk VGM commands")?;
    let stats = prepared.stats;

    let mut table = new_table();
    table.set_header(vec![Cell::new("Field"), Cell::new("Value")]);
    table.add_row(vec!["File".to_string(), display_name(path)]);
    table.add_row(vec!["Version".to_string(), header.version_string()]);
    table.add_row(vec![
        "Chip".to_string(),
        format!(
            "{} @ {} Hz",
            if header.is_ym2610b() { "YM2610B" } else { "YM2610" },
            header.clock_hz()
        ),
    ]);
    table.add_row(vec![
        "Total samples".to_string(),
        header.total_samples.to_string(),
    ]);
    table.add_row(vec!["Data offset".to_string(), hex(header.start_offset)]);
    table.add_row(vec![
        "Loop".to_string(),
        if header.has_loop() {
            format!("{} ({} samples)", hex(header.loop_offset), header.loop_samples)
        } else {
            "none".to_string()
        },
    ]);
    table.add_row(vec!["Port 0 writes".to_string(), stats.port0_writes.to_string()]);
    table.add_row(vec!["Port 1 writes".to_string(), stats.port1_writes.to_string()]);
    table.add_row(vec![
        "Waits".to_string(),
        format!("{} ({} samples)", stats.waits, stats.wait_samples),
    ]);
    table.add_row(vec![
        "Data blocks".to_string(),
        format!("{} ({} merged)", stats.data_blocks, stats.merged_blocks),
    ]);
    table.add_row(vec![
        "Bank writes".to_string(),
        format!(
            "{} ({} remapped)",
            stats.bank_writes, stats.remapped_bank_writes
        ),
    ]);
    table.add_row(vec![
        "Stream size".to_string(),
        format!(
            "{} ({} refilled)",
            hex(prepared.data.len() as u32),
            hex(prepared.data.len().saturating_sub(LINEAR_END) as u32)
        ),
    ]);
    if !stats.end_of_stream {
        table.add_row(vec!["Warning".to_string(), "no end of stream".to_string()]);
    }
    println!("{table}");

    if !prepared.pcm_blocks.is_empty() {
        println!();
        println!("{}", block_table(&prepared.pcm_blocks));
    }
    Ok(())
}

fn kind_name(kind: PcmKind) -> &'static str {
    match kind {
        PcmKind::A => "ADPCM-A",
        PcmKind::B => "ADPCM-B",
    }
}

fn block_table(blocks: &[PcmBlock]) -> Table {
    let mut table = new_table();
    table.set_header(vec![
        Cell::new("Type"),
        Cell::new("ROM offset"),
        Cell::new("Memory offset"),
        Cell::new("Size"),
        Cell::new("ROM size"),
    ]);
    for block in blocks {
        table.add_row(vec![
            kind_name(block.kind).to_string(),
            hex(block.rom_offset),
            hex(block.offset),
            hex(block.data.len() as u32),
            hex(block.rom_size),
        ]);
    }
    table
}

/// File name for a sample block at its sample memory offset, e.g.
/// `adpcm-a_000200.bin`.
fn block_file_name(block: &PcmBlock) -> String {
    let kind = match block.kind {
        PcmKind::A => "adpcm-a",
        PcmKind::B => "adpcm-b",
    };
    format!("{}_{:06X}.bin", kind, block.offset)
}

/// Write the stripped stream to `output` and, when asked, each sample
/// block to `pcm_dir`. Blocks are written in upload byte order.
pub fn preprocess_file(
    data: &[u8],
    output: &Path,
    pcm_dir: Option<&Path>,
) -> anyhow::Result<PreprocessedVgm> {
    let prepared = ymstream::preprocess(data).context("failed to preprocess VGM")?;

    fs::write(output, &prepared.data)
        .with_context(|| format!("failed to write {}", output.display()))?;
    info!(
        "wrote {} bytes of stream to {}",
        prepared.data.len(),
        output.display()
    );

    if let Some(dir) = pcm_dir {
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
        for block in &prepared.pcm_blocks {
            let path = dir.join(block_file_name(block));
            fs::write(&path, &block.data)
                .with_context(|| format!("failed to write {}", path.display()))?;
            info!("wrote {} ({} bytes)", path.display(), block.data.len());
        }
    }

    println!("{}", block_table(&prepared.pcm_blocks));
    Ok(prepared)
}
