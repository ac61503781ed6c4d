use anyhow::Context;
use comfy_table::{Cell, ContentArrangement, Table, presets::NOTHING};
use log::warn;
use ymstream::sim::{Bench, BenchConfig, BenchReport, VGM_SAMPLE_RATE};
use ymstream::vgm::PlayerConfig;
use ymstream::{FirmwareConfig, FmChannels, HostStreamer, LiveControl};

pub struct Options {
    pub loops: u32,
    pub mask: FmChannels,
    pub pitch_filter: bool,
    pub mute_pcm: bool,
    /// 0 keeps the chip always ready.
    pub busy_every: u64,
    pub max_seconds: u64,
    pub trace_writes: bool,
}

/// Preprocess `data` and play it through the simulated device.
pub fn run(data: &[u8], options: &Options) -> anyhow::Result<BenchReport> {
    let prepared = ymstream::preprocess(data).context("failed to preprocess VGM")?;

    let firmware_config = FirmwareConfig::new()
        .with_initial_mask(options.mask)
        .with_player(PlayerConfig::new().with_log_writes(options.trace_writes));
    let bench_config = BenchConfig::new()
        .with_loops(options.loops)
        .with_max_ticks(options.max_seconds.saturating_mul(VGM_SAMPLE_RATE))
        .with_busy_every(options.busy_every);

    let mut bench = Bench::new(firmware_config, bench_config, HostStreamer::new(prepared));
    if options.pitch_filter {
        bench.firmware_mut().live(LiveControl::SetPitchFilter(true));
    }
    if options.mute_pcm {
        bench.firmware_mut().live(LiveControl::SetPcmMuted(true));
    }

    let report = bench.run().context("simulation aborted")?;
    if let Some(error) = report.error {
        warn!("playback stopped: {}", error);
    } else if report.loops < options.loops {
        warn!(
            "time limit reached after {} of {} loops",
            report.loops, options.loops
        );
    }

    println!("{}", report_table(&report));
    Ok(report)
}

fn report_table(report: &BenchReport) -> Table {
    let stats = &report.firmware;
    let rows: [(&str, String); 12] = [
        ("Loops", report.loops.to_string()),
        ("Playback", format!("{:.2}s", report.seconds())),
        ("Chip writes", report.chip_writes.to_string()),
        ("Chip busy", stats.chip_busy.to_string()),
        ("Refills served", report.refills_served.to_string()),
        ("Notifications ignored", report.notifications_ignored.to_string()),
        ("Buffering requests", stats.buffering_requests.to_string()),
        ("Notify busy", stats.notify_busy.to_string()),
        ("Packets", stats.packets.to_string()),
        ("Bytes received", stats.bytes_received.to_string()),
        ("Protocol errors", stats.protocol_errors.to_string()),
        (
            "Error",
            report
                .error
                .map(|error| error.to_string())
                .unwrap_or_else(|| "none".to_string()),
        ),
    ];

    let mut table = Table::new();
    table
        .load_preset(NOTHING)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![Cell::new("Counter"), Cell::new("Value")]);
    for (name, value) in rows {
        table.add_row(vec![name.to_string(), value]);
    }
    table
}
