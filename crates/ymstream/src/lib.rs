#![doc = include_str!("../README.md")]
//! ymstream: streaming VGM playback for FPGA-hosted YM2610 replacements
//!
//! The device keeps a 96 KiB window onto a VGM command stream of any
//! length. The first 0x12000 bytes sit in a linear area; the rest streams
//! through two 8 KiB regions (A and B) that the host refills on request,
//! plus an 8 KiB cache for the loop point.
//!
//! Layers, bottom up:
//! - [`hw`]: the peripherals the firmware drives, as traits.
//! - [`chip`]: YM2610 register helpers, the live channel filter and the
//!   MIDI voice driver.
//! - [`vgm`]: the window, header fields and the interpreter.
//! - [`usb`]: the vendor control requests, bulk upload session and
//!   notification format.
//! - [`firmware`]: the main loop tying them together.
//! - [`preprocess`] and [`host`]: the host side, which strips data blocks
//!   out of a VGM and answers refill requests.
//! - [`sim`]: software peripherals and an in-process bench.
//!
//! Example: preprocess a file and play it on the bench
//!
//! ```rust
//! use ymstream::firmware::FirmwareConfig;
//! use ymstream::host::HostStreamer;
//! use ymstream::preprocess::preprocess;
//! use ymstream::sim::{Bench, BenchConfig};
//!
//! // Header pointing at commands at 0x40, no loop
//! let mut vgm = vec![0u8; 0x40];
//! vgm[0..4].copy_from_slice(b"Vgm ");
//! vgm[0x34..0x38].copy_from_slice(&0x0Cu32.to_le_bytes());
//! // Key on FM channel 1, wait a frame, end
//! vgm.extend_from_slice(&[0x58, 0x28, 0xF0, 0x62, 0x66]);
//!
//! let prepared = preprocess(&vgm).expect("valid VGM");
//! let mut bench = Bench::new(
//!     FirmwareConfig::new(),
//!     BenchConfig::new().with_loops(2),
//!     HostStreamer::new(prepared),
//! );
//! let report = bench.run().expect("bench run");
//!
//! assert_eq!(report.loops, 2);
//! assert_eq!(report.ticks, 2 * 735);
//! assert!(report.error.is_none());
//! ```
pub mod binutil;
pub mod chip;
pub mod error;
pub mod firmware;
pub mod host;
pub mod hw;
pub mod midi;
pub mod preprocess;
pub mod sim;
pub mod usb;
pub mod vgm;

pub use chip::{ChannelFilter, FmChannels};
pub use error::{BenchError, OutOfRange, PlayerError, PreprocessError, ProtocolError};
pub use firmware::{Firmware, FirmwareConfig, LiveControl};
pub use host::{HostStreamer, Upload};
pub use preprocess::{PreprocessedVgm, preprocess};
pub use vgm::{BufferRequest, UpdateResult, VgmBuffer, VgmPlayer};
