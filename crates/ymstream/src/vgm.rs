//! VGM playback on the device.
//!
//! This module holds the windowed command buffer, the header fields read at
//! playback start and the interpreter that turns the command stream into
//! paced chip writes and refill requests.
pub mod buffer;
pub mod header;
pub mod player;

pub use buffer::{LINEAR_END, REGION_SIZE, Region, VGM_BUFFER_SIZE, VgmBuffer};
pub use header::{VgmHeaderField, VgmHeaderInfo};
pub use player::{
    BufferRequest, PlayerConfig, PlayerContext, PlayerState, UpdateResult, VgmPlayer,
};
