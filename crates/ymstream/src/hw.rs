//! Capability traits for the peripherals the player drives.
//!
//! Each trait is the narrow surface the core needs from one memory-mapped
//! block of the FPGA design. Production code implements them over register
//! pokes; [`crate::sim`] implements them in software for tests and the host
//! side simulator.

/// One of the chip's two register ports.
///
/// Port 0 holds the SSG, ADPCM-B and FM channels 1-3; port 1 holds ADPCM-A
/// and FM channels 4-6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Port {
    A,
    B,
}

impl Port {
    /// Port selected by bit 8 of a combined 9-bit register address.
    pub fn from_address(address: u16) -> Self {
        if address & 0x100 != 0 { Port::B } else { Port::A }
    }

    /// Port number as used by VGM (`0x58` → 0, `0x59` → 1).
    pub fn index(self) -> u8 {
        match self {
            Port::A => 0,
            Port::B => 1,
        }
    }

    /// Combine the port with an 8-bit register into a 9-bit address.
    pub fn address(self, register: u8) -> u16 {
        (self.index() as u16) << 8 | register as u16
    }
}

/// Two-register (address, data) latch per port in front of the sound chip.
pub trait ChipSink {
    /// Whether the command FIFO can accept another write.
    fn ready(&self) -> bool;

    /// Latch `data` into `register` of `port`.
    ///
    /// Callers check [`ready`](Self::ready) first; the sink may drop writes
    /// issued while it is busy.
    fn write(&mut self, port: Port, register: u8, data: u8);

    /// Drive the chip's reset line.
    fn set_reset(&mut self, active: bool);
}

/// Free-running countdown calibrated to one VGM sample per tick.
pub trait PlaybackTimer {
    /// Start counting down `ticks` samples. A zero count leaves the timer
    /// untouched.
    fn arm(&mut self, ticks: u32);

    /// Whether the last armed count has run out.
    fn elapsed(&self) -> bool;
}

/// Bytes of PSRAM behind the ADPCM fetch mux.
pub const SAMPLE_MEMORY_SIZE: usize = 0x80_0000;

/// External PSRAM holding ADPCM sample ROM images.
pub trait SampleMemory {
    /// Bytes of sample memory.
    const CAPACITY: usize = SAMPLE_MEMORY_SIZE;

    /// Copy `data` into sample memory at `offset`.
    fn write(&mut self, offset: usize, data: &[u8]);

    /// Gate the chip's PCM fetches from sample memory.
    fn set_pcm_enabled(&mut self, enabled: bool);
}

/// State of one bulk OUT buffer descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutDescriptor {
    /// Armed and waiting for the host.
    Pending,
    /// A packet of the given payload length has arrived.
    Received(usize),
    /// The descriptor finished with an error.
    Invalid,
}

/// Bytes in one bulk OUT packet.
pub const BULK_PACKET_SIZE: usize = 64;

/// Bytes in one interrupt IN notification.
pub const NOTIFICATION_SIZE: usize = 16;

/// Endpoint access for the streaming protocol: a double-buffered bulk OUT
/// endpoint for data and a single-buffered interrupt IN endpoint for
/// notifications.
pub trait Transport {
    /// Enable or stall the bulk OUT endpoint.
    fn set_out_enabled(&mut self, enabled: bool);

    /// Whether the bulk OUT endpoint is enabled.
    fn out_enabled(&self) -> bool;

    /// State of descriptor `bd` (0 or 1).
    fn out_descriptor(&self, bd: usize) -> OutDescriptor;

    /// Copy the payload of descriptor `bd` into `dest`.
    fn read_out(&mut self, bd: usize, dest: &mut [u8]);

    /// Hand descriptor `bd` back to the host for the next packet.
    fn arm_out(&mut self, bd: usize);

    /// Whether the previously submitted notification is still queued.
    fn in_busy(&self) -> bool;

    /// Queue a notification for the host.
    fn submit_in(&mut self, message: [u8; NOTIFICATION_SIZE]);
}
