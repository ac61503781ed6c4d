//! Live mute/solo gate for VGM register writes.
//!
//! Every write the player wants to issue is checked against the current FM
//! channel mask and the two global filters. Rules are evaluated in order and
//! the first match wins:
//!
//! 1. Pitch filter on and the register is an FM pitch register → deny.
//! 2. PCM key-on filter on and the register is ADPCM-A key (0x100) or
//!    ADPCM-B control (0x010) → deny.
//! 3. FM key on/off (0x028) for a channel outside the mask → deny. A mask
//!    holding every channel allows all key writes.
//! 4. FM pitch register of a channel outside the mask → deny.
//! 5. Anything else → allow.
//!
//! Channels removed from the mask are left to the MIDI voice driver, so the
//! log can keep playing drums and bass while the user plays the lead.

use super::{
    ADPCM_A_ATL_REGISTER, ADPCM_A_KEY_REGISTER, ADPCM_B_CONTROL_REGISTER, FmChannels,
    KEY_ON_REGISTER, fm_pitch_channel, slot_to_channel,
};
use crate::hw::Port;

/// ATL value assumed before the log has written one (0 dB).
pub const DEFAULT_ADPCM_A_ATL: u8 = 0x3F;

/// Why a write was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    PitchFilter,
    PcmKeyOn,
    MaskedKeyOn,
    MaskedPitch,
}

/// Outcome of checking one write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterDecision {
    Allow,
    Deny(DenyReason),
}

impl FilterDecision {
    pub fn is_allowed(self) -> bool {
        matches!(self, FilterDecision::Allow)
    }
}

/// Mute/solo state applied to outgoing register writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelFilter {
    fm_key_on_mask: FmChannels,
    filter_fm_pitch: bool,
    filter_pcm_key_on: bool,
    adpcma_last_atl: u8,
}

impl ChannelFilter {
    /// A filter that lets every write through.
    pub fn new() -> Self {
        Self {
            fm_key_on_mask: FmChannels::all(),
            filter_fm_pitch: false,
            filter_pcm_key_on: false,
            adpcma_last_atl: DEFAULT_ADPCM_A_ATL,
        }
    }

    /// FM channels the log is allowed to key and pitch.
    pub fn fm_key_on_mask(&self) -> FmChannels {
        self.fm_key_on_mask
    }

    pub fn set_fm_key_on_mask(&mut self, mask: FmChannels) {
        self.fm_key_on_mask = mask;
    }

    pub fn filter_fm_pitch(&self) -> bool {
        self.filter_fm_pitch
    }

    pub fn set_filter_fm_pitch(&mut self, enabled: bool) {
        self.filter_fm_pitch = enabled;
    }

    pub fn filter_pcm_key_on(&self) -> bool {
        self.filter_pcm_key_on
    }

    pub fn set_filter_pcm_key_on(&mut self, enabled: bool) {
        self.filter_pcm_key_on = enabled;
    }

    /// Last ADPCM-A total level the log wrote and the filter let through.
    pub fn adpcma_last_atl(&self) -> u8 {
        self.adpcma_last_atl
    }

    /// Forget the remembered ADPCM-A level.
    pub fn reset_adpcma_atl(&mut self) {
        self.adpcma_last_atl = DEFAULT_ADPCM_A_ATL;
    }

    /// Decide on a write to the 9-bit register `address` without touching
    /// any state.
    pub fn check(&self, address: u16, data: u8) -> FilterDecision {
        let pitch_channel = fm_pitch_channel(address);

        if self.filter_fm_pitch && pitch_channel.is_some() {
            return FilterDecision::Deny(DenyReason::PitchFilter);
        }

        if self.filter_pcm_key_on
            && (address == ADPCM_A_KEY_REGISTER || address == ADPCM_B_CONTROL_REGISTER)
        {
            return FilterDecision::Deny(DenyReason::PcmKeyOn);
        }

        if address == KEY_ON_REGISTER {
            if self.fm_key_on_mask.is_all() {
                return FilterDecision::Allow;
            }
            if let Some(channel) = slot_to_channel(data & 0x07)
                && !self.fm_key_on_mask.has_channel(channel)
            {
                return FilterDecision::Deny(DenyReason::MaskedKeyOn);
            }
        }

        if let Some(channel) = pitch_channel
            && !self.fm_key_on_mask.has_channel(channel)
        {
            return FilterDecision::Deny(DenyReason::MaskedPitch);
        }

        FilterDecision::Allow
    }

    /// Decide on a VGM write to `register` of `port`, remembering accepted
    /// ADPCM-A levels.
    pub fn filter(&mut self, port: Port, register: u8, data: u8) -> FilterDecision {
        let address = port.address(register);
        let decision = self.check(address, data);
        if decision.is_allowed() && address == ADPCM_A_ATL_REGISTER {
            self.adpcma_last_atl = data;
        }
        decision
    }
}

impl Default for ChannelFilter {
    fn default() -> Self {
        Self::new()
    }
}
