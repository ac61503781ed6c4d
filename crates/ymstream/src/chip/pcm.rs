//! ADPCM and SSG mute sequences.
use super::{
    ADPCM_A_ATL_REGISTER, ADPCM_A_KEY_REGISTER, ADPCM_B_CONTROL_REGISTER, RegisterWriter,
    SSG_MIXER_REGISTER,
};

/// Dump (key off) bit plus all six ADPCM-A channel bits.
const ADPCM_A_DUMP_ALL: u8 = 0xBF;
/// ADPCM-B reset bit.
const ADPCM_B_RESET: u8 = 0x80;
/// Tone and noise disabled on all three SSG channels.
const SSG_ALL_OFF: u8 = 0xFF;

/// Key off every ADPCM-A channel and drop the total level to silence.
pub fn mute_adpcm_a<W: RegisterWriter>(out: &mut W) {
    out.write_register(ADPCM_A_KEY_REGISTER, ADPCM_A_DUMP_ALL);
    out.write_register(ADPCM_A_ATL_REGISTER, 0x00);
}

/// Restore the ADPCM-A total level to `atl`, normally the last level the log
/// wrote.
pub fn unmute_adpcm_a<W: RegisterWriter>(out: &mut W, atl: u8) {
    out.write_register(ADPCM_A_ATL_REGISTER, atl);
}

/// Reset ADPCM-B playback.
pub fn mute_adpcm_b<W: RegisterWriter>(out: &mut W) {
    out.write_register(ADPCM_B_CONTROL_REGISTER, ADPCM_B_RESET);
    out.write_register(ADPCM_B_CONTROL_REGISTER, 0x00);
}

pub fn mute_ssg<W: RegisterWriter>(out: &mut W) {
    out.write_register(SSG_MIXER_REGISTER, SSG_ALL_OFF);
}

/// Silence both ADPCM units and the SSG.
pub fn mute_all<W: RegisterWriter>(out: &mut W) {
    mute_ssg(out);
    mute_adpcm_a(out);
    mute_adpcm_b(out);
}
