//! Software reset of the CMD and DAT lines.
//!
//! Every timeout path in the command, DMA, and tuning engines funnels
//! through one of these two functions so the 100 ms reset-completion bound
//! is enforced in exactly one place.

use crate::platform::{Platform, wait_until};
use crate::regs::Reg;
use crate::sdhci::consts::timeout_us;
use crate::sdhci::err::SdhciError;
use crate::sdhci::regs::{self, ClockTimeoutReset};

/// Resets the CMD line only.
pub fn reset_cmd(regs: &Reg<SdhciError>, platform: &dyn Platform) -> Result<(), SdhciError> {
    reset(regs, platform, ClockTimeoutReset::RESET_CMD)
}

/// Resets the CMD and DAT lines together, as required on any timed-out
/// command or DMA segment.
pub fn reset_cmd_and_dat(regs: &Reg<SdhciError>, platform: &dyn Platform) -> Result<(), SdhciError> {
    reset(
        regs,
        platform,
        ClockTimeoutReset::RESET_CMD | ClockTimeoutReset::RESET_DATA,
    )
}

/// Resets the whole controller (used during init).
pub fn reset_all(regs: &Reg<SdhciError>, platform: &dyn Platform) -> Result<(), SdhciError> {
    reset(regs, platform, ClockTimeoutReset::RESET_ALL)
}

fn reset(
    regs: &Reg<SdhciError>,
    platform: &dyn Platform,
    bits: ClockTimeoutReset,
) -> Result<(), SdhciError> {
    regs.set_reg(bits);
    let _ = regs.read_32(regs::offset::CLOCK_TIMEOUT_RESET);
    wait_until(platform, timeout_us::SOFTWARE_RESET, || {
        !regs.read_reg::<ClockTimeoutReset>().intersects(bits)
    })
}
