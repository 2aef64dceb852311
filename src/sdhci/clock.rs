//! Controller clock and pad calibration.
//!
//! Every function here that touches source, divider, voltage, tap, or
//! calibration state requires the SD clock to already be off; callers are
//! responsible for calling [`disable_sd_clock`] first and [`enable_sd_clock`]
//! once they are done, mirroring the donor's clock-off-before-reprogram
//! discipline.

use lazy_static::lazy_static;
use log::{debug, warn};
use spin::Mutex;

use crate::platform::{Controller, Platform, SocRevision, wait_until};
use crate::regs::Reg;
use crate::sdhci::consts::{lookup_clock_source, timeout_us, ClockSourceEntry};
use crate::sdhci::err::{SdhciError, SdhciResult};
use crate::sdhci::regs::{
    self, AutoCalConfig, AutoCalStatus, ClockTimeoutReset, SdMemCompPadCtrl, VendorClockCntrl,
};

/// Per-controller record of the last source frequency requested and the
/// internal divider it produced.
#[derive(Debug, Clone, Copy, Default)]
struct CacheEntry {
    source: Option<ClockSourceEntry>,
    internal_divider: u32,
}

lazy_static! {
    /// Process-wide clock source cache, indexed by [`Controller::index`].
    ///
    /// `apply_speed` consults this so that re-selecting a speed whose target
    /// frequency maps to the same table entry as before only reprograms the
    /// cheap SDHCI-side divider instead of restarting the CAR source clock.
    static ref CLOCK_SOURCE_CACHE: Mutex<[CacheEntry; 4]> =
        Mutex::new([CacheEntry { source: None, internal_divider: 1 }; 4]);
}

fn cached_internal_divider(controller: Controller) -> u32 {
    CLOCK_SOURCE_CACHE.lock()[controller.index()].internal_divider
}

/// Starts (or restarts) the device clock in CAR for `controller` at
/// `target_hz`, returning the resulting SDHCI-side internal divider.
///
/// Steps 1-8 of the clock start sequence: disable the device clock if
/// running, assert reset, program source+divider, enable the device clock,
/// dummy-read, settle, deassert reset, dummy-read again. If the cache
/// already holds this exact source (because the last call used the same
/// target frequency), the CAR reprogram is skipped and only the internal
/// divider is recomputed.
pub fn start_device_clock(
    platform: &mut dyn Platform,
    controller: Controller,
    target_hz: u32,
) -> SdhciResult<u32> {
    let source = lookup_clock_source(target_hz).ok_or(SdhciError::Unsupported)?;
    let internal_divider = source
        .achieved_source_hz
        .div_ceil(target_hz.max(1))
        .max(1);

    let already_cached = {
        let cache = CLOCK_SOURCE_CACHE.lock();
        cache[controller.index()].source == Some(source)
    };

    if !already_cached {
        platform.disable_device_clock(controller);
        platform.assert_reset(controller);
        platform.set_source_divider(controller, source.car_divider);
        platform.enable_device_clock(controller);
        let _ = platform.soc_revision();
        let settle_us = 100_000u32.div_ceil(source.car_divider.max(1));
        platform.sleep_us(settle_us);
        platform.deassert_reset(controller);
        let _ = platform.soc_revision();
    }

    let mut cache = CLOCK_SOURCE_CACHE.lock();
    cache[controller.index()] = CacheEntry {
        source: Some(source),
        internal_divider,
    };
    debug!(
        "clock source for {:?}: target {} Hz -> achieved {} Hz, divider {} (car reprogram: {})",
        controller, target_hz, source.achieved_source_hz, internal_divider, !already_cached
    );
    Ok(internal_divider)
}

/// Returns the internal divider last computed for `controller` by
/// [`start_device_clock`].
pub fn internal_divider(controller: Controller) -> u32 {
    cached_internal_divider(controller)
}

/// Reverses [`start_device_clock`]: disables the device clock in CAR.
pub fn stop_device_clock(platform: &mut dyn Platform, controller: Controller) {
    platform.disable_device_clock(controller);
}

/// Programs the SDHCI-side clock divider register from a cached internal
/// divider: halved, low byte in the low slot, high two bits in the high
/// slot, then enables the internal clock and waits for it to stabilize.
pub fn enable_internal_clock(
    regs: &Reg<SdhciError>,
    platform: &dyn Platform,
    internal_divider: u32,
) -> SdhciResult<()> {
    let post_div = (internal_divider / 2).max(1);
    let low = post_div & 0xFF;
    let high = (post_div >> 8) & 0x3;
    let freq_sel = (low << 8) | (high << 6);

    regs.modify_reg::<ClockTimeoutReset>(|old| {
        let cleared = old & !ClockTimeoutReset::FREQ_SEL_MASK;
        (cleared | ClockTimeoutReset::from_bits_truncate(freq_sel))
            | ClockTimeoutReset::INTERNAL_CLOCK_ENABLE
    });
    let _ = regs.read_32(regs::offset::CLOCK_TIMEOUT_RESET);

    wait_until(platform, timeout_us::CLOCK_STABLE, || {
        regs.read_reg::<ClockTimeoutReset>()
            .contains(ClockTimeoutReset::INTERNAL_CLOCK_STABLE)
    })
}

/// Gates the SD clock onto the bus (bit 2 of clock-control).
pub fn enable_sd_clock(regs: &Reg<SdhciError>) {
    regs.set_reg(ClockTimeoutReset::SD_CLOCK_ENABLE);
}

/// Gates the SD clock off the bus. Required before any source/divider/
/// voltage/tap/calibration change.
pub fn disable_sd_clock(regs: &Reg<SdhciError>) {
    regs.clear_reg(ClockTimeoutReset::SD_CLOCK_ENABLE);
}

pub fn is_sd_clock_enabled(regs: &Reg<SdhciError>) -> bool {
    regs.read_reg::<ClockTimeoutReset>()
        .contains(ClockTimeoutReset::SD_CLOCK_ENABLE)
}

/// Writes the 8-bit tap value into vendor-clock-cntrl.
pub fn set_tap_value(regs: &Reg<SdhciError>, tap: u8) {
    regs.modify_reg::<VendorClockCntrl>(|old| {
        (old & !VendorClockCntrl::TAP_VALUE_MASK) | VendorClockCntrl::tap_value(tap)
    });
}

/// Writes the 8-bit trim value into vendor-clock-cntrl.
pub fn set_trim_value(regs: &Reg<SdhciError>, trim: u8) {
    regs.modify_reg::<VendorClockCntrl>(|old| {
        (old & !VendorClockCntrl::TRIM_VALUE_MASK) | VendorClockCntrl::trim_value(trim)
    });
}

/// Per-controller, per-revision trim value and fixed default tap value.
fn trim_and_tap_defaults(controller: Controller, soc: SocRevision) -> (u8, u8) {
    match (controller, soc) {
        (Controller::Sdmmc1, SocRevision::Erista) => (0x02, 0x04),
        (Controller::Sdmmc1, SocRevision::Mariko) => (0x0E, 0x04),
        (Controller::Sdmmc2, SocRevision::Erista) => (0x08, 0x00),
        (Controller::Sdmmc2, SocRevision::Mariko) => (0x0D, 0x00),
        (Controller::Sdmmc3, _) => (0x03, 0x03),
        (Controller::Sdmmc4, SocRevision::Erista) => (0x08, 0x00),
        (Controller::Sdmmc4, SocRevision::Mariko) => (0x0D, 0x00),
    }
}

/// Clears trim/tap, reapplies the clock-enable overrides, and loads the
/// fixed per-controller-per-revision trim constant and default tap.
///
/// Callers that have a tuning-derived tap value should call [`set_tap_value`]
/// again afterward to override the fixed default.
pub fn configure_vendor_clock_trim(
    regs: &Reg<SdhciError>,
    controller: Controller,
    soc: SocRevision,
) {
    let (trim, tap) = trim_and_tap_defaults(controller, soc);
    regs.modify_reg::<VendorClockCntrl>(|old| {
        (old & !(VendorClockCntrl::TRIM_VALUE_MASK | VendorClockCntrl::TAP_VALUE_MASK))
            | VendorClockCntrl::PADPIPE_CLKEN_OVERRIDE
    });
    regs.clear_reg(VendorClockCntrl::SPI_MODE_CLKEN_OVERRIDE);
    set_trim_value(regs, trim);
    set_tap_value(regs, tap);
}

/// Per-controller, per-revision pad-control fallback values applied when
/// auto-calibration times out.
fn auto_cal_fallback(controller: Controller, soc: SocRevision, is_1v8: bool) -> u16 {
    match (controller, soc, is_1v8) {
        (Controller::Sdmmc1, SocRevision::Erista, true) => 0x7B7B,
        (Controller::Sdmmc1, SocRevision::Mariko, true) => 0x0606,
        (Controller::Sdmmc1, SocRevision::Erista, false) => 0x7D00,
        (Controller::Sdmmc1, SocRevision::Mariko, false) => 0x0000,
        (Controller::Sdmmc4, _, true) => 0x0505,
        _ => 0x0000,
    }
}

/// Runs pad auto-calibration. On timeout, disables the auto-cal enable bit
/// and substitutes a fixed fallback drive-up/drive-down value instead.
pub fn run_auto_cal(
    regs: &Reg<SdhciError>,
    platform: &dyn Platform,
    controller: Controller,
    soc: SocRevision,
    is_1v8: bool,
) -> SdhciResult<()> {
    if !regs
        .read_reg::<SdMemCompPadCtrl>()
        .contains(SdMemCompPadCtrl::PAD_E_INPUT_OR_E_PWRD)
    {
        regs.set_reg(SdMemCompPadCtrl::PAD_E_INPUT_OR_E_PWRD);
        let _ = regs.read_32(regs::offset::SDMEMCOMPPADCTRL);
        platform.sleep_us(1);
    }

    regs.set_reg(AutoCalConfig::AUTOCAL_START | AutoCalConfig::AUTOCAL_ENABLE);
    platform.sleep_us(2);

    let result = wait_until(platform, timeout_us::AUTO_CAL, || {
        !regs
            .read_reg::<AutoCalStatus>()
            .contains(AutoCalStatus::AUTOCAL_ACTIVE)
    });

    if result.is_err() {
        warn!("auto-cal timed out on {:?}, using fallback pad values", controller);
        regs.clear_reg(AutoCalConfig::AUTOCAL_ENABLE);
        let fallback = auto_cal_fallback(controller, soc, is_1v8);
        regs.modify_reg::<AutoCalConfig>(|old| {
            (old & !AutoCalConfig::PDPU_CONFIG_MASK)
                | AutoCalConfig::from_bits_truncate(fallback as u32)
        });
    }

    regs.clear_reg(SdMemCompPadCtrl::PAD_E_INPUT_OR_E_PWRD);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{MockPlatform, MockRegBlock};

    /// P1: the clock-off fence itself — `is_sd_clock_enabled` reflects
    /// exactly the last `enable_sd_clock`/`disable_sd_clock` call.
    #[test]
    fn sd_clock_enable_disable_round_trips() {
        let mut block = MockRegBlock::new();
        let regs = block.reg();

        assert!(!is_sd_clock_enabled(&regs));
        enable_sd_clock(&regs);
        assert!(is_sd_clock_enabled(&regs));
        disable_sd_clock(&regs);
        assert!(!is_sd_clock_enabled(&regs));
    }

    /// P2: re-selecting the same target frequency is a cache hit and skips
    /// the CAR device-clock reprogram.
    #[test]
    fn start_device_clock_skips_car_reprogram_on_cache_hit() {
        let mut platform = MockPlatform::new();
        let controller = Controller::Sdmmc3;

        start_device_clock(&mut platform, controller, 25_000_000).unwrap();
        let enables_after_first = platform.device_clock_enables.get();
        assert_eq!(enables_after_first, 1);

        start_device_clock(&mut platform, controller, 25_000_000).unwrap();
        assert_eq!(
            platform.device_clock_enables.get(),
            enables_after_first,
            "identical target frequency must not reprogram the CAR source"
        );

        start_device_clock(&mut platform, controller, 50_000_000).unwrap();
        assert_eq!(
            platform.device_clock_enables.get(),
            enables_after_first + 1,
            "a different target frequency must reprogram the CAR source"
        );
    }

    #[test]
    fn start_device_clock_rejects_a_frequency_outside_the_table() {
        let mut platform = MockPlatform::new();
        let result = start_device_clock(&mut platform, Controller::Sdmmc3, 1_234_567);
        assert_eq!(result.unwrap_err(), SdhciError::Unsupported);
    }

    /// S3: a stuck auto-cal-active bit times out at the 10ms bound and
    /// falls back to the fixed per-controller drive-strength constants
    /// instead of leaving `AUTOCAL_ENABLE` set.
    #[test]
    fn run_auto_cal_falls_back_when_autocal_active_never_clears() {
        let mut block = MockRegBlock::new();
        let regs = block.reg();
        regs.write_reg(AutoCalStatus::AUTOCAL_ACTIVE);

        let platform = MockPlatform::with_tick_us(500);
        run_auto_cal(&regs, &platform, Controller::Sdmmc1, SocRevision::Erista, true).unwrap();

        assert!(!regs.read_reg::<AutoCalConfig>().contains(AutoCalConfig::AUTOCAL_ENABLE));
        let fallback = auto_cal_fallback(Controller::Sdmmc1, SocRevision::Erista, true);
        assert_eq!(
            (regs.read_reg::<AutoCalConfig>() & AutoCalConfig::PDPU_CONFIG_MASK).bits(),
            fallback as u32
        );
        assert!(!regs.read_reg::<SdMemCompPadCtrl>().contains(SdMemCompPadCtrl::PAD_E_INPUT_OR_E_PWRD));
    }

    #[test]
    fn run_auto_cal_succeeds_immediately_when_not_stuck() {
        let mut block = MockRegBlock::new();
        let regs = block.reg();
        let platform = MockPlatform::new();

        run_auto_cal(&regs, &platform, Controller::Sdmmc1, SocRevision::Mariko, false).unwrap();

        assert!(regs.read_reg::<AutoCalConfig>().contains(AutoCalConfig::AUTOCAL_ENABLE));
        assert!(!regs.read_reg::<SdMemCompPadCtrl>().contains(SdMemCompPadCtrl::PAD_E_INPUT_OR_E_PWRD));
    }
}

/// Runs DLL calibration (HS400 only): sets the calibrate-enable trigger bit
/// and waits for it to self-clear, then waits for `DLL_CAL_ACTIVE` in the
/// status register to clear.
pub fn run_dll_cal(regs: &Reg<SdhciError>, platform: &dyn Platform) -> SdhciResult<()> {
    use crate::sdhci::regs::{VendorDllCalCfg, VendorDllCalCfgSta};

    regs.set_reg(VendorDllCalCfg::DLL_CAL_EN);

    wait_until(platform, timeout_us::DLL_CAL_PHASE1, || {
        !regs
            .read_reg::<VendorDllCalCfg>()
            .contains(VendorDllCalCfg::DLL_CAL_EN)
    })?;

    wait_until(platform, timeout_us::DLL_CAL_PHASE2, || {
        !regs
            .read_reg::<VendorDllCalCfgSta>()
            .contains(VendorDllCalCfgSta::DLL_CAL_ACTIVE)
    })
}
