//! Platform services.
//!
//! Everything in this module is an abstract capability, never a policy: pinmux,
//! PMIC, GPIO, and CAR register layouts live outside this crate (bootloader glue)
//! and are reached only through [`Platform`].

use crate::sdhci::err::{SdhciError, SdhciResult};

/// The closed set of host-controller instances this driver can drive.
///
/// Per-controller hooks (electrical pre-config, pad trim defaults, auto-cal
/// fallback constants) are modeled as a match over this enum rather than a
/// trait object: the set of controllers on a Tegra-class SoC is fixed at four
/// and will not grow at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Controller {
    Sdmmc1,
    Sdmmc2,
    Sdmmc3,
    Sdmmc4,
}

impl Controller {
    /// Index into the process-wide clock source cache and per-controller tables.
    pub const fn index(self) -> usize {
        match self {
            Controller::Sdmmc1 => 0,
            Controller::Sdmmc2 => 1,
            Controller::Sdmmc3 => 2,
            Controller::Sdmmc4 => 3,
        }
    }

    /// Whether this instance is the hot-pluggable card slot.
    ///
    /// Only SDMMC1 is wired to a card-detect GPIO on the boards this driver
    /// targets; SDMMC2/3/4 are down-soldered eMMC.
    pub const fn is_removable(self) -> bool {
        matches!(self, Controller::Sdmmc1)
    }
}

/// SoC revision, affecting pad trim/drive-strength constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocRevision {
    Erista,
    Mariko,
}

/// Bus operating voltage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Voltage {
    None,
    V3_3,
    V1_8,
}

/// Capability: card-detect and supply-enable GPIO lines for a removable slot.
pub trait Gpio {
    /// True when a card is physically present.
    fn card_detect(&self, controller: Controller) -> bool;
    /// Drives the card-supply enable line.
    fn set_supply_enable(&mut self, controller: Controller, enable: bool);
}

/// Capability: the PMIC regulator that feeds the card's VDD rail.
pub trait Regulator {
    fn set_voltage(&mut self, controller: Controller, voltage: Voltage) -> SdhciResult<()>;
    fn set_enable(&mut self, controller: Controller, enable: bool);
}

/// Capability: CAR (clock-and-reset) control for the controller's device clock.
pub trait ClockAndReset {
    fn enable_device_clock(&mut self, controller: Controller);
    fn disable_device_clock(&mut self, controller: Controller);
    fn assert_reset(&mut self, controller: Controller);
    fn deassert_reset(&mut self, controller: Controller);
    /// Programs the CAR source divider; implementations are expected to
    /// perform the dummy read over the CAR register themselves if one is
    /// required by the SoC, distinct from the SDHCI-side dummy-read fence
    /// the host core performs after its own register writes.
    fn set_source_divider(&mut self, controller: Controller, divider: u32);
    /// Pinmux configuration for this controller's SD/MMC pin group.
    fn configure_pinmux(&mut self, controller: Controller);
}

/// Capability bundle required by [`crate::sdhci::Host`] to perform anything
/// outside its own register block: timing, power sequencing, and CAR access.
///
/// A concrete implementation is supplied by the platform integration layer
/// (board support code), which is explicitly out of scope for this crate
/// Test code implements this trait with a software model.
pub trait Platform: Gpio + Regulator + ClockAndReset {
    /// Free-running microsecond counter; wraps at `u32::MAX`.
    fn now_us(&self) -> u32;
    /// Busy- or timer-wait for at least `us` microseconds.
    fn sleep_us(&self, us: u32);
    /// SoC stepping, used to select per-revision pad/trim constants.
    fn soc_revision(&self) -> SocRevision;
}

/// Wrapping deadline helper used by every polled wait in this crate.
///
/// `now_us()` wraps at 32 bits; comparisons use wrapping subtraction so a
/// deadline computed just before a wraparound is still honored correctly.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    target_us: u32,
}

impl Deadline {
    pub fn after(platform: &dyn Platform, timeout_us: u32) -> Self {
        Self {
            target_us: platform.now_us().wrapping_add(timeout_us),
        }
    }

    pub fn expired(&self, platform: &dyn Platform) -> bool {
        let now = platform.now_us();
        now.wrapping_sub(self.target_us) < u32::MAX / 2
    }
}

/// Polls `predicate` until it is true or `timeout_us` elapses.
///
/// This is the single implementation of the `wait_until(predicate, deadline)`
/// idiom; every timed wait in the driver is expressed as one call to this
/// function so the normative timeout bounds live in exactly one place each.
pub fn wait_until(
    platform: &dyn Platform,
    timeout_us: u32,
    mut predicate: impl FnMut() -> bool,
) -> SdhciResult<()> {
    let deadline = Deadline::after(platform, timeout_us);
    loop {
        if predicate() {
            return Ok(());
        }
        if deadline.expired(platform) {
            return Err(SdhciError::Timeout);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::Cell;

    /// A clock that advances by a fixed tick on every read, standing in for
    /// the free-running counter a real platform exposes.
    struct TickingClock {
        now: Cell<u32>,
        tick_us: u32,
    }

    impl Gpio for TickingClock {
        fn card_detect(&self, _controller: Controller) -> bool {
            true
        }
        fn set_supply_enable(&mut self, _controller: Controller, _enable: bool) {}
    }

    impl Regulator for TickingClock {
        fn set_voltage(&mut self, _controller: Controller, _voltage: Voltage) -> SdhciResult<()> {
            Ok(())
        }
        fn set_enable(&mut self, _controller: Controller, _enable: bool) {}
    }

    impl ClockAndReset for TickingClock {
        fn enable_device_clock(&mut self, _controller: Controller) {}
        fn disable_device_clock(&mut self, _controller: Controller) {}
        fn assert_reset(&mut self, _controller: Controller) {}
        fn deassert_reset(&mut self, _controller: Controller) {}
        fn set_source_divider(&mut self, _controller: Controller, _divider: u32) {}
        fn configure_pinmux(&mut self, _controller: Controller) {}
    }

    impl Platform for TickingClock {
        fn now_us(&self) -> u32 {
            let now = self.now.get();
            self.now.set(now.wrapping_add(self.tick_us));
            now
        }
        fn sleep_us(&self, _us: u32) {}
        fn soc_revision(&self) -> SocRevision {
            SocRevision::Mariko
        }
    }

    /// P6: a predicate that never succeeds times out within one tick of its
    /// bound, never wildly past it.
    #[test]
    fn wait_until_times_out_within_one_tick_of_the_bound() {
        let clock = TickingClock { now: Cell::new(0), tick_us: 10 };
        let result = wait_until(&clock, 1_000, || false);
        assert!(result.is_err());
        let elapsed = clock.now.get();
        assert!(elapsed >= 1_000, "returned before the deadline: {elapsed}");
        assert!(elapsed < 1_000 + 10, "overshot the deadline by more than one tick: {elapsed}");
    }

    #[test]
    fn wait_until_succeeds_immediately_without_consuming_the_deadline() {
        let clock = TickingClock { now: Cell::new(0), tick_us: 10 };
        let result = wait_until(&clock, 1_000, || true);
        assert!(result.is_ok());
    }

    #[test]
    fn deadline_handles_wraparound_near_u32_max() {
        let clock = TickingClock { now: Cell::new(u32::MAX - 5), tick_us: 10 };
        let deadline = Deadline::after(&clock, 20);
        assert!(!deadline.expired(&clock));
    }
}
