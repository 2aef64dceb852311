//! Test doubles shared by this crate's `#[cfg(test)]` unit tests.
//!
//! A [`MockPlatform`] stands in for board-support glue the same way the
//! hardware-in-the-loop integration test's own platform double does, and
//! [`MockRegBlock`] backs [`crate::regs::Reg`] with a plain memory buffer
//! instead of live MMIO so register-level logic can run host-side.
#![cfg(test)]

use alloc::boxed::Box;
use core::cell::Cell;
use core::ptr::NonNull;

use crate::platform::{Controller, ClockAndReset, Gpio, Platform, Regulator, SocRevision, Voltage};
use crate::regs::Reg;
use crate::sdhci::err::{SdhciError, SdhciResult};

/// A free-running virtual microsecond clock (advancing by `tick_us` on
/// every read) plus no-op power/clock hooks.
pub struct MockPlatform {
    virtual_us: Cell<u32>,
    tick_us: u32,
    /// Number of times [`ClockAndReset::enable_device_clock`] has been
    /// called, so a test can tell whether a cached clock source skipped the
    /// CAR reprogram (P2).
    pub device_clock_enables: Cell<u32>,
}

impl MockPlatform {
    pub fn new() -> Self {
        Self::with_tick_us(10)
    }

    pub fn with_tick_us(tick_us: u32) -> Self {
        Self {
            virtual_us: Cell::new(0),
            tick_us,
            device_clock_enables: Cell::new(0),
        }
    }
}

impl Gpio for MockPlatform {
    fn card_detect(&self, _controller: Controller) -> bool {
        true
    }

    fn set_supply_enable(&mut self, _controller: Controller, _enable: bool) {}
}

impl Regulator for MockPlatform {
    fn set_voltage(&mut self, _controller: Controller, _voltage: Voltage) -> SdhciResult<()> {
        Ok(())
    }

    fn set_enable(&mut self, _controller: Controller, _enable: bool) {}
}

impl ClockAndReset for MockPlatform {
    fn enable_device_clock(&mut self, _controller: Controller) {
        self.device_clock_enables.set(self.device_clock_enables.get() + 1);
    }
    fn disable_device_clock(&mut self, _controller: Controller) {}
    fn assert_reset(&mut self, _controller: Controller) {}
    fn deassert_reset(&mut self, _controller: Controller) {}
    fn set_source_divider(&mut self, _controller: Controller, _divider: u32) {}
    fn configure_pinmux(&mut self, _controller: Controller) {}
}

impl Platform for MockPlatform {
    fn now_us(&self) -> u32 {
        let us = self.virtual_us.get();
        self.virtual_us.set(us.wrapping_add(self.tick_us));
        us
    }

    fn sleep_us(&self, us: u32) {
        self.virtual_us.set(self.virtual_us.get().wrapping_add(us));
    }

    fn soc_revision(&self) -> SocRevision {
        SocRevision::Mariko
    }
}

/// A zeroed register block, big enough for the whole standard + vendor
/// SDHCI layout, addressable through the same [`Reg`] wrapper real MMIO
/// uses.
pub struct MockRegBlock {
    mem: Box<[u8; Self::SIZE]>,
}

impl MockRegBlock {
    pub const SIZE: usize = 0x200;

    pub fn new() -> Self {
        Self { mem: Box::new([0u8; Self::SIZE]) }
    }

    pub fn reg(&mut self) -> Reg<SdhciError> {
        Reg::new(NonNull::new(self.mem.as_mut_ptr()).unwrap())
    }
}
