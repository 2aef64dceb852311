#![no_std]
#![no_main]
#![feature(used_with_arg)]

extern crate alloc;

#[bare_test::tests]
mod tests {
    use core::{
        sync::atomic::{AtomicU32, Ordering},
        time::Duration,
    };

    use alloc::vec;
    use bare_test::{
        globals::{PlatformInfoKind, global_val},
        mem::mmu::iomap,
        time::spin_delay,
    };
    use log::*;
    use tegra_sdmmc::{
        Kernel, set_impl,
        card::{
            config::CardConfig,
            sd::SdCard,
        },
        platform::{Controller, Gpio, Platform, Regulator, ClockAndReset, SocRevision, Voltage},
        sdhci::{Host, Speed},
    };

    const SD_START_BLOCK: u32 = 131072;
    const SD_USE_BLOCK: u32 = 4;

    /// A software model of the board-support surface [`Platform`] abstracts
    /// over. Pinmux/CAR/regulator wiring is out of scope for this crate, so
    /// the test stands in for it with a free-running virtual microsecond
    /// clock and no-op power sequencing, matching what the platform module
    /// documents as the expected shape of test doubles.
    struct TestPlatform {
        virtual_us: AtomicU32,
    }

    impl TestPlatform {
        fn new() -> Self {
            Self {
                virtual_us: AtomicU32::new(0),
            }
        }
    }

    impl Gpio for TestPlatform {
        fn card_detect(&self, _controller: Controller) -> bool {
            true
        }

        fn set_supply_enable(&mut self, _controller: Controller, _enable: bool) {}
    }

    impl Regulator for TestPlatform {
        fn set_voltage(
            &mut self,
            _controller: Controller,
            _voltage: Voltage,
        ) -> tegra_sdmmc::sdhci::err::SdhciResult<()> {
            Ok(())
        }

        fn set_enable(&mut self, _controller: Controller, _enable: bool) {}
    }

    impl ClockAndReset for TestPlatform {
        fn enable_device_clock(&mut self, _controller: Controller) {}
        fn disable_device_clock(&mut self, _controller: Controller) {}
        fn assert_reset(&mut self, _controller: Controller) {}
        fn deassert_reset(&mut self, _controller: Controller) {}
        fn set_source_divider(&mut self, _controller: Controller, _divider: u32) {}
        fn configure_pinmux(&mut self, _controller: Controller) {}
    }

    impl Platform for TestPlatform {
        fn now_us(&self) -> u32 {
            self.virtual_us.load(Ordering::Relaxed)
        }

        fn sleep_us(&self, us: u32) {
            spin_delay(Duration::from_micros(us as u64));
            self.virtual_us.fetch_add(us, Ordering::Relaxed);
        }

        fn soc_revision(&self) -> SocRevision {
            SocRevision::Mariko
        }
    }

    #[test]
    fn test_work() {
        let fdt = match &global_val().platform_info {
            PlatformInfoKind::DeviceTree(fdt) => fdt.get(),
        };

        let sdhci0 = fdt.find_compatible(&["nvidia,tegra210-sdhci"]).next().unwrap();
        let reg = sdhci0.reg().unwrap().next().unwrap();
        info!(
            "sdhci0 reg: {:#x}, sdhci0 reg size: {:#x}",
            reg.address,
            reg.size.unwrap()
        );

        let base = iomap((reg.address as usize).into(), reg.size.unwrap());

        let mut platform = TestPlatform::new();
        let config = CardConfig::removable_sd(Controller::Sdmmc1, SocRevision::Mariko);

        let mut host = Host::init(
            &mut platform,
            base,
            config.controller,
            config.initial_voltage,
            config.max_width,
            Speed::SdIdent,
        )
        .unwrap();

        let mut sdcard =
            SdCard::init(&mut host, config.allow_voltage_switching).unwrap();

        ////////////////////// SD card init finished //////////////////////

        let mut receive_buf = vec![0u8; (SD_USE_BLOCK as usize) * 512];

        sdcard
            .read_blocks(&mut host, SD_START_BLOCK, SD_USE_BLOCK, &mut receive_buf)
            .unwrap();

        info!("read {} bytes from SD card", receive_buf.len());
        info!("buffer is {:?}", receive_buf);

        info!("test_work passed\n");
    }

    fn sleep(duration: Duration) {
        spin_delay(duration);
    }

    struct KernelImpl;

    impl Kernel for KernelImpl {
        fn sleep(duration: Duration) {
            sleep(duration);
        }
    }

    set_impl!(KernelImpl);
}
