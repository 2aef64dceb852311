//! The SDHCI host core: controller lifecycle, bus configuration, and speed
//! selection.

pub mod clock;
pub mod cmd;
pub mod consts;
pub mod dma;
pub mod err;
pub mod regs;
pub mod reset;
pub mod tuning;

use core::ptr::NonNull;

use log::{debug, info, warn};

use crate::osa::pool_buffer::PoolBuffer;
use crate::platform::{Controller, Platform, Voltage, wait_until};
use crate::regs::Reg;
use crate::sdhci::consts::timeout_us;
use crate::sdhci::err::{SdhciError, SdhciResult};
use crate::sdhci::regs::{
    self, AutoCmd12AndHostControl2, Capabilities, ClockTimeoutReset, HostControlBlock,
    VendorCapOverrides,
};

/// Card/eMMC bus width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusWidth {
    One,
    Four,
    Eight,
}

/// Every operating speed the host core can select.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speed {
    MmcIdent,
    MmcLegacy,
    SdIdent,
    SdDs,
    SdHs,
    MmcHs,
    SdSdr12,
    SdSdr25,
    SdSdr50,
    SdSdr104,
    SdDdr50,
    MmcHs200,
    MmcHs400,
    GameCard1,
    GameCard2,
    EmuSdr104,
}

impl Speed {
    /// Whether this speed requires the tuning engine to run.
    pub fn needs_tuning(self) -> bool {
        matches!(
            self,
            Speed::SdSdr50
                | Speed::SdSdr104
                | Speed::MmcHs200
                | Speed::GameCard1
                | Speed::GameCard2
                | Speed::EmuSdr104
        )
    }
}

/// DMA bounce-buffer size: large enough for the widest single-call transfer
/// this crate issues, spanning several 512 KiB SDMA boundary segments so a
/// multi-block read/write is handed to the controller as one DMA session
/// instead of being chunked at the card-protocol layer.
const BOUNCE_BUFFER_SIZE: usize = 4 * 1024 * 1024;
const BOUNCE_BUFFER_ALIGN: usize = 4;

/// A per-controller host instance. Created by [`Host::init`], retained for
/// the session, torn down by [`Host::finish`].
pub struct Host<'p> {
    regs: Reg<SdhciError>,
    controller: Controller,
    platform: &'p mut dyn Platform,
    bounce: PoolBuffer,

    is_clock_running: bool,
    is_sd_clock_enabled: bool,
    is_tuning_tap_set: bool,
    uses_adma: bool,
    uses_block_addressing: bool,
    emmc_write_allowed: bool,
    card_brought_online: bool,

    bus_voltage: Voltage,
    bus_width: BusWidth,
    operating_speed: Speed,
    tap_val: u8,

    responses: [u32; 4],
    auto_cmd12_response: u32,
}

impl<'p> Host<'p> {
    /// Runs the full init sequence: electrical pre-config, clock start,
    /// vendor trim, auto-cal, internal clock enable, capability checks, and
    /// application of the requested bus width/voltage/speed.
    pub fn init(
        platform: &'p mut dyn Platform,
        base: NonNull<u8>,
        controller: Controller,
        voltage: Voltage,
        width: BusWidth,
        speed: Speed,
    ) -> SdhciResult<Self> {
        if controller.is_removable() && !platform.card_detect(controller) {
            return Err(SdhciError::NoCard);
        }

        let bounce = PoolBuffer::new(BOUNCE_BUFFER_SIZE, BOUNCE_BUFFER_ALIGN)
            .map_err(|_| SdhciError::Unsupported)?;

        let regs_handle = Reg::new(base);

        platform.configure_pinmux(controller);
        platform.set_enable(controller, true);
        platform.set_supply_enable(controller, true);
        platform.sleep_us(1_000);
        platform.set_voltage(controller, voltage)?;

        if regs_handle
            .read_reg::<ClockTimeoutReset>()
            .contains(ClockTimeoutReset::SD_CLOCK_ENABLE)
        {
            clock::disable_sd_clock(&regs_handle);
        }

        let soc = platform.soc_revision();
        let target_hz = ident_frequency_hz();
        let internal_divider = clock::start_device_clock(platform, controller, target_hz)?;

        clock::configure_vendor_clock_trim(&regs_handle, controller, soc);

        let is_1v8 = matches!(voltage, Voltage::V1_8);
        clock::run_auto_cal(&regs_handle, platform, controller, soc, is_1v8)?;

        regs_handle.set_reg(ClockTimeoutReset::INTERNAL_CLOCK_ENABLE);
        let _ = regs_handle.read_32(regs::offset::CLOCK_TIMEOUT_RESET);
        wait_until(platform, timeout_us::CLOCK_STABLE, || {
            regs_handle
                .read_reg::<ClockTimeoutReset>()
                .contains(ClockTimeoutReset::INTERNAL_CLOCK_STABLE)
        })?;

        regs_handle.clear_reg(AutoCmd12AndHostControl2::PRESET_VAL_ENABLE);
        regs_handle.clear_reg(ClockTimeoutReset::PROG_CLOCK_MODE);
        regs_handle.set_reg(AutoCmd12AndHostControl2::HOST_VERSION_4_EN);

        let caps = regs_handle.read_reg::<Capabilities>();
        if !caps.contains(Capabilities::CAN_64BIT) {
            return Err(SdhciError::Unsupported);
        }
        regs_handle.set_reg(AutoCmd12AndHostControl2::ADDRESSING_64BIT);

        regs_handle.modify_reg::<HostControlBlock>(|old| {
            (old & !HostControlBlock::DMA_SELECT_MASK) | HostControlBlock::DMA_SELECT_SDMA
        });
        let uses_adma = caps.contains(Capabilities::CAN_DO_ADMA2);

        regs_handle.modify_reg::<ClockTimeoutReset>(|old| {
            (old & !ClockTimeoutReset::TIMEOUT_MASK)
                | ClockTimeoutReset::from_bits_truncate(0xE << 16)
        });

        let mut host = Host {
            regs: regs_handle,
            controller,
            platform,
            bounce,
            is_clock_running: true,
            is_sd_clock_enabled: false,
            is_tuning_tap_set: false,
            uses_adma,
            uses_block_addressing: false,
            emmc_write_allowed: false,
            card_brought_online: false,
            bus_voltage: voltage,
            bus_width: width,
            operating_speed: speed,
            tap_val: 0,
            responses: [0; 4],
            auto_cmd12_response: 0,
        };

        host.set_bus_width(width)?;
        host.set_bus_voltage(voltage)?;
        host.select_speed(speed)?;

        let target_state = clock::is_sd_clock_enabled(&host.regs);
        if !target_state {
            clock::enable_sd_clock(&host.regs);
            host.is_sd_clock_enabled = true;
        }
        let _ = host.regs.read_32(regs::offset::CLOCK_TIMEOUT_RESET);

        info!(
            "sdhci host {:?} initialized at {:?}/{:?} bus width",
            controller, voltage, width
        );
        Ok(host)
    }

    pub fn controller(&self) -> Controller {
        self.controller
    }

    pub fn bus_voltage(&self) -> Voltage {
        self.bus_voltage
    }

    pub fn bus_width(&self) -> BusWidth {
        self.bus_width
    }

    pub fn operating_speed(&self) -> Speed {
        self.operating_speed
    }

    pub fn uses_block_addressing(&self) -> bool {
        self.uses_block_addressing
    }

    pub fn set_uses_block_addressing(&mut self, value: bool) {
        self.uses_block_addressing = value;
    }

    pub fn allow_emmc_writes(&mut self, value: bool) {
        self.emmc_write_allowed = value;
    }

    /// The eMMC-write permission gate (I6); `write_blocks` on the MMC card
    /// layer refuses with `PermissionDenied` when this is clear.
    pub fn emmc_write_allowed(&self) -> bool {
        self.emmc_write_allowed
    }

    /// Free-running microsecond counter, for card-layer polling loops that
    /// need to interleave `now_us()` checks with `&mut self` command calls.
    pub fn now_us(&self) -> u32 {
        self.platform.now_us()
    }

    /// Busy- or timer-wait, for card-layer settling delays between commands.
    pub fn sleep_us(&self, us: u32) {
        self.platform.sleep_us(us)
    }

    pub fn mark_card_online(&mut self) {
        self.card_brought_online = true;
    }

    pub fn last_responses(&self) -> [u32; 4] {
        self.responses
    }

    /// DAT0 signal level, read live from `PresentState`; used by the SD
    /// signal-voltage-switch sequence (CMD11) to confirm the card drove the
    /// line low, then high again, around the regulator transition.
    pub fn dat0_high(&self) -> bool {
        self.regs
            .read_reg::<regs::PresentState>()
            .contains(regs::PresentState::DAT0_LEVEL)
    }

    /// Gates the SD clock, flips the external PMIC rail to 1.8V, re-runs pad
    /// auto-calibration at the new voltage, then sets the host controller's
    /// own VDD180 bit and re-enables the clock — the sequence every 1.8V
    /// signal transition needs regardless of which card-protocol CMD drove
    /// it.
    pub fn switch_to_1v8_and_recal(&mut self) -> SdhciResult<()> {
        clock::disable_sd_clock(&self.regs);

        self.platform.set_enable(self.controller, false);
        self.platform.set_voltage(self.controller, Voltage::V1_8)?;

        let soc = self.platform.soc_revision();
        clock::run_auto_cal(&self.regs, self.platform, self.controller, soc, true)?;

        self.platform.set_enable(self.controller, true);
        self.set_bus_voltage(Voltage::V1_8)?;

        clock::enable_sd_clock(&self.regs);
        self.is_sd_clock_enabled = true;
        Ok(())
    }

    pub fn auto_cmd12_response(&self) -> u32 {
        self.auto_cmd12_response
    }

    /// Logs every standard and vendor register this driver touches, for
    /// post-mortem diagnosis after a command or transfer failure.
    pub fn register_dump(&self) {
        let r = &self.regs;
        warn!("dma_address: 0x{:08x}", r.read_32(regs::offset::DMA_ADDRESS));
        warn!("block_size_count: 0x{:08x}", r.read_reg::<regs::BlockSizeCount>().bits());
        warn!("argument: 0x{:08x}", r.read_32(regs::offset::ARGUMENT));
        warn!("transfer_mode_command: 0x{:08x}", r.read_reg::<regs::TransferModeCommand>().bits());
        warn!("response0: 0x{:08x}", r.read_32(regs::offset::RESPONSE0));
        warn!("response1: 0x{:08x}", r.read_32(regs::offset::RESPONSE1));
        warn!("response2: 0x{:08x}", r.read_32(regs::offset::RESPONSE2));
        warn!("response3: 0x{:08x}", r.read_32(regs::offset::RESPONSE3));
        warn!("present_state: 0x{:08x}", r.read_reg::<regs::PresentState>().bits());
        warn!("host_control_block: 0x{:08x}", r.read_reg::<HostControlBlock>().bits());
        warn!("clock_timeout_reset: 0x{:08x}", r.read_reg::<ClockTimeoutReset>().bits());
        warn!("int_status: 0x{:08x}", r.read_reg::<regs::IntStatus>().bits());
        warn!("int_enable: 0x{:08x}", r.read_reg::<regs::IntEnable>().bits());
        warn!("signal_enable: 0x{:08x}", r.read_reg::<regs::SignalEnable>().bits());
        warn!("acmd12_err_host_control2: 0x{:08x}", r.read_reg::<AutoCmd12AndHostControl2>().bits());
        warn!("capabilities: 0x{:08x}", r.read_reg::<Capabilities>().bits());
        warn!("capabilities_1: 0x{:08x}", r.read_32(regs::offset::CAPABILITIES_1));
        warn!("vendor_clock_cntrl: 0x{:08x}", r.read_reg::<regs::VendorClockCntrl>().bits());
        warn!("vendor_cap_overrides: 0x{:08x}", r.read_reg::<VendorCapOverrides>().bits());
        warn!("sdmemcomppadctrl: 0x{:08x}", r.read_reg::<regs::SdMemCompPadCtrl>().bits());
        warn!("auto_cal_config: 0x{:08x}", r.read_reg::<regs::AutoCalConfig>().bits());
        warn!("auto_cal_status: 0x{:08x}", r.read_reg::<regs::AutoCalStatus>().bits());
        warn!(
            "host state: controller={:?} voltage={:?} width={:?} speed={:?} clock_enabled={}",
            self.controller, self.bus_voltage, self.bus_width, self.operating_speed,
            self.is_sd_clock_enabled
        );
    }

    /// Maps {1,4,8} to the two host-control bus-width bits.
    pub fn set_bus_width(&mut self, width: BusWidth) -> SdhciResult<()> {
        let mask = HostControlBlock::BUS_WIDTH_4BIT | HostControlBlock::BUS_WIDTH_8BIT;
        let bits = match width {
            BusWidth::One => HostControlBlock::empty(),
            BusWidth::Four => HostControlBlock::BUS_WIDTH_4BIT,
            BusWidth::Eight => HostControlBlock::BUS_WIDTH_8BIT,
        };
        self.regs
            .modify_reg::<HostControlBlock>(|old| (old & !mask) | bits);
        self.bus_width = width;
        Ok(())
    }

    /// `NONE` drops SD-bus-power; `1V8`/`3V3` set the voltage field then
    /// raise bus-power.
    pub fn set_bus_voltage(&mut self, voltage: Voltage) -> SdhciResult<()> {
        match voltage {
            Voltage::None => {
                self.regs.clear_reg(HostControlBlock::POWER_ON);
            }
            Voltage::V1_8 | Voltage::V3_3 => {
                let sel = if matches!(voltage, Voltage::V1_8) {
                    HostControlBlock::VOLTAGE_1V8
                } else {
                    HostControlBlock::VOLTAGE_3V3
                };
                self.regs.modify_reg::<HostControlBlock>(|old| {
                    (old
                        & !(HostControlBlock::VOLTAGE_1V8
                            | HostControlBlock::VOLTAGE_3V0
                            | HostControlBlock::VOLTAGE_3V3))
                        | sel
                });
                self.regs.set_reg(HostControlBlock::POWER_ON);
            }
        }
        self.bus_voltage = voltage;
        Ok(())
    }

    /// Reconfigures the bus for `speed`: tap config, high-speed/UHS bits,
    /// clock source and divider, and (for HS400) DLL calibration.
    pub fn select_speed(&mut self, speed: Speed) -> SdhciResult<()> {
        let was_enabled = clock::is_sd_clock_enabled(&self.regs);
        if was_enabled {
            clock::disable_sd_clock(&self.regs);
        }

        let soc = self.platform.soc_revision();
        if speed == Speed::MmcHs400 && self.is_tuning_tap_set {
            clock::set_tap_value(&self.regs, self.tap_val);
        } else {
            clock::configure_vendor_clock_trim(&self.regs, self.controller, soc);
        }
        if speed == Speed::MmcHs400 {
            self.regs.modify_reg::<VendorCapOverrides>(|old| {
                (old & !VendorCapOverrides::DQS_TRIM_MASK) | VendorCapOverrides::DQS_TRIM_HS400
            });
        }

        let uhs_mask = AutoCmd12AndHostControl2::UHS_MODE_MASK
            | AutoCmd12AndHostControl2::VDD_180;
        let uhs_bits = match speed {
            Speed::MmcIdent | Speed::MmcLegacy | Speed::SdIdent | Speed::SdDs => {
                self.regs.clear_reg(HostControlBlock::HIGH_SPEED);
                AutoCmd12AndHostControl2::UHS_SDR12
            }
            Speed::SdHs | Speed::MmcHs | Speed::SdSdr25 => {
                self.regs.set_reg(HostControlBlock::HIGH_SPEED);
                AutoCmd12AndHostControl2::UHS_SDR25
            }
            Speed::MmcHs200
            | Speed::SdSdr104
            | Speed::SdSdr50
            | Speed::GameCard1
            | Speed::GameCard2
            | Speed::EmuSdr104 => AutoCmd12AndHostControl2::UHS_SDR104 | AutoCmd12AndHostControl2::VDD_180,
            Speed::SdDdr50 => AutoCmd12AndHostControl2::UHS_DDR50 | AutoCmd12AndHostControl2::VDD_180,
            Speed::MmcHs400 => AutoCmd12AndHostControl2::UHS_HS400 | AutoCmd12AndHostControl2::VDD_180,
            Speed::SdSdr12 => AutoCmd12AndHostControl2::UHS_SDR12 | AutoCmd12AndHostControl2::VDD_180,
        };
        self.regs
            .modify_reg::<AutoCmd12AndHostControl2>(|old| (old & !uhs_mask) | uhs_bits);
        let _ = self.regs.read_32(regs::offset::CLOCK_TIMEOUT_RESET);

        let target_hz = speed_frequency_hz(speed);
        let internal_divider = clock::start_device_clock(self.platform, self.controller, target_hz)?;
        clock::enable_internal_clock(&self.regs, self.platform, internal_divider)?;

        if was_enabled {
            clock::enable_sd_clock(&self.regs);
            self.is_sd_clock_enabled = true;
        }

        if speed.needs_tuning() {
            let opcode = crate::sdhci::consts::cmd::SEND_TUNING_BLOCK;
            let ok = tuning::run(&self.regs, self.platform, self.bus_width, opcode, speed)?;
            if ok {
                self.tap_val = (self
                    .regs
                    .read_32(regs::offset::VENDOR_CLOCK_CNTRL)
                    >> 16) as u8
                    & 0xFF;
                self.is_tuning_tap_set = true;
            } else {
                warn!("tuning failed for {:?}", speed);
                return Err(SdhciError::TuningFailed);
            }
        }

        if speed == Speed::MmcHs400 {
            clock::run_dll_cal(&self.regs, self.platform)?;
        }

        self.operating_speed = speed;
        debug!("select_speed({:?}) -> internal_divider {}", speed, internal_divider);
        Ok(())
    }

    /// Disables SD clock, drops voltage, on the removable controller drops
    /// supply GPIO after a settling delay, then stops the CAR device clock.
    pub fn finish(mut self) {
        clock::disable_sd_clock(&self.regs);
        let _ = self.set_bus_voltage(Voltage::None);
        if self.controller.is_removable() {
            self.platform.set_supply_enable(self.controller, false);
            self.platform.sleep_us(100_000);
            self.platform.set_enable(self.controller, false);
        }
        let _ = self.regs.read_32(regs::offset::CLOCK_TIMEOUT_RESET);
        clock::stop_device_clock(self.platform, self.controller);
    }
}

/// The fixed identification-mode target frequency (400 kHz-class source
/// divider selection is not in the clock source table; the host starts the
/// device clock at the lowest tabled rate and relies on the SDHCI-side
/// divider for the final low-speed clock during enumeration).
fn ident_frequency_hz() -> u32 {
    25_000_000
}

fn speed_frequency_hz(speed: Speed) -> u32 {
    match speed {
        Speed::MmcIdent | Speed::SdIdent | Speed::MmcLegacy | Speed::SdDs => 25_000_000,
        Speed::SdSdr12 => 25_000_000,
        Speed::SdHs | Speed::MmcHs | Speed::SdSdr25 => 50_000_000,
        Speed::SdSdr50 => 100_000_000,
        Speed::SdSdr104 | Speed::GameCard1 | Speed::GameCard2 | Speed::EmuSdr104 => 208_000_000,
        Speed::SdDdr50 => 50_000_000,
        Speed::MmcHs200 => 200_000_000,
        Speed::MmcHs400 => 200_000_000,
    }
}
