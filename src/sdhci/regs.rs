//! Bit-exact SDHCI v4 register block plus the Tegra vendor extension block.
//!
//! Offsets follow the standard SDHCI layout for the first 0x100 bytes and the
//! Tegra-specific vendor block from 0x100 to 0x1FC. Each register that the
//! driver touches is a `bitflags!` type paired with `impl FlagReg`, following
//! the generic [`crate::regs::Reg`] access pattern: `read_reg`/`write_reg`
//! always move a full 32-bit word, so registers narrower than 32 bits (e.g.
//! `host_control`, which is nominally one byte) are modeled together with
//! their neighbors at the aligned offset that contains them.

use crate::regs::FlagReg;
use bitflags::bitflags;

/// Register byte offsets, named after the fields they back.
pub mod offset {
    pub const DMA_ADDRESS: u32 = 0x00;
    pub const BLOCK_SIZE_COUNT: u32 = 0x04;
    pub const ARGUMENT: u32 = 0x08;
    pub const TRANSFER_MODE_COMMAND: u32 = 0x0C;
    pub const RESPONSE0: u32 = 0x10;
    pub const RESPONSE1: u32 = 0x14;
    pub const RESPONSE2: u32 = 0x18;
    pub const RESPONSE3: u32 = 0x1C;
    pub const BUFFER: u32 = 0x20;
    pub const PRESENT_STATE: u32 = 0x24;
    pub const HOST_CONTROL_BLOCK: u32 = 0x28;
    pub const CLOCK_TIMEOUT_RESET: u32 = 0x2C;
    pub const INT_STATUS: u32 = 0x30;
    pub const INT_ENABLE: u32 = 0x34;
    pub const SIGNAL_ENABLE: u32 = 0x38;
    pub const ACMD12_ERR_HOST_CONTROL2: u32 = 0x3C;
    pub const CAPABILITIES: u32 = 0x40;
    pub const CAPABILITIES_1: u32 = 0x44;
    pub const MAX_CURRENT: u32 = 0x48;
    pub const ADMA_ERROR: u32 = 0x54;
    pub const ADMA_ADDRESS: u32 = 0x58;
    pub const ADMA_ADDRESS_HI: u32 = 0x5C;
    pub const SLOT_HOST_VERSION: u32 = 0xFC;

    pub const VENDOR_CLOCK_CNTRL: u32 = 0x100;
    pub const VENDOR_SYS_SW_CNTRL: u32 = 0x104;
    pub const VENDOR_ERR_INTR_STATUS: u32 = 0x108;
    pub const VENDOR_CAP_OVERRIDES: u32 = 0x10C;
    pub const VENDOR_MISC_CNTRL: u32 = 0x120;
    pub const VENDOR_IO_TRIM_CNTRL: u32 = 0x1AC;
    pub const VENDOR_DLLCAL_CFG: u32 = 0x1B0;
    pub const VENDOR_DLL_CTRL0: u32 = 0x1B4;
    pub const VENDOR_DLL_CTRL1: u32 = 0x1B8;
    pub const VENDOR_DLLCAL_CFG_STA: u32 = 0x1BC;
    pub const VENDOR_TUNING_CNTRL0: u32 = 0x1C0;
    pub const VENDOR_TUNING_CNTRL1: u32 = 0x1C4;
    pub const VENDOR_TUNING_STATUS0: u32 = 0x1C8;
    pub const VENDOR_TUNING_STATUS1: u32 = 0x1CC;
    pub const SDMEMCOMPPADCTRL: u32 = 0x1E0;
    pub const AUTO_CAL_CONFIG: u32 = 0x1E4;
    pub const AUTO_CAL_INTERVAL: u32 = 0x1E8;
    pub const AUTO_CAL_STATUS: u32 = 0x1EC;
}

bitflags! {
    /// `block_size` (bits 0-11, 3-bit SDMA boundary in bits 12-14) packed
    /// with `block_count` (bits 16-31) at the same 32-bit word.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BlockSizeCount: u32 {
        const BLOCK_SIZE_MASK = 0x0FFF;
        const SDMA_BOUNDARY_MASK = 0x7000;
        const BLOCK_COUNT_MASK = 0xFFFF_0000;
    }
}
impl FlagReg for BlockSizeCount {
    const REG: u32 = offset::BLOCK_SIZE_COUNT;
}

bitflags! {
    /// `transfer_mode` (bits 0-15) packed with `command` (bits 16-31).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TransferModeCommand: u32 {
        const DMA_ENABLE          = 1 << 0;
        const BLOCK_COUNT_ENABLE  = 1 << 1;
        const AUTO_CMD12          = 1 << 2;
        const AUTO_CMD23          = 1 << 3;
        const DATA_XFER_READ      = 1 << 4;
        const MULTI_BLOCK         = 1 << 5;
        const RESP_TYPE_136       = 1 << 16;
        const RESP_TYPE_48        = 2 << 16;
        const RESP_TYPE_48_BUSY   = 3 << 16;
        const RESP_TYPE_MASK      = 3 << 16;
        const CMD_CRC_CHECK       = 1 << 19;
        const CMD_INDEX_CHECK     = 1 << 20;
        const DATA_PRESENT        = 1 << 21;
        const CMD_INDEX_MASK      = 0x3F << 24;
    }
}
impl FlagReg for TransferModeCommand {
    const REG: u32 = offset::TRANSFER_MODE_COMMAND;
}

impl TransferModeCommand {
    /// Packs a command opcode (0-63) into the `command` half of the register.
    pub fn command_index(opcode: u8) -> Self {
        Self::from_bits_truncate((opcode as u32 & 0x3F) << 24)
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PresentState: u32 {
        const CMD_INHIBIT       = 1 << 0;
        const DATA_INHIBIT      = 1 << 1;
        const DOING_WRITE       = 1 << 8;
        const DOING_READ        = 1 << 9;
        const SPACE_AVAILABLE   = 1 << 10;
        const DATA_AVAILABLE    = 1 << 11;
        const CARD_PRESENT      = 1 << 16;
        const WRITE_PROTECT     = 1 << 19;
        const DAT0_LEVEL        = 1 << 20;
        const CMD_LEVEL         = 1 << 24;
    }
}
impl FlagReg for PresentState {
    const REG: u32 = offset::PRESENT_STATE;
}

bitflags! {
    /// `host_control` (bits 0-7), `power_control` (bits 8-15),
    /// `block_gap_control` (bits 16-23), `wake_up_control` (bits 24-31).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct HostControlBlock: u32 {
        const LED               = 1 << 0;
        const BUS_WIDTH_4BIT    = 1 << 1;
        const HIGH_SPEED        = 1 << 2;
        const DMA_SELECT_MASK   = 0x3 << 3;
        const DMA_SELECT_SDMA   = 0 << 3;
        const DMA_SELECT_ADMA32 = 0x2 << 3;
        const DMA_SELECT_ADMA64 = 0x3 << 3;
        const BUS_WIDTH_8BIT    = 1 << 5;
        const POWER_ON          = 1 << 8;
        const VOLTAGE_1V8       = 5 << 9;
        const VOLTAGE_3V0       = 6 << 9;
        const VOLTAGE_3V3       = 7 << 9;
    }
}
impl FlagReg for HostControlBlock {
    const REG: u32 = offset::HOST_CONTROL_BLOCK;
}

bitflags! {
    /// `clock_control` (bits 0-15), `timeout_control` (bits 16-23),
    /// `software_reset` (bits 24-31).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ClockTimeoutReset: u32 {
        const INTERNAL_CLOCK_ENABLE = 1 << 0;
        const INTERNAL_CLOCK_STABLE = 1 << 1;
        const SD_CLOCK_ENABLE       = 1 << 2;
        const PROG_CLOCK_MODE       = 1 << 5;
        const FREQ_SEL_MASK         = 0xFF << 8;
        const TIMEOUT_MASK          = 0xF << 16;
        const RESET_ALL            = 1 << 24;
        const RESET_CMD            = 1 << 25;
        const RESET_DATA           = 1 << 26;
    }
}
impl FlagReg for ClockTimeoutReset {
    const REG: u32 = offset::CLOCK_TIMEOUT_RESET;
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct IntStatus: u32 {
        const CMD_COMPLETE    = 1 << 0;
        const XFER_COMPLETE   = 1 << 1;
        const DMA_INTERRUPT   = 1 << 3;
        const BUF_WRITE_READY = 1 << 4;
        const BUF_READ_READY  = 1 << 5;
        const CARD_INSERTION  = 1 << 6;
        const CARD_REMOVAL    = 1 << 7;
        const ERR_INTERRUPT   = 1 << 15;
        const CMD_TIMEOUT     = 1 << 16;
        const CMD_CRC_ERROR   = 1 << 17;
        const CMD_END_BIT     = 1 << 18;
        const CMD_INDEX_ERROR = 1 << 19;
        const DATA_TIMEOUT    = 1 << 20;
        const DATA_CRC_ERROR  = 1 << 21;
        const DATA_END_BIT    = 1 << 22;
        const ADMA_ERROR      = 1 << 25;
        const TUNING_ERROR    = 1 << 26;

        const ERROR_MASK = (1 << 16) | (1 << 17) | (1 << 18) | (1 << 19)
            | (1 << 20) | (1 << 21) | (1 << 22) | (1 << 25) | (1 << 26);
    }
}
impl FlagReg for IntStatus {
    const REG: u32 = offset::INT_STATUS;
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct IntEnable: u32 {
        const CMD_COMPLETE    = 1 << 0;
        const XFER_COMPLETE   = 1 << 1;
        const DMA_INTERRUPT   = 1 << 3;
        const BUF_WRITE_READY = 1 << 4;
        const BUF_READ_READY  = 1 << 5;
        const CARD_INSERTION  = 1 << 6;
        const CARD_REMOVAL    = 1 << 7;
        const ALL_ERRORS = (1 << 16) | (1 << 17) | (1 << 18) | (1 << 19)
            | (1 << 20) | (1 << 21) | (1 << 22) | (1 << 25) | (1 << 26);
    }
}
impl FlagReg for IntEnable {
    const REG: u32 = offset::INT_ENABLE;
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SignalEnable: u32 {
        const CMD_COMPLETE    = 1 << 0;
        const XFER_COMPLETE   = 1 << 1;
        const DMA_INTERRUPT   = 1 << 3;
        const ALL_ERRORS = (1 << 16) | (1 << 17) | (1 << 18) | (1 << 19)
            | (1 << 20) | (1 << 21) | (1 << 22) | (1 << 25) | (1 << 26);
    }
}
impl FlagReg for SignalEnable {
    const REG: u32 = offset::SIGNAL_ENABLE;
}

bitflags! {
    /// `acmd12_err` (bits 0-15) packed with `host_control2` (bits 16-31).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AutoCmd12AndHostControl2: u32 {
        const UHS_MODE_MASK      = 0x7 << 16;
        const UHS_SDR12          = 0x0 << 16;
        const UHS_SDR25          = 0x1 << 16;
        const UHS_SDR50          = 0x2 << 16;
        const UHS_SDR104         = 0x3 << 16;
        const UHS_DDR50          = 0x4 << 16;
        const UHS_HS400          = 0x5 << 16;
        const VDD_180            = 1 << 19;
        const EXEC_TUNING        = 1 << 22;
        const SAMPLING_CLOCK_EN  = 1 << 23;
        const HOST_VERSION_4_EN  = 1 << 28;
        const ADDRESSING_64BIT   = 1 << 29;
        const PRESET_VAL_ENABLE  = 1 << 31;
    }
}
impl FlagReg for AutoCmd12AndHostControl2 {
    const REG: u32 = offset::ACMD12_ERR_HOST_CONTROL2;
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Capabilities: u32 {
        const CAN_DO_8BIT  = 1 << 18;
        const CAN_DO_ADMA2 = 1 << 19;
        const CAN_DO_HISPD = 1 << 21;
        const CAN_DO_SDMA  = 1 << 22;
        const CAN_VDD_330  = 1 << 24;
        const CAN_VDD_300  = 1 << 25;
        const CAN_VDD_180  = 1 << 26;
        const CAN_64BIT    = 1 << 28;
    }
}
impl FlagReg for Capabilities {
    const REG: u32 = offset::CAPABILITIES;
}

bitflags! {
    /// Tap value (bits 16-23), trim value (bits 24-31), plus the clock-enable
    /// overrides used while the SD clock itself is gated off.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct VendorClockCntrl: u32 {
        const SPI_MODE_CLKEN_OVERRIDE    = 1 << 2;
        const PADPIPE_CLKEN_OVERRIDE     = 1 << 3;
        const TAP_VALUE_MASK             = 0xFF << 16;
        const TRIM_VALUE_MASK            = 0xFF << 24;
    }
}
impl FlagReg for VendorClockCntrl {
    const REG: u32 = offset::VENDOR_CLOCK_CNTRL;
}

impl VendorClockCntrl {
    pub fn tap_value(tap: u8) -> Self {
        Self::from_bits_truncate((tap as u32) << 16)
    }

    pub fn trim_value(trim: u8) -> Self {
        Self::from_bits_truncate((trim as u32) << 24)
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct VendorCapOverrides: u32 {
        const DQS_TRIM_MASK      = 0x3F << 8;
        const DQS_TRIM_HS400     = 0x11 << 8;
    }
}
impl FlagReg for VendorCapOverrides {
    const REG: u32 = offset::VENDOR_CAP_OVERRIDES;
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct VendorTuningCntrl0: u32 {
        const DIVIDER_MASK      = 0x7 << 3;
        const MULTIPLIER_MASK   = 0x7F << 6;
        const MULTIPLIER_UNITY  = 1 << 6;
        const TRIES_MASK        = 0x7 << 13;
        const SET_BY_HW         = 1 << 17;
    }
}
impl FlagReg for VendorTuningCntrl0 {
    const REG: u32 = offset::VENDOR_TUNING_CNTRL0;
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AutoCalConfig: u32 {
        const PDPU_CONFIG_MASK = 0x7F7F;
        const AUTOCAL_ENABLE   = 1 << 29;
        const AUTOCAL_START    = 1 << 31;
    }
}
impl FlagReg for AutoCalConfig {
    const REG: u32 = offset::AUTO_CAL_CONFIG;
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AutoCalStatus: u32 {
        const AUTOCAL_ACTIVE = 1 << 31;
    }
}
impl FlagReg for AutoCalStatus {
    const REG: u32 = offset::AUTO_CAL_STATUS;
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SdMemCompPadCtrl: u32 {
        const VOLTAGE_SEL_MASK    = 0x0F;
        const PAD_E_INPUT_OR_E_PWRD = 1 << 31;
    }
}
impl FlagReg for SdMemCompPadCtrl {
    const REG: u32 = offset::SDMEMCOMPPADCTRL;
}

bitflags! {
    /// Self-clearing trigger bit; polling it is how the driver detects DLL
    /// calibration completion (HS400 only).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct VendorDllCalCfg: u32 {
        const DLL_CAL_EN = 1 << 31;
    }
}
impl FlagReg for VendorDllCalCfg {
    const REG: u32 = offset::VENDOR_DLLCAL_CFG;
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct VendorDllCalCfgSta: u32 {
        const DLL_CAL_ACTIVE = 1 << 31;
    }
}
impl FlagReg for VendorDllCalCfgSta {
    const REG: u32 = offset::VENDOR_DLLCAL_CFG_STA;
}
