//! Command opcodes, normative timeouts, and the clock source table.

/// SD/MMC command opcodes this driver issues.
pub mod cmd {
    pub const GO_IDLE_STATE: u8 = 0;
    pub const SEND_OP_COND: u8 = 1;
    pub const ALL_SEND_CID: u8 = 2;
    pub const SEND_RELATIVE_ADDR: u8 = 3;
    pub const SWITCH: u8 = 6;
    pub const SELECT_CARD: u8 = 7;
    pub const SEND_IF_COND: u8 = 8;
    /// Same wire opcode as `SEND_IF_COND`; MMC cards interpret CMD8 as
    /// SEND_EXT_CSD instead of the SD interface-condition probe.
    pub const SEND_EXT_CSD: u8 = 8;
    pub const SEND_CSD: u8 = 9;
    pub const SEND_CID: u8 = 10;
    pub const VOLTAGE_SWITCH: u8 = 11;
    pub const STOP_TRANSMISSION: u8 = 12;
    pub const SEND_STATUS: u8 = 13;
    pub const SET_BLOCKLEN: u8 = 16;
    pub const READ_SINGLE_BLOCK: u8 = 17;
    pub const READ_MULTIPLE_BLOCK: u8 = 18;
    pub const SEND_TUNING_BLOCK: u8 = 19;
    pub const SEND_TUNING_BLOCK_HS200: u8 = 21;
    pub const WRITE_BLOCK: u8 = 24;
    pub const WRITE_MULTIPLE_BLOCK: u8 = 25;
    pub const APP_CMD: u8 = 55;
}

/// Application-specific commands, valid only immediately after `APP_CMD`.
pub mod acmd {
    pub const SET_BUS_WIDTH: u8 = 6;
    pub const SD_SEND_OP_COND: u8 = 41;
    pub const SET_CLR_CARD_DETECT: u8 = 42;
    pub const SEND_SCR: u8 = 51;
}

/// Normative timed-wait bounds, in microseconds.
pub mod timeout_us {
    pub const CLOCK_STABLE: u32 = 2_000_000;
    pub const AUTO_CAL: u32 = 10_000;
    pub const DLL_CAL_PHASE1: u32 = 5_000;
    pub const DLL_CAL_PHASE2: u32 = 10_000;
    pub const CMD_INHIBIT: u32 = 10_000;
    pub const DAT_INHIBIT: u32 = 10_000;
    pub const BUSY: u32 = 10_000;
    pub const SOFTWARE_RESET: u32 = 100_000;
    pub const CMD_COMPLETE: u32 = 2_000_000;
    pub const XFER_COMPLETE_PER_SEGMENT: u32 = 2_000_000;
    pub const TUNING_BUFFER_READY: u32 = 50_000;
}

/// A fixed `(car_divider, achieved_source_freq_hz)` entry for a target bus
/// frequency. Entries are looked up by exact match on the target; there is
/// no interpolation or nearest-rate fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockSourceEntry {
    pub target_hz: u32,
    pub car_divider: u32,
    pub achieved_source_hz: u32,
}

/// The fixed target-frequency table for `{25, 26, 40.8, 50, 52, 100, 200,
/// 208}` MHz. `car_divider` values are PLLP-relative dividers for a 408 MHz
/// source clock, matching the donor SoC's CAR topology.
pub const CLOCK_SOURCE_TABLE: &[ClockSourceEntry] = &[
    ClockSourceEntry {
        target_hz: 25_000_000,
        car_divider: 16,
        achieved_source_hz: 25_500_000,
    },
    ClockSourceEntry {
        target_hz: 26_000_000,
        car_divider: 15,
        achieved_source_hz: 27_200_000,
    },
    ClockSourceEntry {
        target_hz: 40_800_000,
        car_divider: 9,
        achieved_source_hz: 40_800_000,
    },
    ClockSourceEntry {
        target_hz: 50_000_000,
        car_divider: 8,
        achieved_source_hz: 45_333_333,
    },
    ClockSourceEntry {
        target_hz: 52_000_000,
        car_divider: 7,
        achieved_source_hz: 51_000_000,
    },
    ClockSourceEntry {
        target_hz: 100_000_000,
        car_divider: 3,
        achieved_source_hz: 102_000_000,
    },
    ClockSourceEntry {
        target_hz: 200_000_000,
        car_divider: 1,
        achieved_source_hz: 204_000_000,
    },
    ClockSourceEntry {
        target_hz: 208_000_000,
        car_divider: 1,
        achieved_source_hz: 204_000_000,
    },
];

/// Looks up the table entry for an exact target frequency.
pub fn lookup_clock_source(target_hz: u32) -> Option<ClockSourceEntry> {
    CLOCK_SOURCE_TABLE
        .iter()
        .copied()
        .find(|e| e.target_hz == target_hz)
}

/// SDMA segment boundary: the controller raises a DMA interrupt every time
/// the transfer crosses this many bytes, and the driver reprograms
/// `dma_address` with the next boundary-aligned value to continue.
pub const SDMA_BOUNDARY_BYTES: u32 = 512 * 1024;

/// `block_size` field value selecting the 512 KiB SDMA boundary (top 3 bits
/// of the 16-bit block-size/count word).
pub const SDMA_BOUNDARY_FIELD: u32 = 0x7 << 12;

/// Maximum block count the register field can hold.
pub const MAX_BLOCK_COUNT: u32 = 0xFFFF;
