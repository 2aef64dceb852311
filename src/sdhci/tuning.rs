//! Sampling-clock tuning: iterative `SEND_TUNING_BLOCK` execution.
//!
//! The controller owns the tap sweep once `EXEC_TUNING` is set; the driver's
//! only job is to keep feeding it tuning-block commands and reading its own
//! completion/success bits back.

use log::{debug, warn};

use crate::platform::{Platform, wait_until};
use crate::regs::Reg;
use crate::sdhci::clock::{disable_sd_clock, enable_sd_clock};
use crate::sdhci::consts::timeout_us;
use crate::sdhci::err::{SdhciError, SdhciResult};
use crate::sdhci::reset::reset_cmd_and_dat;
use crate::sdhci::regs::{
    self, AutoCmd12AndHostControl2, BlockSizeCount, IntStatus, PresentState, TransferModeCommand,
    VendorTuningCntrl0,
};
use crate::sdhci::{BusWidth, Speed};

/// Maximum tuning iterations before giving up: SD host-controller spec calls
/// for 40 retries for most modes, 256 for HS200/HS400 on wider buses.
fn max_iterations(speed: Speed) -> u32 {
    match speed {
        Speed::MmcHs200 => 256,
        _ => 128,
    }
}

fn tuning_block_size(bus_width: BusWidth) -> u16 {
    match bus_width {
        BusWidth::Eight => 128,
        _ => 64,
    }
}

/// Runs the controller's own tuning state machine to completion.
///
/// Returns `Ok(true)` if the sampling clock ended up enabled (tuning
/// succeeded), `Ok(false)` if the controller gave up on its own (the loop
/// exhausted `EXEC_TUNING` without setting `SAMPLING_CLOCK_EN`). A hardware
/// timeout or command error is still an `Err`.
pub fn run(
    regs: &Reg<SdhciError>,
    platform: &dyn Platform,
    bus_width: BusWidth,
    opcode: u8,
    speed: Speed,
) -> SdhciResult<bool> {
    regs.modify_reg::<VendorTuningCntrl0>(|old| {
        (old & !(VendorTuningCntrl0::DIVIDER_MASK | VendorTuningCntrl0::MULTIPLIER_MASK))
            | VendorTuningCntrl0::MULTIPLIER_UNITY
            | VendorTuningCntrl0::SET_BY_HW
    });

    regs.set_reg(AutoCmd12AndHostControl2::EXEC_TUNING);

    let limit = max_iterations(speed);
    let mut iterations = 0u32;
    loop {
        if iterations >= limit {
            warn!("tuning for {:?} exhausted {} iterations", speed, limit);
            regs.clear_reg(AutoCmd12AndHostControl2::EXEC_TUNING);
            break;
        }
        iterations += 1;

        send_tuning(regs, platform, bus_width, opcode)?;

        let state = regs.read_reg::<AutoCmd12AndHostControl2>();
        if !state.contains(AutoCmd12AndHostControl2::EXEC_TUNING) {
            break;
        }
    }

    let state = regs.read_reg::<AutoCmd12AndHostControl2>();
    let ok = state.contains(AutoCmd12AndHostControl2::SAMPLING_CLOCK_EN);
    debug!(
        "tuning for {:?} finished after {} iteration(s), sampling_clock_enabled={}",
        speed, iterations, ok
    );
    Ok(ok)
}

/// Issues one `SEND_TUNING_BLOCK` and waits for the controller to capture its
/// single-block response via `BUF_READ_READY`.
///
/// The command issuance is wrapped in disable-clock/reset/re-enable-clock:
/// the tap reselect that `EXEC_TUNING` triggers on this controller can
/// corrupt an in-flight data bit if the clock keeps running across it.
fn send_tuning(
    regs: &Reg<SdhciError>,
    platform: &dyn Platform,
    bus_width: BusWidth,
    opcode: u8,
) -> SdhciResult<()> {
    wait_until(platform, timeout_us::CMD_INHIBIT, || {
        !regs.read_reg::<PresentState>().contains(PresentState::CMD_INHIBIT)
    })?;
    wait_until(platform, timeout_us::DAT_INHIBIT, || {
        !regs.read_reg::<PresentState>().contains(PresentState::DATA_INHIBIT)
    })?;

    let block_size = tuning_block_size(bus_width) as u32;
    regs.write_reg(BlockSizeCount::from_bits_truncate(block_size | (1 << 16)));

    regs.write_reg(IntStatus::BUF_READ_READY);

    disable_sd_clock(regs);

    regs.modify_reg::<TransferModeCommand>(|old| {
        (old & !TransferModeCommand::RESP_TYPE_MASK)
            | TransferModeCommand::DATA_PRESENT
            | TransferModeCommand::DATA_XFER_READ
            | TransferModeCommand::RESP_TYPE_48
            | TransferModeCommand::CMD_CRC_CHECK
            | TransferModeCommand::CMD_INDEX_CHECK
            | TransferModeCommand::command_index(opcode)
    });
    regs.write_32(regs::offset::ARGUMENT, 0);

    platform.sleep_us(1);
    reset_cmd_and_dat(regs, platform)?;

    enable_sd_clock(regs);
    let _ = regs.read_32(regs::offset::CLOCK_TIMEOUT_RESET);

    let result = wait_until(platform, timeout_us::TUNING_BUFFER_READY, || {
        let status = regs.read_reg::<IntStatus>();
        if status.intersects(IntStatus::ERROR_MASK) {
            regs.write_reg(status & IntStatus::ERROR_MASK);
            return true;
        }
        status.contains(IntStatus::BUF_READ_READY)
    });

    let status = regs.read_reg::<IntStatus>();
    regs.write_reg(status & (IntStatus::BUF_READ_READY | IntStatus::CMD_COMPLETE));

    if result.is_err() || status.intersects(IntStatus::ERROR_MASK) {
        warn!("tuning block request failed, resetting cmd/dat lines");
        reset_cmd_and_dat(regs, platform)?;
        return Err(SdhciError::TuningFailed);
    }

    Ok(())
}
