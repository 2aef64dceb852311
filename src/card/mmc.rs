//! MMC/eMMC card-protocol state machine.
//!
//! ```text
//! powered_off -> idle -> op_cond_wait -> identified -> standby -> transfer -> [data]
//! ```
//! All transitions happen on successful command completion; a failed
//! transition command propagates its error without retry (the caller decides
//! whether to retry the whole enumeration).

use log::{debug, warn};

use crate::card::config::CardConfig;
use crate::card::err::{CardError, CardResult};
use crate::card::speed;
use crate::card::transfer::{self, CardDescriptor};
use crate::platform::Voltage;
use crate::sdhci::cmd::{CmdFlags, Command};
use crate::sdhci::consts::{cmd as cmdid, timeout_us};
use crate::sdhci::dma::Request;
use crate::sdhci::err::SdhciError;
use crate::sdhci::{BusWidth, Host, Speed};

const MMC_RCA: u32 = 1 << 16;
const OCR_BUSY: u32 = 1 << 31;
const OCR_SECTOR_MODE: u32 = 1 << 30;
const OCR_VOLTAGE_WINDOW: u32 = 0x00FF_8080;

const EXT_CSD_PARTITION_SUPPORT: usize = 160;
const EXT_CSD_BUS_WIDTH: usize = 183;
const EXT_CSD_HS_TIMING: usize = 185;
const EXT_CSD_PARTITION_CONFIG: usize = 179;
const EXT_CSD_PARTITION_SWITCH_TIME: usize = 199;
const EXT_CSD_CARD_TYPE: usize = 196;

const CARD_TYPE_HS52: u8 = 1 << 1;
const CARD_TYPE_HS200_1V8: u8 = 1 << 4;

/// Polls `predicate` (which itself issues a command each call) until it
/// returns true or `timeout_us` elapses, using the host's own microsecond
/// counter. A local reimplementation of [`crate::platform::wait_until`]'s
/// idiom: that helper takes `&dyn Platform` directly, which here would
/// alias the `&mut Host` the predicate needs to issue commands.
fn poll_until(host: &mut Host<'_>, timeout_us: u32, mut predicate: impl FnMut(&mut Host<'_>) -> bool) -> bool {
    let start = host.now_us();
    loop {
        if predicate(host) {
            return true;
        }
        if host.now_us().wrapping_sub(start) >= timeout_us {
            return false;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MmcState {
    PoweredOff,
    Idle,
    OpCondWait,
    Identified,
    Standby,
    Transfer,
}

/// `SWITCH_MODE` access modes (JEDEC EXT_CSD CMD6 argument bits 25:24).
#[derive(Debug, Clone, Copy)]
enum SwitchAccess {
    WriteByte = 3,
}

pub struct MmcCard {
    pub desc: CardDescriptor,
    state: MmcState,
    card_type: u8,
    partition_support: u8,
    partition_config: u8,
    partition_switch_time_us: u32,
}

impl MmcCard {
    /// Runs the full C7 identification/enumeration sequence, then hands off
    /// to the speed optimizer.
    pub fn init(host: &mut Host<'_>, config: &CardConfig) -> CardResult<Self> {
        let mut card = MmcCard {
            desc: CardDescriptor::new(),
            state: MmcState::PoweredOff,
            card_type: 0,
            partition_support: 0,
            partition_config: 0,
            partition_switch_time_us: 0,
        };

        card.go_idle(host)?;
        card.send_op_cond(host)?;
        card.all_send_cid(host)?;
        card.set_relative_addr(host)?;
        card.send_csd(host)?;
        card.select_card(host, true)?;
        card.set_blocklen(host, 512)?;
        card.send_ext_csd(host)?;

        if config.max_width != BusWidth::One {
            if let Err(e) = card.switch_bus_width(host, config.max_width) {
                warn!("mmc: bus width switch failed, staying at 1-bit: {:?}", e);
            }
        }

        let voltage_1v8 = matches!(host.bus_voltage(), Voltage::V1_8);
        let supports_hs200 = card.card_type & CARD_TYPE_HS200_1V8 != 0;
        let supports_hs52 = card.card_type & CARD_TYPE_HS52 != 0;

        let candidates: &[Speed] = if voltage_1v8 && supports_hs200 {
            &[Speed::MmcHs200, Speed::MmcHs]
        } else if supports_hs52 {
            &[Speed::MmcHs]
        } else {
            &[]
        };

        let _ = speed::negotiate(host, candidates, |host, target| {
            card.engage_speed(host, target)
        });

        card.state = MmcState::Transfer;
        debug!(
            "mmc card ready: rca=0x{:04x}, block_order={}, operating_speed={:?}",
            card.desc.relative_address, card.desc.read_block_order, host.operating_speed()
        );
        Ok(card)
    }

    fn engage_speed(&mut self, host: &mut Host<'_>, target: Speed) -> CardResult<()> {
        self.switch_mode(host, EXT_CSD_HS_TIMING, hs_timing_value(target), timeout_us::BUSY)?;
        host.select_speed(target)?;
        self.readback_ext_csd_confirms(host, EXT_CSD_HS_TIMING, hs_timing_value(target))
    }

    fn readback_ext_csd_confirms(
        &mut self,
        host: &mut Host<'_>,
        field: usize,
        expected: u8,
    ) -> CardResult<()> {
        let mut buf = [0u8; 512];
        self.read_ext_csd_into(host, &mut buf)?;
        if buf[field] != expected {
            return Err(CardError::SwitchFailed);
        }
        Ok(())
    }

    /// CMD0: no response, clears card state.
    fn go_idle(&mut self, host: &mut Host<'_>) -> CardResult<()> {
        let cmd = Command::new(cmdid::GO_IDLE_STATE, 0, CmdFlags::empty());
        host.send_command(&cmd, None)?;
        self.state = MmcState::Idle;
        Ok(())
    }

    /// CMD1 (R3, no CRC): polled until the busy bit clears and the sector
    /// addressing bit confirms a >2 GiB card.
    fn send_op_cond(&mut self, host: &mut Host<'_>) -> CardResult<()> {
        let arg = OCR_VOLTAGE_WINDOW | OCR_SECTOR_MODE;
        let mut sector_mode = false;
        let ready = poll_until(host, timeout_us::CMD_COMPLETE, |host| {
            let cmd = Command::new(cmdid::SEND_OP_COND, arg, CmdFlags::RESPONSE_PRESENT);
            if host.send_command(&cmd, None).is_err() {
                return false;
            }
            let ocr = host.last_responses()[0];
            if ocr & OCR_BUSY != 0 {
                sector_mode = ocr & OCR_SECTOR_MODE != 0;
                true
            } else {
                false
            }
        });
        if !ready {
            return Err(CardError::NotReady);
        }
        self.desc.uses_block_addressing = sector_mode;
        self.state = MmcState::OpCondWait;
        Ok(())
    }

    /// CMD2 (R2): store the 128-bit CID.
    fn all_send_cid(&mut self, host: &mut Host<'_>) -> CardResult<()> {
        let cmd = Command::new(
            cmdid::ALL_SEND_CID,
            0,
            CmdFlags::RESPONSE_PRESENT | CmdFlags::RESPONSE_136,
        );
        host.send_command(&cmd, None)?;
        self.desc.cid = host.last_responses();
        self.state = MmcState::Identified;
        Ok(())
    }

    /// CMD3 (R1): unlike SD, the MMC host assigns the RCA rather than
    /// querying the card for one.
    fn set_relative_addr(&mut self, host: &mut Host<'_>) -> CardResult<()> {
        let cmd = Command::new(
            cmdid::SEND_RELATIVE_ADDR,
            MMC_RCA,
            CmdFlags::RESPONSE_PRESENT | CmdFlags::CRC_CHECKED | CmdFlags::OPCODE_CHECKED,
        );
        host.send_command(&cmd, None)?;
        self.desc.relative_address = MMC_RCA >> 16;
        self.state = MmcState::Standby;
        Ok(())
    }

    /// CMD9 (R2): parse `READ_BL_LEN` (CSD bits [83:80]) into the read-block
    /// order. Only the CSD v1 field is consulted per the component design.
    fn send_csd(&mut self, host: &mut Host<'_>) -> CardResult<()> {
        let cmd = Command::new(
            cmdid::SEND_CSD,
            self.desc.relative_address << 16,
            CmdFlags::RESPONSE_PRESENT | CmdFlags::RESPONSE_136,
        );
        host.send_command(&cmd, None)?;
        let csd = host.last_responses();
        // READ_BL_LEN sits at CSD bits [83:80]; csd[2] holds bits [95:64] of
        // the 128-bit value after the 136-bit response unpack.
        self.desc.read_block_order = ((csd[2] >> 16) & 0xF) as u8;
        Ok(())
    }

    /// CMD7 (R1b with the card selected, R1 with none when deselecting).
    fn select_card(&mut self, host: &mut Host<'_>, selected: bool) -> CardResult<()> {
        let arg = if selected { self.desc.relative_address << 16 } else { 0 };
        let cmd = Command::new(
            cmdid::SELECT_CARD,
            arg,
            CmdFlags::RESPONSE_PRESENT | CmdFlags::BUSY | CmdFlags::CRC_CHECKED,
        );
        host.send_command(&cmd, None)?;
        Ok(())
    }

    /// CMD16: fix the block length to 512 bytes; all SDMA transfers this
    /// driver issues use that size.
    fn set_blocklen(&mut self, host: &mut Host<'_>, block_size: u32) -> CardResult<()> {
        let cmd = Command::new(
            cmdid::SET_BLOCKLEN,
            block_size,
            CmdFlags::RESPONSE_PRESENT | CmdFlags::CRC_CHECKED | CmdFlags::OPCODE_CHECKED,
        );
        host.send_command(&cmd, None)?;
        self.desc.read_block_order = block_size.trailing_zeros() as u8;
        Ok(())
    }

    /// CMD8 (MMC semantics: SEND_EXT_CSD): read the 512-byte extended CSD
    /// and extract partition support/config/switch-time and the card-type
    /// speed-capability bitmap.
    fn send_ext_csd(&mut self, host: &mut Host<'_>) -> CardResult<()> {
        let mut buf = [0u8; 512];
        self.read_ext_csd_into(host, &mut buf)?;
        self.partition_support = buf[EXT_CSD_PARTITION_SUPPORT];
        self.partition_config = buf[EXT_CSD_PARTITION_CONFIG];
        self.partition_switch_time_us = buf[EXT_CSD_PARTITION_SWITCH_TIME] as u32 * 10_000;
        self.card_type = buf[EXT_CSD_CARD_TYPE];
        Ok(())
    }

    fn read_ext_csd_into(&mut self, host: &mut Host<'_>, buf: &mut [u8; 512]) -> CardResult<()> {
        let cmd = Command::new(
            cmdid::SEND_EXT_CSD,
            0,
            CmdFlags::RESPONSE_PRESENT | CmdFlags::CRC_CHECKED | CmdFlags::OPCODE_CHECKED,
        );
        let mut req = Request {
            data: buf,
            block_size: 512,
            num_blocks: 1,
            is_multi_block: false,
            is_read: true,
            is_auto_cmd12: false,
        };
        host.send_command(&cmd, Some(&mut req))?;
        Ok(())
    }

    /// `SWITCH_MODE` (CMD6) writing one EXT_CSD byte, then `READ_STATUS`
    /// (CMD13) polling for ready-for-data and non-programming within
    /// `timeout_us` (partition switches need the card's own
    /// `partition_switch_time`).
    fn switch_mode(
        &mut self,
        host: &mut Host<'_>,
        field: usize,
        value: u8,
        timeout_us: u32,
    ) -> CardResult<()> {
        let arg = ((SwitchAccess::WriteByte as u32) << 24) | ((field as u32) << 16) | ((value as u32) << 8);
        let cmd = Command::new(
            cmdid::SWITCH,
            arg,
            CmdFlags::RESPONSE_PRESENT | CmdFlags::BUSY | CmdFlags::CRC_CHECKED,
        );
        host.send_command(&cmd, None)?;
        self.poll_ready_for_data(host, timeout_us)
    }

    fn poll_ready_for_data(&mut self, host: &mut Host<'_>, timeout_us: u32) -> CardResult<()> {
        const READY_FOR_DATA: u32 = 1 << 8;
        const CURRENT_STATE_MASK: u32 = 0xF << 9;
        const STATE_PROGRAMMING: u32 = 7 << 9;

        let rca = self.desc.relative_address;
        let ready = poll_until(host, timeout_us, |host| {
            let cmd = Command::new(
                cmdid::SEND_STATUS,
                rca << 16,
                CmdFlags::RESPONSE_PRESENT | CmdFlags::CRC_CHECKED,
            );
            if host.send_command(&cmd, None).is_err() {
                return false;
            }
            let status = host.last_responses()[0];
            status & READY_FOR_DATA != 0 && status & CURRENT_STATE_MASK != STATE_PROGRAMMING
        });
        if ready { Ok(()) } else { Err(CardError::SwitchTimeout) }
    }

    /// Bus-width switch: EXT_CSD field 183, plus the matching host-control
    /// bits.
    fn switch_bus_width(&mut self, host: &mut Host<'_>, width: BusWidth) -> CardResult<()> {
        let value = match width {
            BusWidth::One => 0,
            BusWidth::Four => 1,
            BusWidth::Eight => 2,
        };
        self.switch_mode(host, EXT_CSD_BUS_WIDTH, value, timeout_us::BUSY)?;
        host.set_bus_width(width)?;
        Ok(())
    }

    /// Partition select: write `PARTITION_CONFIG`, then sleep the card's
    /// declared `partition_switch_time`.
    pub fn select_partition(&mut self, host: &mut Host<'_>, partition_config: u8) -> CardResult<()> {
        self.switch_mode(
            host,
            EXT_CSD_PARTITION_CONFIG,
            partition_config,
            timeout_us::BUSY,
        )?;
        host.sleep_us(self.partition_switch_time_us.max(1));
        self.partition_config = partition_config;
        Ok(())
    }

    pub fn partition_support(&self) -> u8 {
        self.partition_support
    }

    pub fn read_blocks(&mut self, host: &mut Host<'_>, block: u32, count: u32, out: &mut [u8]) -> CardResult<()> {
        transfer::read_blocks(host, &self.desc, block, count, out)
    }

    /// Writes are gated by the eMMC write-permission flag on the host handle
    /// (I6/P7): with the gate clear, this returns `PermissionDenied` without
    /// issuing any card command.
    pub fn write_blocks(
        &mut self,
        host: &mut Host<'_>,
        block: u32,
        count: u32,
        data: &mut [u8],
    ) -> CardResult<()> {
        if !host.emmc_write_allowed() {
            return Err(CardError::Host(SdhciError::PermissionDenied));
        }
        transfer::write_blocks(host, &self.desc, block, count, data)
    }
}

fn hs_timing_value(speed: Speed) -> u8 {
    match speed {
        Speed::MmcHs => 1,
        Speed::MmcHs200 => 2,
        Speed::MmcHs400 => 3,
        _ => 0,
    }
}
