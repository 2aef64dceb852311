//! Shared read/write path and the card descriptor built during enumeration.

use log::trace;

use crate::card::err::{CardError, CardResult};
use crate::sdhci::cmd::{CmdFlags, Command};
use crate::sdhci::consts::cmd as cmdid;
use crate::sdhci::dma::Request;
use crate::sdhci::err::SdhciError;
use crate::sdhci::Host;

/// Card state accumulated during enumeration, common to the MMC and SD
/// protocol layers.
#[derive(Debug, Clone, Copy)]
pub struct CardDescriptor {
    pub relative_address: u32,
    pub uses_block_addressing: bool,
    pub spec_version: u32,
    pub cid: [u32; 4],
    /// `READ_BL_LEN` from CSD bits [83:80], as the power-of-two block order
    /// (e.g. 9 for a 512-byte block).
    pub read_block_order: u8,
    pub block_count: u32,
}

impl CardDescriptor {
    pub const fn new() -> Self {
        CardDescriptor {
            relative_address: 0,
            uses_block_addressing: false,
            spec_version: 0,
            cid: [0; 4],
            read_block_order: 9,
            block_count: 0,
        }
    }

    pub fn block_size(&self) -> u32 {
        1 << self.read_block_order as u32
    }
}

/// Converts a block index into the command argument for this card: the raw
/// block number for block-addressed (SDHC/SDXC/large eMMC) cards, or the
/// byte offset for byte-addressed ones (P8).
fn block_argument(card: &CardDescriptor, block: u32) -> u32 {
    if card.uses_block_addressing {
        block
    } else {
        block.wrapping_mul(card.block_size())
    }
}

/// `read(block, count)`: picks `READ_SINGLE_BLOCK`/`READ_MULTIPLE_BLOCK`,
/// converts the block address per P8, and dispatches through
/// [`Host::send_command`] with an SDMA request descriptor.
pub fn read_blocks(
    host: &mut Host<'_>,
    card: &CardDescriptor,
    block: u32,
    count: u32,
    out: &mut [u8],
) -> CardResult<()> {
    let block_size = card.block_size();
    if (count as u64) * (block_size as u64) > out.len() as u64 {
        return Err(CardError::Host(SdhciError::Unsupported));
    }

    let opcode = if count == 1 {
        cmdid::READ_SINGLE_BLOCK
    } else {
        cmdid::READ_MULTIPLE_BLOCK
    };
    let cmd = Command::new(
        opcode,
        block_argument(card, block),
        CmdFlags::RESPONSE_PRESENT | CmdFlags::CRC_CHECKED | CmdFlags::OPCODE_CHECKED,
    );
    let mut req = Request {
        data: &mut out[..(count * block_size) as usize],
        block_size: block_size as u16,
        num_blocks: count,
        is_multi_block: count > 1,
        is_read: true,
        is_auto_cmd12: count > 1,
    };
    trace!("read_blocks(block={block}, count={count})");
    host.send_command(&cmd, Some(&mut req))?;
    Ok(())
}

/// `write(block, count)`: same addressing/command-shape logic as
/// [`read_blocks`], gated on the caller having already checked the two-level
/// write-permission gate (I6/P7) before calling.
///
/// `data` is taken `&mut` even though a write never mutates it: it is copied
/// into the bounce buffer before the command is issued and never written
/// back, but [`Request`] is shared between both directions of transfer.
pub fn write_blocks(
    host: &mut Host<'_>,
    card: &CardDescriptor,
    block: u32,
    count: u32,
    data: &mut [u8],
) -> CardResult<()> {
    let block_size = card.block_size();
    if (count as u64) * (block_size as u64) > data.len() as u64 {
        return Err(CardError::Host(SdhciError::Unsupported));
    }

    let opcode = if count == 1 {
        cmdid::WRITE_BLOCK
    } else {
        cmdid::WRITE_MULTIPLE_BLOCK
    };
    let cmd = Command::new(
        opcode,
        block_argument(card, block),
        CmdFlags::RESPONSE_PRESENT | CmdFlags::CRC_CHECKED | CmdFlags::OPCODE_CHECKED,
    );
    let mut req = Request {
        data: &mut data[..(count * block_size) as usize],
        block_size: block_size as u16,
        num_blocks: count,
        is_multi_block: count > 1,
        is_read: false,
        is_auto_cmd12: count > 1,
    };
    trace!("write_blocks(block={block}, count={count})");
    host.send_command(&cmd, Some(&mut req))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// P8: byte-addressed cards take a byte offset; block-addressed cards
    /// (SDHC/SDXC, large eMMC) take the raw block number.
    #[test]
    fn block_argument_scales_by_block_size_when_byte_addressed() {
        let mut card = CardDescriptor::new();
        card.uses_block_addressing = false;
        card.read_block_order = 9; // 512-byte blocks

        assert_eq!(block_argument(&card, 0), 0);
        assert_eq!(block_argument(&card, 1), 512);
        assert_eq!(block_argument(&card, 4), 4 * 512);
    }

    #[test]
    fn block_argument_is_the_raw_block_number_when_block_addressed() {
        let mut card = CardDescriptor::new();
        card.uses_block_addressing = true;
        card.read_block_order = 9;

        assert_eq!(block_argument(&card, 131072), 131072);
    }
}
