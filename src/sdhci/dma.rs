//! SDMA engine: bounce-buffer setup and the 512 KiB boundary-reload loop.
//!
//! ADMA2 descriptor chaining is not implemented; every data-bearing command
//! goes through a single bounce buffer and the controller's own DMA-boundary
//! interrupt, reprogramming `dma_address` each time the boundary is crossed.

use log::{debug, warn};

use crate::osa::pool_buffer::PoolBuffer;
use crate::platform::{Platform, wait_until};
use crate::regs::Reg;
use crate::sdhci::consts::{timeout_us, MAX_BLOCK_COUNT, SDMA_BOUNDARY_BYTES, SDMA_BOUNDARY_FIELD};
use crate::sdhci::err::{SdhciError, SdhciResult};
use crate::sdhci::regs::{self, BlockSizeCount, IntStatus, TransferModeCommand};
use crate::sdhci::reset::reset_cmd_and_dat;

/// A data-bearing transfer request.
///
/// `block_size` must fit the controller register field and `num_blocks` is
/// clamped by [`setup`] to the register's 16-bit limit.
pub struct Request<'a> {
    pub data: &'a mut [u8],
    pub block_size: u16,
    pub num_blocks: u32,
    pub is_multi_block: bool,
    pub is_read: bool,
    pub is_auto_cmd12: bool,
}

/// State threaded between [`setup`] and [`run_to_completion`].
pub struct DmaTransfer<'a> {
    bounce: &'a mut PoolBuffer,
    request_len: usize,
    is_read: bool,
    next_dma_addr: u32,
}

/// Programs `dma_address`, the block-size/boundary field, block-count, and
/// the transfer-mode bits for `req`. Refuses zero-length requests.
///
/// SDMA mode always routes through the bounce buffer (I2); write transfers
/// are copied into it before this call returns.
pub fn setup<'a>(
    regs: &Reg<SdhciError>,
    bounce: &'a mut PoolBuffer,
    req: &mut Request<'_>,
) -> SdhciResult<DmaTransfer<'a>> {
    if req.data.is_empty() || req.num_blocks == 0 {
        return Err(SdhciError::Unsupported);
    }
    let num_blocks = req.num_blocks.min(MAX_BLOCK_COUNT);
    let total_len = (num_blocks as usize) * (req.block_size as usize);
    if total_len > bounce.size() {
        return Err(SdhciError::Unsupported);
    }

    if !req.is_read {
        bounce
            .copy_from_slice(&req.data[..total_len])
            .map_err(|_| SdhciError::Unsupported)?;
    }

    let base = bounce.addr().as_ptr() as u32;
    regs.write_32(regs::offset::DMA_ADDRESS, base);

    let block_size_field = (req.block_size as u32 & 0x0FFF) | SDMA_BOUNDARY_FIELD;
    let block_count_field = num_blocks << 16;
    regs.write_reg(BlockSizeCount::from_bits_truncate(
        block_size_field | block_count_field,
    ));

    let mut mode = TransferModeCommand::DMA_ENABLE;
    if req.is_multi_block {
        mode |= TransferModeCommand::MULTI_BLOCK | TransferModeCommand::BLOCK_COUNT_ENABLE;
    }
    if req.is_read {
        mode |= TransferModeCommand::DATA_XFER_READ;
    }
    if req.is_auto_cmd12 {
        mode |= TransferModeCommand::AUTO_CMD12;
    }
    regs.modify_reg::<TransferModeCommand>(|old| {
        (old & TransferModeCommand::RESP_TYPE_MASK) | mode
    });

    let next_dma_addr = base.wrapping_add(SDMA_BOUNDARY_BYTES);

    Ok(DmaTransfer {
        bounce,
        request_len: total_len,
        is_read: req.is_read,
        next_dma_addr,
    })
}

/// What a single `int_status` read during [`run_to_completion`]'s poll means
/// for the transfer in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PollStep {
    /// A boundary interrupt fired; `dma_address` must be reprogrammed.
    Reload,
    Done,
    Error,
    Pending,
}

/// Pure classification of one `int_status` snapshot (P4): error bits win
/// over completion, which wins over a boundary reload, which wins over
/// still-pending.
fn classify(status: IntStatus) -> PollStep {
    if status.intersects(IntStatus::ERROR_MASK) {
        PollStep::Error
    } else if status.contains(IntStatus::XFER_COMPLETE) {
        PollStep::Done
    } else if status.contains(IntStatus::DMA_INTERRUPT) {
        PollStep::Reload
    } else {
        PollStep::Pending
    }
}

/// Drives the DMA completion loop: services boundary-reload interrupts until
/// transfer-complete fires or the per-segment deadline elapses. On
/// completion of a read, copies the bounce buffer back into `req.data`.
pub fn run_to_completion(
    regs: &Reg<SdhciError>,
    platform: &dyn Platform,
    transfer: DmaTransfer<'_>,
    req: &mut Request<'_>,
) -> SdhciResult<()> {
    let DmaTransfer {
        bounce,
        request_len,
        is_read,
        mut next_dma_addr,
    } = transfer;

    let result = wait_until(platform, timeout_us::XFER_COMPLETE_PER_SEGMENT, || {
        let status = regs.read_reg::<IntStatus>();
        match classify(status) {
            PollStep::Error => {
                regs.write_reg(status & IntStatus::ERROR_MASK);
                true
            }
            PollStep::Done => {
                regs.write_reg(IntStatus::XFER_COMPLETE);
                true
            }
            PollStep::Reload => {
                regs.write_reg(IntStatus::DMA_INTERRUPT);
                regs.write_32(regs::offset::DMA_ADDRESS, next_dma_addr);
                next_dma_addr = next_dma_addr.wrapping_add(SDMA_BOUNDARY_BYTES);
                debug!("dma boundary reload, next_dma_addr=0x{next_dma_addr:08x}");
                false
            }
            PollStep::Pending => false,
        }
    });

    let final_status = regs.read_reg::<IntStatus>();
    if final_status.intersects(IntStatus::ERROR_MASK) {
        warn!("dma transfer error status, resetting cmd/dat lines");
        reset_cmd_and_dat(regs, platform)?;
        return Err(SdhciError::CommandError);
    }
    if result.is_err() {
        warn!("dma transfer stalled, resetting cmd/dat lines");
        reset_cmd_and_dat(regs, platform)?;
        return Err(SdhciError::Timeout);
    }

    if is_read {
        let dst = &mut req.data[..request_len];
        let src = bounce.as_slice_in_len::<u8>(request_len).map_err(|_| SdhciError::Unsupported)?;
        dst.copy_from_slice(src);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_prioritizes_error_over_everything_else() {
        let status = IntStatus::DATA_CRC_ERROR | IntStatus::XFER_COMPLETE | IntStatus::DMA_INTERRUPT;
        assert_eq!(classify(status), PollStep::Error);
    }

    #[test]
    fn classify_prioritizes_completion_over_a_reload() {
        let status = IntStatus::XFER_COMPLETE | IntStatus::DMA_INTERRUPT;
        assert_eq!(classify(status), PollStep::Done);
    }

    #[test]
    fn classify_reports_a_lone_boundary_interrupt_as_reload() {
        assert_eq!(classify(IntStatus::DMA_INTERRUPT), PollStep::Reload);
    }

    #[test]
    fn classify_is_pending_with_no_relevant_bits_set() {
        assert_eq!(classify(IntStatus::empty()), PollStep::Pending);
    }

    /// P4: a 1 MiB transfer (two 512 KiB SDMA segments) crosses exactly one
    /// boundary before completion, and `dma_address` advances by exactly
    /// `SDMA_BOUNDARY_BYTES` at that crossing (S4).
    #[test]
    fn boundary_reload_count_matches_transfer_size() {
        let base: u32 = 0x8000_0000;
        let mut next_dma_addr = base.wrapping_add(SDMA_BOUNDARY_BYTES);
        let mut reloads = 0u32;

        let statuses = [IntStatus::DMA_INTERRUPT, IntStatus::XFER_COMPLETE];
        for status in statuses {
            match classify(status) {
                PollStep::Reload => {
                    assert_eq!(next_dma_addr, base + SDMA_BOUNDARY_BYTES);
                    next_dma_addr = next_dma_addr.wrapping_add(SDMA_BOUNDARY_BYTES);
                    reloads += 1;
                }
                PollStep::Done => break,
                other => panic!("unexpected poll step {other:?}"),
            }
        }

        assert_eq!(reloads, 1, "1 MiB / 512 KiB transfer must reload exactly once");
        assert_eq!(next_dma_addr, base + 2 * SDMA_BOUNDARY_BYTES);
    }
}
