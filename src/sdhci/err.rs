//! Error types for the SDHCI host core.

use crate::regs::RegError;

/// Errors surfaced by the host core, command engine, DMA engine, and tuning
/// engine. Card-protocol layers (`crate::card`) convert their own failures
/// into one of these variants at the component boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdhciError {
    /// Pre-init card-detect check on the removable controller found no card.
    NoCard,
    /// Requested voltage, speed, bus width, or card variant cannot be
    /// serviced, or a required capability (e.g. 64-bit addressing) is absent.
    Unsupported,
    /// A polled deadline elapsed; the affected lines have been software-reset.
    Timeout,
    /// The int-status error mask latched during command or data phase.
    CommandError,
    /// The card's response failed a hardware-delegated check (CRC/opcode
    /// index), or an expected status bit was not set.
    ResponseInvalid,
    /// READ_STATUS reported an error bit (`MMC_STATUS_CHECK_ERROR`).
    CardError,
    /// DAT0 failed to release within the busy deadline after an R1B response.
    Busy,
    /// eMMC write attempted without the eMMC-write permission gate, or any
    /// write on a controller with write-disabled.
    PermissionDenied,
    /// The execute-tuning loop exited with SAMPLING-CLOCK-ENABLED clear.
    TuningFailed,
}

impl RegError for SdhciError {
    fn timeout() -> Self {
        SdhciError::Timeout
    }
}

/// Result type for the host core and its sub-engines.
pub type SdhciResult<T = ()> = Result<T, SdhciError>;
