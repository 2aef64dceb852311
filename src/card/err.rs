//! Card-protocol error type.
//!
//! The command engine, DMA engine, and tuning engine report [`SdhciError`];
//! the card-protocol layer wraps that with its own enumeration/state-machine
//! failures and converts back into [`SdhciError`] at the public boundary, the
//! way the host core wraps the register layer's [`RegError`](crate::regs::RegError).

use crate::sdhci::err::SdhciError;

/// Errors raised while walking the MMC or SD identification/negotiation
/// state machine, on top of whatever the host core itself reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardError {
    /// A lower-layer host-core failure; see the wrapped variant.
    Host(SdhciError),
    /// The card never reached the expected state within its retry budget
    /// (`SEND_OP_COND`/`APP_SEND_OP_COND` polling exhausted).
    NotReady,
    /// `SEND_IF_COND`/`APP_SEND_OP_COND` response didn't echo what was sent,
    /// or reported a voltage range the host cannot supply.
    UnusableCard,
    /// `SWITCH_MODE` (CMD6) or EXT_CSD field write didn't take; the
    /// post-switch status/readback didn't confirm the requested mode.
    SwitchFailed,
    /// `READ_STATUS` polling after a switch exceeded its caller-supplied
    /// timeout without reaching ready-for-data/non-programming.
    SwitchTimeout,
    /// Every speed candidate in the optimizer's fallback chain failed;
    /// the card has been left at the last speed that tuned successfully.
    SpeedNegotiationFailed,
}

impl From<SdhciError> for CardError {
    fn from(e: SdhciError) -> Self {
        CardError::Host(e)
    }
}

pub type CardResult<T = ()> = Result<T, CardError>;
