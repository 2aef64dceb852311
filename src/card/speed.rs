//! Speed optimizer: climbs the fastest bus mode the card and board both
//! support, falling back to the previous mode on switch or tuning failure.
//!
//! [`Host::select_speed`] only commits its `operating_speed` field once
//! everything — clock reprogramming, UHS bits, and tuning where required —
//! has succeeded; a failed candidate therefore leaves the host at whatever
//! speed it was at before this function was called, with no separate
//! "revert" step needed here.

use log::{info, warn};

use crate::card::err::{CardError, CardResult};
use crate::sdhci::{Host, Speed};

/// Tries each candidate in order (fastest first), applying it via `engage`
/// (which performs the card-side `SWITCH_MODE`/EXT_CSD write and then calls
/// [`Host::select_speed`]). Returns the first one that sticks; if every
/// candidate fails this is not itself an error to the caller's caller — the
/// card simply remains at its current, already-verified speed.
pub fn negotiate(
    host: &mut Host<'_>,
    candidates: &[Speed],
    mut engage: impl FnMut(&mut Host<'_>, Speed) -> CardResult<()>,
) -> CardResult<Speed> {
    let baseline = host.operating_speed();
    for &speed in candidates {
        match engage(host, speed) {
            Ok(()) => {
                info!("speed optimizer: engaged {:?}", speed);
                return Ok(speed);
            }
            Err(err) => {
                warn!("speed optimizer: {:?} failed ({:?}), trying next candidate", speed, err);
            }
        }
    }
    if candidates.is_empty() {
        return Ok(baseline);
    }
    Err(CardError::SpeedNegotiationFailed)
}
