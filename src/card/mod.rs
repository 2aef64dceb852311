//! Card-protocol layer: the MMC and SD state machines that sit on top of the
//! SDHCI host core, plus the pieces shared between them.

pub mod config;
pub mod err;
pub mod mmc;
pub mod sd;
pub mod speed;
pub mod transfer;
