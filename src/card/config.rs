//! Compile-time card configuration.
//!
//! Unlike the donor's `MCIHostConfig`, nothing here is chosen at runtime from
//! a feature-flag default: this crate links into a boot-time firmware image
//! where the controller identity, card type, and negotiation ceiling are all
//! known at image-build time.

use crate::platform::{Controller, SocRevision, Voltage};
use crate::sdhci::BusWidth;

/// Which card-protocol family a controller instance is wired to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardTypeHint {
    /// Down-soldered eMMC; always present, never hot-pluggable.
    Emmc,
    /// Removable SD/SDHC/SDXC card behind a card-detect GPIO.
    RemovableSd,
}

/// Everything the card layer needs to know about one controller instance
/// before it ever touches a register, baked in at image-build time.
#[derive(Debug, Clone, Copy)]
pub struct CardConfig {
    pub controller: Controller,
    pub soc_revision: SocRevision,
    pub card_type: CardTypeHint,
    /// Bus voltage to request at power-up; SD negotiates down/up from here,
    /// eMMC is expected to match its fixed signaling rail.
    pub initial_voltage: Voltage,
    /// Widest bus width this board's pinout supports for the slot.
    pub max_width: BusWidth,
    /// Whether the SD path is permitted to attempt `VOLTAGE_SWITCH` (CMD11)
    /// at all; some boards wire 1.8 V support incompletely and must stay at
    /// 3.3 V regardless of what the card advertises.
    pub allow_voltage_switching: bool,
}

impl CardConfig {
    pub const fn emmc(controller: Controller, soc_revision: SocRevision, width: BusWidth) -> Self {
        CardConfig {
            controller,
            soc_revision,
            card_type: CardTypeHint::Emmc,
            initial_voltage: Voltage::V1_8,
            max_width: width,
            allow_voltage_switching: false,
        }
    }

    pub const fn removable_sd(controller: Controller, soc_revision: SocRevision) -> Self {
        CardConfig {
            controller,
            soc_revision,
            card_type: CardTypeHint::RemovableSd,
            initial_voltage: Voltage::V3_3,
            max_width: BusWidth::Four,
            allow_voltage_switching: true,
        }
    }
}
