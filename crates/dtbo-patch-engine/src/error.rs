//! Error types for the DTBO patch engine.

use thiserror::Error;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while resolving a device or patching a document.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The device model does not map to any known profile.
    #[error("Unknown device model: {0}")]
    UnknownDevice(String),

    /// The device model string could not be obtained.
    #[error("Device model is not available")]
    MissingModel,

    /// The target identifier string could not be obtained.
    #[error("Target identifier is not available")]
    MissingTargetId,

    /// An identifier string is not a decimal or `0x` hex number.
    #[error("Invalid identifier: {0:?}")]
    InvalidIdentifier(String),

    /// A profile refers to a template slot it does not define.
    #[error("Profile {profile} references unknown template slot {slot}")]
    UnknownSlot { profile: String, slot: String },

    /// A clone refers to a template slot that captured nothing.
    #[error("No template captured for slot {0}")]
    MissingTemplate(String),

    /// A scaling computation was asked to divide by a zero frame rate.
    #[error("Base frame rate is zero")]
    ZeroFramerate,

    /// A scaling input required for the computation is missing.
    #[error("Missing base value: {0}")]
    MissingBase(&'static str),

    /// A scaling product does not fit in 64 bits.
    #[error("Scaling overflow: {value} * {factor}")]
    Overflow { value: u64, factor: u64 },
}
