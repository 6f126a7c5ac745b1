//! DTBO Patch Engine
//!
//! Rewrites display timing nodes in decompiled device tree overlay sources
//! so a panel advertises extra refresh rates. Which blocks are touched, and
//! how, comes from a table of device profiles; each document is gated on its
//! identifier before anything is changed.

pub mod edit;
pub mod error;
pub mod gate;
pub mod patcher;
pub mod profile;
pub mod property;
pub mod scaling;
pub mod template;
pub mod transform;
pub mod tree;

pub use error::{Error, Result};
pub use gate::{DeviceGate, DeviceIdentity, GateDecision, DEFAULT_IDENTITY_PROPERTY};
pub use patcher::{Inspection, PatchOutcome, PatchReport, Patcher};
pub use profile::{DeviceProfile, ProfileRegistry};
