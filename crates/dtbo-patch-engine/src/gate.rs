//! Device identity and per-file eligibility.
//!
//! The identity is resolved once per run and is fatal on any doubt. Each file
//! then carries its own identifier; only files matching the run's target, or
//! one of the active profile's listed alternates, are eligible.

use serde::Serialize;
use tracing::{debug, info};

use crate::profile::{DeviceProfile, ProfileRegistry};
use crate::property::{get_numeric, parse_number};
use crate::{Error, Result};

/// Default name of the per-file identifier property.
pub const DEFAULT_IDENTITY_PROPERTY: &str = "oplus,dtsi_no";

/// Parses an identifier: hex when `0x`/`0X` prefixed, else decimal.
pub fn parse_identifier(text: &str) -> Result<u64> {
    parse_number(text).ok_or_else(|| Error::InvalidIdentifier(text.trim().to_string()))
}

/// The device this run patches for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceIdentity {
    pub model: String,
    pub profile: String,
    pub target_id: u64,
}

impl DeviceIdentity {
    /// Resolves the identity from the two external facts.
    pub fn resolve(
        model: Option<&str>,
        target_id: Option<&str>,
        registry: &ProfileRegistry,
    ) -> Result<Self> {
        let model = model
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .ok_or(Error::MissingModel)?;
        let target_id = target_id
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(Error::MissingTargetId)?;

        let profile = registry
            .for_model(model)
            .ok_or_else(|| Error::UnknownDevice(model.to_string()))?;
        let target_id = parse_identifier(target_id)?;

        info!(
            "Device {} uses profile {} (target {})",
            model, profile.id, target_id
        );
        Ok(Self {
            model: model.to_string(),
            profile: profile.id.clone(),
            target_id,
        })
    }
}

/// Whether a file may be patched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "kebab-case")]
pub enum GateDecision {
    /// The file identifier equals the target.
    Eligible { file_id: u64 },
    /// The file identifier is a listed alternate of the active profile.
    EligibleAlias { file_id: u64 },
    /// The file carries no identifier.
    SkipMissingId,
    /// The file belongs to another target.
    SkipMismatch { file_id: u64 },
}

impl GateDecision {
    pub fn is_eligible(&self) -> bool {
        matches!(
            self,
            GateDecision::Eligible { .. } | GateDecision::EligibleAlias { .. }
        )
    }
}

/// Per-file check against the run identity.
#[derive(Debug, Clone)]
pub struct DeviceGate<'a> {
    identity: &'a DeviceIdentity,
    profile: &'a DeviceProfile,
    property: &'a str,
}

impl<'a> DeviceGate<'a> {
    pub fn new(identity: &'a DeviceIdentity, profile: &'a DeviceProfile, property: &'a str) -> Self {
        Self {
            identity,
            profile,
            property,
        }
    }

    /// Decides whether `text` may be patched.
    pub fn check(&self, text: &str) -> GateDecision {
        let Some(file_id) = get_numeric(text, self.property) else {
            debug!("No {} in document", self.property);
            return GateDecision::SkipMissingId;
        };
        if file_id == self.identity.target_id {
            GateDecision::Eligible { file_id }
        } else if self.profile.compatible_ids.contains(&file_id) {
            info!(
                "Accepting alternate identifier {} for profile {}",
                file_id, self.profile.id
            );
            GateDecision::EligibleAlias { file_id }
        } else {
            GateDecision::SkipMismatch { file_id }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_identifier() {
        assert_eq!(parse_identifier("22811"), Ok(22811));
        assert_eq!(parse_identifier("0x591b\n"), Ok(0x591b));
        assert_eq!(
            parse_identifier("abc"),
            Err(Error::InvalidIdentifier("abc".to_string()))
        );
    }

    #[test]
    fn test_resolve_is_fatal_on_doubt() {
        let registry = ProfileRegistry::builtin();
        assert_eq!(
            DeviceIdentity::resolve(None, Some("1"), &registry),
            Err(Error::MissingModel)
        );
        assert_eq!(
            DeviceIdentity::resolve(Some("CPH2581"), Some("  "), &registry),
            Err(Error::MissingTargetId)
        );
        assert_eq!(
            DeviceIdentity::resolve(Some("Pixel 8"), Some("1"), &registry),
            Err(Error::UnknownDevice("Pixel 8".to_string()))
        );
        assert!(matches!(
            DeviceIdentity::resolve(Some("CPH2581"), Some("prj"), &registry),
            Err(Error::InvalidIdentifier(_))
        ));

        let identity = DeviceIdentity::resolve(Some("CPH2581\n"), Some("22811"), &registry).unwrap();
        assert_eq!(identity.profile, "ae084-wqhd");
        assert_eq!(identity.target_id, 22811);
    }

    #[test]
    fn test_gate_decisions() {
        let registry = ProfileRegistry::builtin();
        let identity = DeviceIdentity::resolve(Some("CPH2581"), Some("22811"), &registry).unwrap();
        let profile = registry.get(&identity.profile).unwrap();
        let gate = DeviceGate::new(&identity, profile, DEFAULT_IDENTITY_PROPERTY);

        assert_eq!(
            gate.check("/ {\n\toplus,dtsi_no = <0x591b>;\n};"),
            GateDecision::Eligible { file_id: 22811 }
        );
        assert_eq!(
            gate.check("/ {\n\toplus,dtsi_no = <22861>;\n};"),
            GateDecision::EligibleAlias { file_id: 22861 }
        );
        assert_eq!(
            gate.check("/ {\n\toplus,dtsi_no = <22812>;\n};"),
            GateDecision::SkipMismatch { file_id: 22812 }
        );
        assert_eq!(gate.check("/ {\n};"), GateDecision::SkipMissingId);
        assert!(!GateDecision::SkipMissingId.is_eligible());
    }

    #[test]
    fn test_alias_list_belongs_to_active_profile() {
        let registry = ProfileRegistry::builtin();
        let identity = DeviceIdentity::resolve(Some("PJE110"), Some("22811"), &registry).unwrap();
        let profile = registry.get(&identity.profile).unwrap();
        let gate = DeviceGate::new(&identity, profile, DEFAULT_IDENTITY_PROPERTY);
        assert_eq!(
            gate.check("oplus,dtsi_no = <22861>;"),
            GateDecision::SkipMismatch { file_id: 22861 }
        );
    }
}
