//! Per-document pipeline: gate, scope, capture, transform, materialise.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{debug, info};

use crate::gate::{DeviceGate, DeviceIdentity, GateDecision};
use crate::profile::{DeviceProfile, ProfileRegistry};
use crate::property::rewrite_all_occurrences;
use crate::template::{capture, Templates};
use crate::transform::{ActionRecord, Transformer};
use crate::tree::{blocks, BlockSearch, DocumentTree, Scope, ScopePolicy};
use crate::{Error, Result};

/// What was done to an eligible document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PatchReport {
    /// Captured template node names, by slot.
    pub templates: BTreeMap<String, String>,
    pub actions: Vec<ActionRecord>,
    /// Lines rewritten by document-wide overrides.
    pub overrides: usize,
    pub unterminated: usize,
}

/// Result of patching one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchOutcome {
    /// The gate rejected the document; it must stay byte-identical.
    Skipped(GateDecision),
    /// Eligible, but nothing changed.
    Unchanged {
        decision: GateDecision,
        report: PatchReport,
    },
    Patched {
        decision: GateDecision,
        report: PatchReport,
        text: String,
    },
}

impl PatchOutcome {
    pub fn status(&self) -> &'static str {
        match self {
            PatchOutcome::Skipped(_) => "skipped",
            PatchOutcome::Unchanged { .. } => "unchanged",
            PatchOutcome::Patched { .. } => "patched",
        }
    }

    pub fn decision(&self) -> GateDecision {
        match self {
            PatchOutcome::Skipped(decision)
            | PatchOutcome::Unchanged { decision, .. }
            | PatchOutcome::Patched { decision, .. } => *decision,
        }
    }

    pub fn report(&self) -> Option<&PatchReport> {
        match self {
            PatchOutcome::Skipped(_) => None,
            PatchOutcome::Unchanged { report, .. } | PatchOutcome::Patched { report, .. } => {
                Some(report)
            }
        }
    }

    /// New document text, when it differs from the input.
    pub fn patched_text(&self) -> Option<&str> {
        match self {
            PatchOutcome::Patched { text, .. } => Some(text.as_str()),
            _ => None,
        }
    }
}

/// One timing block as seen by [`Patcher::inspect`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockInfo {
    pub name: String,
    pub offset: usize,
    pub scope: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub panel: Option<String>,
    /// Action of the matching rule, for in-scope blocks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<&'static str>,
}

/// Read-only view of a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Inspection {
    pub decision: GateDecision,
    pub blocks: Vec<BlockInfo>,
    pub templates: BTreeMap<String, String>,
    pub unterminated: usize,
}

fn template_names(templates: &Templates) -> BTreeMap<String, String> {
    templates
        .iter()
        .map(|(slot, template)| (slot.to_string(), template.name.clone()))
        .collect()
}

/// Patches documents for one resolved device.
#[derive(Debug)]
pub struct Patcher<'a> {
    profile: &'a DeviceProfile,
    identity: &'a DeviceIdentity,
    identity_property: String,
    policy: ScopePolicy,
}

impl<'a> Patcher<'a> {
    /// Prepares a patcher for `identity`, validating its profile.
    pub fn new(
        registry: &'a ProfileRegistry,
        identity: &'a DeviceIdentity,
        identity_property: impl Into<String>,
    ) -> Result<Self> {
        let profile = registry
            .get(&identity.profile)
            .ok_or_else(|| Error::UnknownDevice(identity.model.clone()))?;
        profile.validate()?;
        Ok(Self {
            profile,
            identity,
            identity_property: identity_property.into(),
            policy: registry.scope_policy(profile),
        })
    }

    pub fn profile(&self) -> &DeviceProfile {
        self.profile
    }

    fn gate(&self) -> DeviceGate<'_> {
        DeviceGate::new(self.identity, self.profile, &self.identity_property)
    }

    /// Runs the whole pipeline over one document.
    pub fn patch_document(&self, text: &str) -> PatchOutcome {
        let decision = self.gate().check(text);
        if !decision.is_eligible() {
            debug!("Skipping document: {:?}", decision);
            return PatchOutcome::Skipped(decision);
        }

        let tree = DocumentTree::parse(text);
        let templates = capture(text, &tree, &self.policy, self.profile);
        let output = Transformer::new(self.profile, &self.policy, &templates).run(text, &tree);
        let mut patched = output.edits.apply(text);

        let mut overrides = 0;
        for rule in &self.profile.overrides {
            let count = rewrite_all_occurrences(&mut patched, &rule.property, rule.value);
            if count > 0 {
                info!("Forced {} = {:#x} on {} lines", rule.property, rule.value, count);
            }
            overrides += count;
        }

        let report = PatchReport {
            templates: template_names(&templates),
            actions: output.records,
            overrides,
            unterminated: output.unterminated,
        };

        if patched == text {
            PatchOutcome::Unchanged { decision, report }
        } else {
            PatchOutcome::Patched {
                decision,
                report,
                text: patched,
            }
        }
    }

    /// Lists timing blocks with their scope and the templates that would be
    /// captured, without changing anything.
    pub fn inspect(&self, text: &str) -> Inspection {
        let tree = DocumentTree::parse(text);
        let mut found = Vec::new();
        let mut unterminated = 0;

        for search in blocks(text, &self.profile.node_prefix) {
            let block = match search {
                BlockSearch::Found(block) => block,
                BlockSearch::Unterminated { .. } => {
                    unterminated += 1;
                    continue;
                }
            };
            let scope = tree.resolve_scope(block.start, &self.policy);
            let action = scope
                .is_in_scope()
                .then(|| self.profile.rule_for(&block.name))
                .flatten()
                .map(|rule| rule.action.kind());
            let panel = match &scope {
                Scope::Panel { panel, .. } => Some(panel.clone()),
                _ => None,
            };
            found.push(BlockInfo {
                name: block.name,
                offset: block.start,
                scope: scope.label(),
                panel,
                action,
            });
        }

        Inspection {
            decision: self.gate().check(text),
            blocks: found,
            templates: template_names(&capture(text, &tree, &self.policy, self.profile)),
            unterminated,
        }
    }
}
