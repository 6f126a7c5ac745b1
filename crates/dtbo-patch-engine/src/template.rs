//! Reference block capture.
//!
//! Before anything is rewritten, every in-scope timing block is offered to the
//! profile's template slots. Captured templates own their text, so edits made
//! to the document afterwards never reach them.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{debug, info};

use crate::profile::{DeviceProfile, SlotSelection};
use crate::scaling::TimingScalars;
use crate::tree::{blocks, line_indent, Block, BlockSearch, DocumentTree, ScopePolicy};

/// A captured reference block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Template {
    /// Node name of the captured block.
    pub name: String,
    /// Full block text, from the name through `};`.
    pub text: String,
    /// Indentation of the line the block started on.
    pub indent: String,
    /// Offset of the block in the source document.
    pub offset: usize,
    pub scalars: TimingScalars,
}

impl Template {
    fn capture(text: &str, block: &Block, profile: &DeviceProfile) -> Self {
        let body = block.text(text);
        Self {
            name: block.name.clone(),
            text: body.to_string(),
            indent: line_indent(text, block.start).to_string(),
            offset: block.start,
            scalars: TimingScalars::read(body, &profile.properties),
        }
    }

    fn framerate(&self) -> u64 {
        self.scalars.framerate.unwrap_or(0)
    }
}

/// Picks the candidate with the highest frame rate.
///
/// Candidates without a positive frame rate never win; ties keep the earlier
/// candidate.
pub fn select_best<I>(candidates: I) -> Option<Template>
where
    I: IntoIterator<Item = Template>,
{
    candidates.into_iter().fold(None, |best, candidate| {
        let floor = best.as_ref().map_or(0, Template::framerate);
        if candidate.framerate() > floor {
            Some(candidate)
        } else {
            best
        }
    })
}

/// Templates captured from one document, keyed by slot name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Templates {
    slots: BTreeMap<String, Template>,
}

impl Templates {
    /// Template in a slot, if captured.
    pub fn get(&self, slot: &str) -> Option<&Template> {
        self.slots.get(slot)
    }

    /// Captured slots in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Template)> {
        self.slots.iter().map(|(slot, template)| (slot.as_str(), template))
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Scans `text` once and fills the profile's template slots.
pub fn capture(
    text: &str,
    tree: &DocumentTree,
    policy: &ScopePolicy,
    profile: &DeviceProfile,
) -> Templates {
    let mut candidates: BTreeMap<&str, Vec<Template>> = BTreeMap::new();

    for search in blocks(text, &profile.node_prefix) {
        let BlockSearch::Found(block) = search else {
            continue;
        };
        if !tree.resolve_scope(block.start, policy).is_in_scope() {
            continue;
        }
        let unit = profile.unit(&block.name);
        for slot in &profile.templates {
            if !slot.patterns.iter().any(|p| p.matches(unit)) {
                continue;
            }
            let entry = candidates.entry(slot.name.as_str()).or_default();
            if slot.selection == SlotSelection::First && !entry.is_empty() {
                continue;
            }
            debug!("Template candidate for {}: {}", slot.name, block.name);
            entry.push(Template::capture(text, &block, profile));
        }
    }

    let mut slots = BTreeMap::new();
    for slot in &profile.templates {
        let Some(found) = candidates.remove(slot.name.as_str()) else {
            continue;
        };
        let chosen = match slot.selection {
            SlotSelection::First => found.into_iter().next(),
            SlotSelection::HighestFramerate => select_best(found),
        };
        if let Some(template) = chosen {
            info!(
                "Captured {} template from {} (clock {:#x}, {} fps)",
                slot.name,
                template.name,
                template.scalars.clock.unwrap_or(0),
                template.framerate()
            );
            slots.insert(slot.name.clone(), template);
        }
    }

    Templates { slots }
}
