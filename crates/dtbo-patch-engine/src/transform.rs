//! Rule-driven rewriting of timing blocks.
//!
//! One forward pass over the document: text outside matched blocks is left
//! alone, and each in-scope block gets the action of the first matching rule
//! in the active profile. Results are recorded as span edits and materialised
//! afterwards.

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::edit::EditList;
use crate::profile::{
    Action, CloneSource, CloneSpec, DeviceProfile, FieldValue, Placement, SeriesSpec,
};
use crate::property::{get_raw, rewrite_whole_line, set_numeric, set_raw};
use crate::scaling::{scale, FpsGuard, TimingScalars};
use crate::template::Templates;
use crate::tree::{blocks, line_indent, token_end, Block, BlockSearch, DocumentTree, ScopePolicy};
use crate::{Error, Result};

/// What happened to one block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionRecord {
    /// Node name of the original block.
    pub node: String,
    pub action: &'static str,
    /// Names of blocks emitted in its place or after it.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub generated: Vec<String>,
    /// Set when the action could not be completed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

impl ActionRecord {
    fn new(block: &Block, action: &'static str) -> Self {
        Self {
            node: block.name.clone(),
            action,
            generated: Vec::new(),
            failure: None,
        }
    }

    fn failed(mut self, reason: impl ToString) -> Self {
        self.failure = Some(reason.to_string());
        self
    }
}

/// Outcome of one dispatcher pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransformOutput {
    pub edits: EditList,
    pub records: Vec<ActionRecord>,
    /// Blocks whose terminator could not be found.
    pub unterminated: usize,
}

/// Index counter scoped to one panel node.
#[derive(Debug, Clone, Copy, Default)]
struct Renumberer {
    anchor: Option<usize>,
    next: u64,
}

impl Renumberer {
    /// Resets the counter when the block belongs to a different panel node.
    fn observe(&mut self, anchor: usize) {
        if self.anchor != Some(anchor) {
            self.anchor = Some(anchor);
            self.next = 0;
        }
    }
}

/// Inputs shared by single clones and series.
struct Recipe<'r> {
    source: &'r CloneSource,
    name_format: &'r str,
    carry: &'r [String],
    fps_guard: Option<&'r FpsGuard>,
    scale: bool,
}

impl<'r> From<&'r CloneSpec> for Recipe<'r> {
    fn from(spec: &'r CloneSpec) -> Self {
        Self {
            source: &spec.source,
            name_format: &spec.name_format,
            carry: &spec.carry,
            fps_guard: spec.fps_guard.as_ref(),
            scale: spec.scale,
        }
    }
}

impl<'r> From<&'r SeriesSpec> for Recipe<'r> {
    fn from(spec: &'r SeriesSpec) -> Self {
        Self {
            source: &spec.source,
            name_format: &spec.name_format,
            carry: &spec.carry,
            fps_guard: spec.fps_guard.as_ref(),
            scale: true,
        }
    }
}

/// Replaces the indentation prefix `from` with `to` on every line after the
/// first.
pub fn reindent(text: &str, from: &str, to: &str) -> String {
    if from == to {
        return text.to_string();
    }
    let mut lines = text.split('\n');
    let mut out = lines.next().unwrap_or_default().to_string();
    for line in lines {
        out.push('\n');
        match line.strip_prefix(from) {
            Some(rest) => {
                out.push_str(to);
                out.push_str(rest);
            }
            None => out.push_str(line),
        }
    }
    out
}

/// Replaces the leading node-name token of a block.
pub fn rename_block(text: &mut String, name: &str) {
    let end = token_end(text.as_bytes(), 0);
    text.replace_range(..end, name);
}

/// Dispatcher for one document and one profile.
#[derive(Debug)]
pub struct Transformer<'a> {
    profile: &'a DeviceProfile,
    policy: &'a ScopePolicy,
    templates: &'a Templates,
}

impl<'a> Transformer<'a> {
    pub fn new(profile: &'a DeviceProfile, policy: &'a ScopePolicy, templates: &'a Templates) -> Self {
        Self {
            profile,
            policy,
            templates,
        }
    }

    /// Runs the pass over `text`.
    pub fn run(&self, text: &str, tree: &DocumentTree) -> TransformOutput {
        let mut out = TransformOutput::default();
        let mut counter = Renumberer::default();

        for search in blocks(text, &self.profile.node_prefix) {
            let block = match search {
                BlockSearch::Found(block) => block,
                BlockSearch::Unterminated { at } => {
                    warn!("Unterminated timing block at offset {}, skipping", at);
                    out.unterminated += 1;
                    continue;
                }
            };
            let Some(anchor) = tree.resolve_scope(block.start, self.policy).anchor() else {
                continue;
            };
            counter.observe(anchor);

            let Some(rule) = self.profile.rule_for(&block.name) else {
                continue;
            };
            let record = self.dispatch(text, &block, &rule.action, &mut counter, &mut out.edits);
            if let Some(record) = record {
                out.records.push(record);
            }
        }

        out
    }

    fn dispatch(
        &self,
        text: &str,
        block: &Block,
        action: &Action,
        counter: &mut Renumberer,
        edits: &mut EditList,
    ) -> Option<ActionRecord> {
        let original = block.text(text);
        let indent = line_indent(text, block.start);

        match action {
            Action::Passthrough => None,
            Action::Drop => {
                info!("Dropping {}", block.name);
                edits.delete(drop_span(text, block));
                Some(ActionRecord::new(block, action.kind()))
            }
            Action::RewriteField {
                property,
                value,
                whole_line,
            } => {
                let record = ActionRecord::new(block, action.kind());
                let Some(value) = self.field_value(value) else {
                    debug!("No template value for {} in {}", property, block.name);
                    return Some(record.failed("template not captured"));
                };
                let mut rewritten = original.to_string();
                let done = if *whole_line {
                    rewrite_whole_line(&mut rewritten, property, value)
                } else {
                    set_numeric(&mut rewritten, property, value)
                };
                if !done {
                    debug!("{} has no {}, leaving unchanged", block.name, property);
                    return Some(record.failed(format!("{property} not found")));
                }
                info!("Set {} = {:#x} in {}", property, value, block.name);
                edits.replace(block.span(), rewritten);
                Some(record)
            }
            Action::Clone(spec) => {
                let mut record = ActionRecord::new(block, action.kind());
                let clone = match self.synthesize(&Recipe::from(spec), original, indent, spec.fps, spec.index) {
                    Ok(clone) => clone,
                    Err(e) => {
                        warn!("Cannot clone {} at {} fps: {}", block.name, spec.fps, e);
                        return Some(record.failed(e));
                    }
                };
                record.generated.push(target_name(spec.name_format.as_str(), spec.fps));
                info!("Generated {} from {}", record.generated[0], block.name);
                match spec.placement {
                    Placement::Replace => edits.replace(block.span(), clone),
                    Placement::After => edits.insert(block.end, format!("\n\n{indent}{clone}")),
                }
                Some(record)
            }
            Action::Series(spec) => {
                let mut record = ActionRecord::new(block, action.kind());
                let recipe = Recipe::from(spec);
                let mut appended = String::new();
                for target in &spec.targets {
                    match self.synthesize(&recipe, original, indent, target.fps, Some(target.index)) {
                        Ok(clone) => {
                            appended.push_str("\n\n");
                            appended.push_str(indent);
                            appended.push_str(&clone);
                            record.generated.push(target_name(&spec.name_format, target.fps));
                        }
                        Err(e) => {
                            warn!("Cannot clone {} at {} fps: {}", block.name, target.fps, e);
                            return Some(record.failed(e));
                        }
                    }
                }
                info!("Generated {} nodes after {}", record.generated.len(), block.name);
                edits.insert(block.end, appended);
                Some(record)
            }
            Action::Renumber { property } => {
                let property = property.as_deref().unwrap_or(&self.profile.properties.index);
                let record = ActionRecord::new(block, action.kind());
                let mut rewritten = original.to_string();
                if !set_numeric(&mut rewritten, property, counter.next) {
                    warn!(
                        "Cannot renumber {}: no {} property, index stays at {}",
                        block.name, property, counter.next
                    );
                    return Some(record.failed(format!("{property} not found")));
                }
                debug!("Renumbered {} to {}", block.name, counter.next);
                counter.next += 1;
                if rewritten != original {
                    edits.replace(block.span(), rewritten);
                }
                Some(record)
            }
        }
    }

    fn field_value(&self, value: &FieldValue) -> Option<u64> {
        match value {
            FieldValue::Literal(v) => Some(*v),
            FieldValue::TemplateClock(slot) => self.templates.get(slot)?.scalars.clock,
            FieldValue::TemplateFramerate(slot) => self.templates.get(slot)?.scalars.framerate,
            FieldValue::TemplateTransferTime(slot) => {
                self.templates.get(slot)?.scalars.transfer_time
            }
        }
    }

    /// Builds one clone: rename, carry raw values from the original, rescale
    /// unless the recipe keeps the source timings, force the frame rate, set
    /// the index, re-indent.
    fn synthesize(
        &self,
        recipe: &Recipe<'_>,
        original: &str,
        original_indent: &str,
        fps: u64,
        index: Option<u64>,
    ) -> Result<String> {
        let props = &self.profile.properties;
        let (base_text, base_indent, scalars) = match recipe.source {
            CloneSource::Template(slot) => {
                let template = self
                    .templates
                    .get(slot)
                    .ok_or_else(|| Error::MissingTemplate(slot.clone()))?;
                (template.text.as_str(), template.indent.as_str(), template.scalars)
            }
            CloneSource::Original => (original, original_indent, TimingScalars::read(original, props)),
        };

        let scaled = if recipe.scale {
            Some(scale(&scalars, recipe.fps_guard, fps)?)
        } else {
            None
        };
        let mut clone = base_text.to_string();
        rename_block(&mut clone, &target_name(recipe.name_format, fps));

        for name in recipe.carry {
            match get_raw(original, name) {
                Some(raw) => {
                    set_raw(&mut clone, name, raw);
                }
                None => debug!("Nothing to carry for {}", name),
            }
        }

        if let Some(scaled) = scaled {
            set_numeric(&mut clone, &props.clock, scaled.clock);
            if let Some(transfer_time) = scaled.transfer_time {
                set_numeric(&mut clone, &props.transfer_time, transfer_time);
            }
        }
        set_numeric(&mut clone, &props.framerate, fps);
        if let Some(index) = index {
            set_numeric(&mut clone, &props.index, index);
        }

        Ok(reindent(&clone, base_indent, original_indent))
    }
}

fn target_name(format: &str, fps: u64) -> String {
    format.replace("{fps}", &fps.to_string())
}

/// Returns true if `prefix` holds nothing but whitespace and node labels
/// (`name:`).
fn only_labels(prefix: &str) -> bool {
    prefix.split_whitespace().all(|token| {
        token.strip_suffix(':').is_some_and(|label| {
            !label.is_empty() && label.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
        })
    })
}

/// Span removed by a drop: whole lines, labels included, when the block
/// starts its line.
fn drop_span(text: &str, block: &Block) -> std::ops::Range<usize> {
    let line_start = text[..block.start].rfind('\n').map_or(0, |nl| nl + 1);
    if !only_labels(&text[line_start..block.start]) {
        return block.span();
    }
    let rest = &text[block.end..];
    let trailing = if rest.starts_with("\r\n") {
        2
    } else if rest.starts_with('\n') {
        1
    } else {
        0
    };
    line_start..block.end + trailing
}
