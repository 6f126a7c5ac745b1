//! Device profiles and their transform rule tables.
//!
//! A profile names the panels it owns and, per timing node, the action the
//! dispatcher takes. Profiles are plain data: the built-in set lives here and
//! more can be deserialized from configuration.

use serde::{Deserialize, Serialize};

use crate::scaling::FpsGuard;
use crate::tree::ScopePolicy;
use crate::{Error, Result};

/// Prefix shared by every panel node name.
pub const PANEL_PREFIX: &str = "qcom,mdss_dsi_panel_";

/// Default prefix of timing node names.
pub const DEFAULT_NODE_PREFIX: &str = "timing@";

/// Markers identifying engineering and variant panels.
pub const ENGINEERING_MARKERS: &[&str] = &["_evt", "_eng"];

/// Property names of the timing scalars.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingProperties {
    #[serde(default = "default_clock")]
    pub clock: String,

    #[serde(default = "default_framerate")]
    pub framerate: String,

    #[serde(default = "default_transfer_time")]
    pub transfer_time: String,

    #[serde(default = "default_index")]
    pub index: String,
}

impl Default for TimingProperties {
    fn default() -> Self {
        Self {
            clock: default_clock(),
            framerate: default_framerate(),
            transfer_time: default_transfer_time(),
            index: default_index(),
        }
    }
}

fn default_clock() -> String {
    "qcom,mdss-dsi-panel-clockrate".to_string()
}

fn default_framerate() -> String {
    "qcom,mdss-dsi-panel-framerate".to_string()
}

fn default_transfer_time() -> String {
    "qcom,mdss-mdp-transfer-time-us".to_string()
}

fn default_index() -> String {
    "cell-index".to_string()
}

fn default_node_prefix() -> String {
    DEFAULT_NODE_PREFIX.to_string()
}

/// Matches the part of a node name after the node prefix.
///
/// A trailing `*` matches any suffix; otherwise the match is exact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NamePattern(pub String);

impl NamePattern {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self(pattern.into())
    }

    /// Returns true if `unit` matches.
    pub fn matches(&self, unit: &str) -> bool {
        match self.0.strip_suffix('*') {
            Some(prefix) => unit.starts_with(prefix),
            None => unit == self.0,
        }
    }
}

/// How a template slot chooses among qualifying blocks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SlotSelection {
    /// The first qualifying block wins.
    #[default]
    First,
    /// The block with the highest frame rate wins.
    HighestFramerate,
}

/// A named template slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateSlot {
    pub name: String,
    pub patterns: Vec<NamePattern>,
    #[serde(default)]
    pub selection: SlotSelection,
}

/// Where a clone starts from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CloneSource {
    /// A captured template slot.
    Template(String),
    /// The block being transformed.
    Original,
}

/// Where a single clone is emitted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Placement {
    /// After the original block, which is kept.
    #[default]
    After,
    /// In place of the original block.
    Replace,
}

/// Value written by a field rewrite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FieldValue {
    Literal(u64),
    TemplateClock(String),
    TemplateFramerate(String),
    TemplateTransferTime(String),
}

impl FieldValue {
    /// Template slot the value reads from.
    pub fn slot(&self) -> Option<&str> {
        match self {
            FieldValue::Literal(_) => None,
            FieldValue::TemplateClock(slot)
            | FieldValue::TemplateFramerate(slot)
            | FieldValue::TemplateTransferTime(slot) => Some(slot),
        }
    }
}

/// A single clone-and-scale target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloneSpec {
    pub source: CloneSource,
    /// New node name; `{fps}` is replaced by the target frame rate.
    pub name_format: String,
    pub fps: u64,
    #[serde(default)]
    pub index: Option<u64>,
    /// Properties copied verbatim from the original block.
    #[serde(default)]
    pub carry: Vec<String>,
    #[serde(default)]
    pub placement: Placement,
    #[serde(default)]
    pub fps_guard: Option<FpsGuard>,
    /// Rescale clock and transfer time to `fps`. When false the source's
    /// values are kept and only the frame rate is forced.
    #[serde(default = "default_scale")]
    pub scale: bool,
}

fn default_scale() -> bool {
    true
}

/// One entry of a series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesTarget {
    pub fps: u64,
    pub index: u64,
}

/// An ordered list of clone-and-scale targets appended after the original.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesSpec {
    pub source: CloneSource,
    pub name_format: String,
    pub targets: Vec<SeriesTarget>,
    #[serde(default)]
    pub carry: Vec<String>,
    #[serde(default)]
    pub fps_guard: Option<FpsGuard>,
}

/// Action taken for a matched timing block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum Action {
    Passthrough,
    Drop,
    RewriteField {
        property: String,
        value: FieldValue,
        #[serde(default)]
        whole_line: bool,
    },
    Clone(CloneSpec),
    Series(SeriesSpec),
    Renumber {
        #[serde(default)]
        property: Option<String>,
    },
}

impl Action {
    /// Short name used in logs and reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Action::Passthrough => "passthrough",
            Action::Drop => "drop",
            Action::RewriteField { .. } => "rewrite-field",
            Action::Clone(_) => "clone",
            Action::Series(_) => "series",
            Action::Renumber { .. } => "renumber",
        }
    }

    fn slots(&self) -> Vec<&str> {
        fn source(source: &CloneSource) -> Option<&str> {
            match source {
                CloneSource::Template(slot) => Some(slot.as_str()),
                CloneSource::Original => None,
            }
        }
        match self {
            Action::RewriteField { value, .. } => value.slot().into_iter().collect(),
            Action::Clone(spec) => source(&spec.source).into_iter().collect(),
            Action::Series(spec) => source(&spec.source).into_iter().collect(),
            _ => Vec::new(),
        }
    }
}

/// A row of the rule table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub pattern: NamePattern,
    #[serde(flatten)]
    pub action: Action,
}

/// A property forced to one value everywhere in an eligible document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyOverride {
    pub property: String,
    pub value: u64,
}

/// Everything the engine knows about one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceProfile {
    pub id: String,

    /// Device model strings resolving to this profile.
    pub models: Vec<String>,

    /// Panel node names owned by this profile.
    pub panels: Vec<String>,

    /// File identifiers accepted in place of the target identifier.
    #[serde(default)]
    pub compatible_ids: Vec<u64>,

    #[serde(default = "default_node_prefix")]
    pub node_prefix: String,

    #[serde(default)]
    pub properties: TimingProperties,

    #[serde(default)]
    pub templates: Vec<TemplateSlot>,

    #[serde(default)]
    pub rules: Vec<Rule>,

    #[serde(default)]
    pub overrides: Vec<PropertyOverride>,
}

impl DeviceProfile {
    /// Strips the node prefix from a node name.
    pub fn unit<'a>(&self, node_name: &'a str) -> &'a str {
        node_name
            .strip_prefix(self.node_prefix.as_str())
            .unwrap_or(node_name)
    }

    /// First rule matching a node name.
    pub fn rule_for(&self, node_name: &str) -> Option<&Rule> {
        let unit = self.unit(node_name);
        self.rules.iter().find(|rule| rule.pattern.matches(unit))
    }

    /// Template slot by name.
    pub fn slot(&self, name: &str) -> Option<&TemplateSlot> {
        self.templates.iter().find(|slot| slot.name == name)
    }

    /// Checks that every rule refers to a defined slot.
    pub fn validate(&self) -> Result<()> {
        for rule in &self.rules {
            for slot in rule.action.slots() {
                if self.slot(slot).is_none() {
                    return Err(Error::UnknownSlot {
                        profile: self.id.clone(),
                        slot: slot.to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}

/// The set of known profiles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileRegistry {
    profiles: Vec<DeviceProfile>,
    engineering_markers: Vec<String>,
    panel_prefix: String,
}

impl Default for ProfileRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ProfileRegistry {
    /// Registry holding the given profiles.
    pub fn new(profiles: Vec<DeviceProfile>) -> Self {
        Self {
            profiles,
            engineering_markers: ENGINEERING_MARKERS.iter().map(|m| m.to_string()).collect(),
            panel_prefix: PANEL_PREFIX.to_string(),
        }
    }

    /// Registry holding the built-in profiles.
    pub fn builtin() -> Self {
        Self::new(vec![ae084_wqhd(), aa545_fhd()])
    }

    /// Adds profiles, replacing built-ins with the same id.
    pub fn merge(&mut self, profiles: impl IntoIterator<Item = DeviceProfile>) {
        for profile in profiles {
            match self.profiles.iter_mut().find(|p| p.id == profile.id) {
                Some(existing) => *existing = profile,
                None => self.profiles.push(profile),
            }
        }
    }

    /// Replaces the engineering markers.
    pub fn set_engineering_markers(&mut self, markers: Vec<String>) {
        self.engineering_markers = markers;
    }

    /// Validates every profile.
    pub fn validate(&self) -> Result<()> {
        self.profiles.iter().try_for_each(DeviceProfile::validate)
    }

    pub fn profiles(&self) -> &[DeviceProfile] {
        &self.profiles
    }

    /// Profile by id.
    pub fn get(&self, id: &str) -> Option<&DeviceProfile> {
        self.profiles.iter().find(|p| p.id == id)
    }

    /// Profile owning a device model string.
    pub fn for_model(&self, model: &str) -> Option<&DeviceProfile> {
        let model = model.trim();
        self.profiles
            .iter()
            .find(|p| p.models.iter().any(|m| m == model))
    }

    /// Scope classification for a run on `active`.
    pub fn scope_policy(&self, active: &DeviceProfile) -> ScopePolicy {
        ScopePolicy {
            active_panels: active.panels.clone(),
            foreign_panels: self
                .profiles
                .iter()
                .filter(|p| p.id != active.id)
                .flat_map(|p| p.panels.iter().cloned())
                .collect(),
            engineering_markers: self.engineering_markers.clone(),
            panel_prefix: self.panel_prefix.clone(),
        }
    }
}

fn rule(pattern: &str, action: Action) -> Rule {
    Rule {
        pattern: NamePattern::new(pattern),
        action,
    }
}

/// WQHD LTPO panel: runs 60 Hz on the 144 Hz link timings, adds 123 Hz and
/// 150-180 Hz. The `fhd` slot is captured for inspection only.
fn ae084_wqhd() -> DeviceProfile {
    let wqhd = || CloneSource::Template("wqhd".to_string());
    DeviceProfile {
        id: "ae084-wqhd".to_string(),
        models: vec!["PJD110".to_string(), "CPH2573".to_string(), "CPH2581".to_string()],
        panels: vec!["qcom,mdss_dsi_panel_AE084_P_3_A0033_dsc_cmd_dvt02".to_string()],
        compatible_ids: vec![22861, 22863],
        node_prefix: default_node_prefix(),
        properties: TimingProperties::default(),
        templates: vec![
            TemplateSlot {
                name: "wqhd".to_string(),
                patterns: vec![NamePattern::new("wqhd_sdc_144")],
                selection: SlotSelection::First,
            },
            TemplateSlot {
                name: "fhd".to_string(),
                patterns: vec![NamePattern::new("fhd_sdc_144"), NamePattern::new("fhd_sdc_120")],
                selection: SlotSelection::HighestFramerate,
            },
        ],
        rules: vec![
            rule(
                "wqhd_sdc_60",
                Action::Clone(CloneSpec {
                    source: wqhd(),
                    name_format: "timing@wqhd_sdc_{fps}".to_string(),
                    fps: 60,
                    index: None,
                    carry: vec![default_index()],
                    placement: Placement::Replace,
                    fps_guard: None,
                    scale: false,
                }),
            ),
            rule(
                "wqhd_sdc_120",
                Action::Clone(CloneSpec {
                    source: CloneSource::Original,
                    name_format: "timing@wqhd_sdc_{fps}".to_string(),
                    fps: 123,
                    index: Some(0x8),
                    carry: Vec::new(),
                    placement: Placement::After,
                    fps_guard: Some(FpsGuard {
                        min: 110,
                        max: 130,
                        fallback: 120,
                    }),
                    scale: true,
                }),
            ),
            rule(
                "wqhd_sdc_144",
                Action::Series(SeriesSpec {
                    source: wqhd(),
                    name_format: "timing@wqhd_sdc_{fps}".to_string(),
                    targets: [
                        (150, 0x9),
                        (155, 0x10),
                        (160, 0x11),
                        (165, 0x12),
                        (170, 0x13),
                        (175, 0x14),
                        (180, 0x15),
                    ]
                    .into_iter()
                    .map(|(fps, index)| SeriesTarget { fps, index })
                    .collect(),
                    carry: Vec::new(),
                    fps_guard: None,
                }),
            ),
            rule(
                "wqhd_sdc_90",
                Action::RewriteField {
                    property: default_clock(),
                    value: FieldValue::TemplateClock("wqhd".to_string()),
                    whole_line: true,
                },
            ),
        ],
        overrides: Vec::new(),
    }
}

/// FHD-only panel: drops the 90 Hz modes and renumbers what remains.
fn aa545_fhd() -> DeviceProfile {
    DeviceProfile {
        id: "aa545-fhd".to_string(),
        models: vec!["PJE110".to_string(), "CPH2585".to_string()],
        panels: vec![
            "qcom,mdss_dsi_panel_AA545_P_3_A0004_dsc_cmd".to_string(),
            "qcom,mdss_dsi_panel_AA545_P_3_A0004_dsc_cmd_2nd".to_string(),
        ],
        compatible_ids: Vec::new(),
        node_prefix: default_node_prefix(),
        properties: TimingProperties::default(),
        templates: Vec::new(),
        rules: vec![
            rule("fhd_sdc_90", Action::Drop),
            rule("wqhd_sdc_90", Action::Drop),
            rule("*", Action::Renumber { property: None }),
        ],
        overrides: Vec::new(),
    }
}
