//! Device facts: model string and target identifier.

use std::process::Command;

use tracing::{debug, warn};

use crate::config::FactsConfig;

/// Something that can look up a named system property.
pub trait FactSource {
    fn read(&self, key: &str) -> Option<String>;
}

/// Reads properties through an external `getprop`-style command.
#[derive(Debug, Clone)]
pub struct GetProp {
    program: String,
}

impl GetProp {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl FactSource for GetProp {
    fn read(&self, key: &str) -> Option<String> {
        let output = match Command::new(&self.program).arg(key).output() {
            Ok(output) => output,
            Err(e) => {
                warn!("Failed to run {} {}: {}", self.program, key, e);
                return None;
            }
        };
        if !output.status.success() {
            debug!("{} {} exited with {}", self.program, key, output.status);
            return None;
        }
        let value = String::from_utf8_lossy(&output.stdout).trim().to_string();
        (!value.is_empty()).then_some(value)
    }
}

/// The two facts a run needs, as raw strings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Facts {
    pub model: Option<String>,
    pub target_id: Option<String>,
}

impl Facts {
    /// Resolves each fact from the first of: command line, configuration,
    /// property lookup.
    pub fn gather(
        model: Option<String>,
        target_id: Option<String>,
        config: &FactsConfig,
        source: &dyn FactSource,
    ) -> Self {
        let model = model
            .or_else(|| config.model.clone())
            .or_else(|| source.read(&config.model_prop));
        let target_id = target_id
            .or_else(|| config.target_id.clone())
            .or_else(|| source.read(&config.target_prop));
        debug!("Facts: model={:?} target={:?}", model, target_id);
        Self { model, target_id }
    }
}
