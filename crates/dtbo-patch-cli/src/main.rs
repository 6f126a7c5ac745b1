//! DTBO Timing Patch Tool
//!
//! Patches the display timing nodes of decompiled DTBO sources in place.

mod config;
mod facts;
mod files;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dtbo_patch_engine::{
    DeviceIdentity, GateDecision, PatchOutcome, PatchReport, Patcher, ProfileRegistry,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use config::Config;
use facts::{Facts, GetProp};

#[derive(Parser)]
#[command(name = "dtbopatch")]
#[command(about = "Display timing patcher for DTBO device tree sources")]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Device model, instead of reading the system property
    #[arg(long, global = true)]
    model: Option<String>,

    /// Target identifier (decimal or 0x hex), instead of reading the system property
    #[arg(long, global = true)]
    target_id: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Patch every source file in a directory
    Patch {
        /// Directory of sources (default: dts_dir from the configuration)
        dir: Option<PathBuf>,

        /// Compute and report without writing anything
        #[arg(long)]
        dry_run: bool,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show timing blocks, their scope and captured templates
    Inspect {
        /// Source file to inspect
        file: PathBuf,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },
    /// List known device profiles
    Profiles {
        /// Print the full profiles as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Result for one source file.
#[derive(Debug, Serialize)]
struct FileReport {
    file: String,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    decision: Option<GateDecision>,
    #[serde(skip_serializing_if = "Option::is_none")]
    report: Option<PatchReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Result for a whole run.
#[derive(Debug, Serialize)]
struct RunReport<'a> {
    device: &'a DeviceIdentity,
    dry_run: bool,
    patched: usize,
    unchanged: usize,
    skipped: usize,
    failed: usize,
    files: Vec<FileReport>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = match &cli.config {
        Some(path) => {
            let config = Config::load(path).context("Failed to load configuration")?;
            info!("Loaded configuration from: {}", path.display());
            config
        }
        None => Config::default(),
    };
    let registry = config.registry()?;

    match cli.command {
        Commands::Profiles { json } => handle_profiles(&registry, json),
        Commands::Patch { dir, dry_run, json } => {
            let identity = resolve_identity(cli.model, cli.target_id, &config, &registry)?;
            let dir = dir.unwrap_or_else(|| PathBuf::from(&config.dts_dir));
            handle_patch(&dir, dry_run, json, &config, &registry, &identity)
        }
        Commands::Inspect { file, json } => {
            let identity = resolve_identity(cli.model, cli.target_id, &config, &registry)?;
            handle_inspect(&file, json, &config, &registry, &identity)
        }
    }
}

fn resolve_identity(
    model: Option<String>,
    target_id: Option<String>,
    config: &Config,
    registry: &ProfileRegistry,
) -> Result<DeviceIdentity> {
    let source = GetProp::new(&config.facts.getprop);
    let facts = Facts::gather(model, target_id, &config.facts, &source);
    DeviceIdentity::resolve(facts.model.as_deref(), facts.target_id.as_deref(), registry)
        .context("Cannot determine the device")
}

/// Reads a source as UTF-8 text.
fn read_source(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    String::from_utf8(bytes).map_err(|e| {
        anyhow::anyhow!(
            "{} is not UTF-8 text (invalid byte at offset {}), left untouched",
            path.display(),
            e.utf8_error().valid_up_to()
        )
    })
}

fn patch_file(path: &Path, patcher: &Patcher<'_>, dry_run: bool) -> Result<PatchOutcome> {
    let text = read_source(path)?;
    let outcome = patcher.patch_document(&text);
    if let Some(patched) = outcome.patched_text() {
        if dry_run {
            info!("Would patch {}", path.display());
        } else {
            files::write_atomic(path, patched)?;
            info!("Patched {}", path.display());
        }
    }
    Ok(outcome)
}

fn handle_patch(
    dir: &Path,
    dry_run: bool,
    json: bool,
    config: &Config,
    registry: &ProfileRegistry,
    identity: &DeviceIdentity,
) -> Result<()> {
    let run = run_patch(dir, dry_run, config, registry, identity)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&run)?);
    } else {
        print_run(&run);
    }

    if run.failed > 0 {
        anyhow::bail!("{} of {} files could not be processed", run.failed, run.files.len());
    }
    Ok(())
}

/// Patches every source in `dir`, continuing past per-file failures.
fn run_patch<'a>(
    dir: &Path,
    dry_run: bool,
    config: &Config,
    registry: &ProfileRegistry,
    identity: &'a DeviceIdentity,
) -> Result<RunReport<'a>> {
    let patcher = Patcher::new(registry, identity, config.identity_property.as_str())?;
    let sources = files::list_sources(dir, &config.extension)?;
    info!("Found {} source files in {}", sources.len(), dir.display());

    let mut run = RunReport {
        device: identity,
        dry_run,
        patched: 0,
        unchanged: 0,
        skipped: 0,
        failed: 0,
        files: Vec::with_capacity(sources.len()),
    };

    for path in &sources {
        let file = path.display().to_string();
        match patch_file(path, &patcher, dry_run) {
            Ok(outcome) => {
                match &outcome {
                    PatchOutcome::Skipped(_) => run.skipped += 1,
                    PatchOutcome::Unchanged { .. } => run.unchanged += 1,
                    PatchOutcome::Patched { .. } => run.patched += 1,
                }
                run.files.push(FileReport {
                    file,
                    status: outcome.status(),
                    decision: Some(outcome.decision()),
                    report: outcome.report().cloned(),
                    error: None,
                });
            }
            Err(e) => {
                warn!("{:#}", e);
                run.failed += 1;
                run.files.push(FileReport {
                    file,
                    status: "failed",
                    decision: None,
                    report: None,
                    error: Some(format!("{:#}", e)),
                });
            }
        }
    }

    Ok(run)
}

fn print_run(run: &RunReport<'_>) {
    println!(
        "Device: {} (profile {}, target {})",
        run.device.model, run.device.profile, run.device.target_id
    );
    for file in &run.files {
        println!("  {:<9} {}", file.status, file.file);
        if let Some(report) = &file.report {
            for action in &report.actions {
                match &action.failure {
                    Some(reason) => {
                        println!("      {} {}: failed ({})", action.action, action.node, reason)
                    }
                    None if action.generated.is_empty() => {
                        println!("      {} {}", action.action, action.node)
                    }
                    None => println!(
                        "      {} {} -> {}",
                        action.action,
                        action.node,
                        action.generated.join(", ")
                    ),
                }
            }
        }
        if let Some(error) = &file.error {
            println!("      {}", error);
        }
    }
    let verb = if run.dry_run { "would patch" } else { "patched" };
    println!(
        "Done: {} {}, {} unchanged, {} skipped, {} failed",
        run.patched, verb, run.unchanged, run.skipped, run.failed
    );
}

fn handle_inspect(
    file: &Path,
    json: bool,
    config: &Config,
    registry: &ProfileRegistry,
    identity: &DeviceIdentity,
) -> Result<()> {
    let patcher = Patcher::new(registry, identity, config.identity_property.as_str())?;
    let text = read_source(file)?;
    let inspection = patcher.inspect(&text);

    if json {
        println!("{}", serde_json::to_string_pretty(&inspection)?);
        return Ok(());
    }

    println!("File: {}", file.display());
    println!("Profile: {}", patcher.profile().id);
    println!("Gate: {:?}", inspection.decision);
    println!("Timing blocks:");
    for block in &inspection.blocks {
        let panel = block.panel.as_deref().unwrap_or("-");
        let action = block.action.unwrap_or("-");
        println!(
            "  {:<24} {:<12} {:<14} {}",
            block.name, block.scope, action, panel
        );
    }
    if inspection.unterminated > 0 {
        println!("Unterminated blocks: {}", inspection.unterminated);
    }
    println!("Templates:");
    if inspection.templates.is_empty() {
        println!("  (none captured)");
    }
    for (slot, node) in &inspection.templates {
        println!("  {}: {}", slot, node);
    }
    Ok(())
}

fn handle_profiles(registry: &ProfileRegistry, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(registry.profiles())?);
        return Ok(());
    }

    println!("Known profiles:");
    for profile in registry.profiles() {
        println!("  {}", profile.id);
        println!("      models: {}", profile.models.join(", "));
        for panel in &profile.panels {
            println!("      panel:  {}", panel);
        }
        if !profile.compatible_ids.is_empty() {
            let ids: Vec<String> = profile.compatible_ids.iter().map(u64::to_string).collect();
            println!("      alternate ids: {}", ids.join(", "));
        }
        println!("      rules: {}", profile.rules.len());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const PANEL: &str = "qcom,mdss_dsi_panel_AE084_P_3_A0033_dsc_cmd_dvt02";

    fn source(id: &str) -> String {
        format!(
            "/ {{\n\toplus,dtsi_no = <{id}>;\n\t{PANEL} {{\n\t\ttiming@wqhd_sdc_144 {{\n\t\t\tcell-index = <0x3>;\n\t\t\tqcom,mdss-dsi-panel-framerate = <0x90>;\n\t\t\tqcom,mdss-dsi-panel-clockrate = <0x568bc300>;\n\t\t}};\n\t}};\n}};\n"
        )
    }

    struct Fixture {
        dir: tempfile::TempDir,
        config: Config,
        registry: ProfileRegistry,
        identity: DeviceIdentity,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            std::fs::write(dir.path().join("0.dts"), source("22811")).unwrap();
            std::fs::write(dir.path().join("1.dts"), source("22812")).unwrap();
            std::fs::write(dir.path().join("2.dts"), "/ {\n\toplus,dtsi_no = <22811>;\n};\n").unwrap();
            let config = Config::default();
            let registry = config.registry().unwrap();
            let identity =
                DeviceIdentity::resolve(Some("CPH2581"), Some("22811"), &registry).unwrap();
            Self {
                dir,
                config,
                registry,
                identity,
            }
        }

        fn read(&self, name: &str) -> Vec<u8> {
            std::fs::read(self.dir.path().join(name)).unwrap()
        }

        fn run(&self, dry_run: bool) -> RunReport<'_> {
            run_patch(self.dir.path(), dry_run, &self.config, &self.registry, &self.identity).unwrap()
        }

        fn leftovers(&self) -> Vec<PathBuf> {
            std::fs::read_dir(self.dir.path())
                .unwrap()
                .map(|entry| entry.unwrap().path())
                .filter(|path| path.extension().is_some_and(|e| e == "tmp"))
                .collect()
        }
    }

    #[test]
    fn test_dry_run_writes_nothing() {
        let fixture = Fixture::new();
        let run = fixture.run(true);

        assert_eq!((run.patched, run.skipped, run.unchanged, run.failed), (1, 1, 1, 0));
        assert_eq!(fixture.read("0.dts"), source("22811").into_bytes());
        assert!(fixture.leftovers().is_empty());
    }

    #[test]
    fn test_patch_replaces_eligible_files_only() {
        let fixture = Fixture::new();
        let run = fixture.run(false);

        assert_eq!((run.patched, run.skipped, run.unchanged), (1, 1, 1));
        let patched = String::from_utf8(fixture.read("0.dts")).unwrap();
        assert!(patched.contains("timing@wqhd_sdc_180 {"));
        assert_eq!(fixture.read("1.dts"), source("22812").into_bytes());
        assert_eq!(
            fixture.read("2.dts"),
            b"/ {\n\toplus,dtsi_no = <22811>;\n};\n".to_vec()
        );
        assert!(fixture.leftovers().is_empty());
        assert_eq!(run.files[1].status, "skipped");
        assert_eq!(
            run.files[1].decision,
            Some(GateDecision::SkipMismatch { file_id: 22812 })
        );
    }

    #[test]
    fn test_non_utf8_source_fails_alone() {
        let fixture = Fixture::new();
        let mut bytes = source("22811").into_bytes();
        bytes.extend_from_slice(&[0xff, 0xfe, b'\n']);
        std::fs::write(fixture.dir.path().join("3.dts"), &bytes).unwrap();

        let run = fixture.run(false);

        assert_eq!((run.patched, run.failed), (1, 1));
        assert_eq!(run.files[3].status, "failed");
        assert!(run.files[3].error.as_deref().unwrap().contains("not UTF-8"));
        assert_eq!(fixture.read("3.dts"), bytes);
    }
}
