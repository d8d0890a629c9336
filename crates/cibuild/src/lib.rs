//! # cibuild
//!
//! Continuous-integration driver for Xcode workspaces and projects.
//!
//! ## Overview
//!
//! A single `cibuild` invocation:
//!
//! 1. checks that the required tools are installed,
//! 2. runs the bootstrap script (`script/bootstrap` by default),
//! 3. finds the workspace or project to build,
//! 4. when `CODE_SIGNING_PASSWORD` is set, imports the signing certificates
//!    into a transient keychain,
//! 5. cleans and then tests every scheme, falling back to the iOS simulator
//!    SDK or to a plain build when tests cannot run,
//! 6. deletes the keychain again, on every exit path.
//!
//! ## Quick Start
//!
//! ```bash
//! # Build every shared scheme of the workspace in the current directory
//! cibuild
//!
//! # Build selected schemes with xcodebuild instead of xctool
//! cibuild --build-tool xcodebuild App AppTests
//!
//! # Preview the commands without running them
//! cibuild --dry-run --verbose
//! ```
//!
//! ## Exit Codes
//!
//! | Code | Meaning |
//! |------|---------|
//! | `0` | every scheme passed |
//! | `1` | a scheme failed, or a required tool/container/scheme is missing |
//! | other | exit code of a failed bootstrap or clean step |
//!
//! See [`config`] for the configuration file format.

use anyhow::{Context, Result};
use cibuild_sdk::builders::{
    XcodeBuilder, check_required_tools, find_build_container, run_bootstrap,
};
use cibuild_sdk::keychain::FetchedCertificate;
use cibuild_sdk::{
    BuildContainer, BuildTool, CiError, CommandRunner, DryRunRunner, RunReport, SchemeReport,
    SigningConfig, SigningKeychain, SystemRunner,
};
use clap::Parser;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing_subscriber::EnvFilter;

pub mod config;

use config::{ConfigResolver, RunConfig};

/// Continuous-integration build for Xcode workspaces and projects.
#[derive(Parser, Debug, Default)]
#[command(name = "cibuild", author, version, about = "Xcode continuous-integration driver", long_about = None)]
pub struct Cli {
    /// Schemes to build (defaults to SCHEMES, the config file, or every shared scheme)
    pub schemes: Vec<String>,

    /// Workspace to build; takes precedence over --project
    #[arg(long, env = "XCWORKSPACE")]
    pub workspace: Option<PathBuf>,

    /// Project to build when no workspace is present
    #[arg(long, env = "XCODEPROJ")]
    pub project: Option<PathBuf>,

    /// Script run before building (default: script/bootstrap if present)
    #[arg(long, env = "BOOTSTRAP")]
    pub bootstrap: Option<String>,

    /// Skip the bootstrap script
    #[arg(long)]
    pub no_bootstrap: bool,

    /// Build tool to drive: xctool or xcodebuild
    #[arg(long, env = "BUILD_TOOL")]
    pub build_tool: Option<String>,

    /// Whitespace-separated options passed to every build tool invocation
    #[arg(long, env = "XCTOOL_OPTIONS", allow_hyphen_values = true)]
    pub tool_options: Option<String>,

    /// Whitespace-separated executables that must be on PATH
    #[arg(long, env = "REQUIRED_TOOLS")]
    pub required_tools: Option<String>,

    /// Password of the signing certificate bundle; enables code signing
    #[arg(long, env = "CODE_SIGNING_PASSWORD", hide_env_values = true)]
    pub code_signing_password: Option<String>,

    /// Name of the transient signing keychain
    #[arg(long, env = "KEYCHAIN")]
    pub keychain: Option<String>,

    /// Password for the transient keychain (random by default)
    #[arg(long, env = "KEYCHAIN_PASSWORD", hide_env_values = true)]
    pub keychain_password: Option<String>,

    /// Signing certificate bundle (.p12)
    #[arg(long, env = "CERTIFICATE_PATH")]
    pub certificate: Option<PathBuf>,

    /// URL or path of Apple's WWDR intermediate certificate
    #[arg(long, env = "WWDR_CERTIFICATE")]
    pub wwdr_certificate: Option<String>,

    /// Path to cibuild.toml (searched upwards from the working directory by default)
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// Write a JSON run summary (and a Markdown twin) to this path
    #[arg(long)]
    pub summary_json: Option<PathBuf>,

    /// Log the commands that would run without executing them
    #[arg(long)]
    pub dry_run: bool,

    /// Enable debug logging
    #[arg(long, short = 'v')]
    pub verbose: bool,
}

/// Entry point used by the `cibuild` binary.
pub fn run() -> ExitCode {
    load_dotenv();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match execute(&cli) {
        Ok(report) if report.success() => ExitCode::SUCCESS,
        Ok(report) => {
            tracing::error!(failed = ?report.failed_schemes(), "build failed");
            ExitCode::from(1)
        }
        Err(err) => {
            tracing::error!("{err:#}");
            ExitCode::from(exit_code_for(&err))
        }
    }
}

fn execute(cli: &Cli) -> Result<RunReport> {
    let resolver = match &cli.config {
        Some(path) => ConfigResolver::from_file(path)?,
        None => ConfigResolver::new()?,
    };
    if let Some(path) = &resolver.config_path {
        tracing::debug!(path = %path.display(), "loaded config file");
    }

    let env_schemes = std::env::var("SCHEMES").ok();
    let config = RunConfig::resolve(cli, env_schemes.as_deref(), &resolver)?;

    if config.dry_run {
        run_pipeline(&DryRunRunner, &config)
    } else {
        run_pipeline(&SystemRunner, &config)
    }
}

/// Runs every step of a CI build in order.
///
/// Fatal errors return early; the signing keychain, if one was created, is
/// deleted on the way out either way.
pub fn run_pipeline<R: CommandRunner>(runner: &R, config: &RunConfig) -> Result<RunReport> {
    let started_at = now_rfc3339();

    check_required_tools(&config.required_tools)?;

    if let Some(script) = &config.bootstrap {
        run_bootstrap(runner, script)?;
    }

    let container = find_build_container(
        &config.working_dir,
        config.workspace.as_deref(),
        config.project.as_deref(),
    )?;
    tracing::info!(%container, tool = %config.build_tool, "using");

    // The fetched certificate must outlive the keychain setup.
    let mut wwdr_cert = None;
    let keychain = match &config.signing {
        Some(signing) => {
            let wwdr = wwdr_cert.insert(fetch_wwdr(signing, config.dry_run)?);
            Some(SigningKeychain::create(runner, signing, wwdr.path())?)
        }
        None => None,
    };

    let builder = XcodeBuilder::new(runner, config.build_tool, container)
        .options(config.tool_options.clone());

    let schemes = if config.schemes.is_empty() {
        builder.list_schemes()?
    } else {
        config.schemes.clone()
    };
    if schemes.is_empty() {
        return Err(CiError::NoSchemes.into());
    }

    println!("*** The following schemes will be built:");
    for scheme in &schemes {
        println!("    {scheme}");
    }
    println!();

    let mut report = RunReport::default();
    for scheme in &schemes {
        report.schemes.push(builder.build_scheme(scheme)?);
    }

    if let Some(keychain) = keychain
        && let Err(e) = keychain.close()
    {
        tracing::warn!(error = %e, "keychain cleanup failed");
    }

    print_summary(&report);

    if let Some(path) = &config.summary_json {
        let summary = RunSummary {
            started_at,
            finished_at: now_rfc3339(),
            success: report.success(),
            tool: config.build_tool,
            container: builder.container().path().display().to_string(),
            container_kind: match builder.container() {
                BuildContainer::Workspace(_) => "workspace",
                BuildContainer::Project(_) => "project",
            },
            schemes: report.schemes.clone(),
        };
        write_summary(&summary, path)?;
    }

    Ok(report)
}

/// Obtains the WWDR certificate. Dry runs never touch the network.
fn fetch_wwdr(signing: &SigningConfig, dry_run: bool) -> Result<WwdrCertificate> {
    if dry_run {
        tracing::info!(source = %signing.wwdr_certificate, "dry run: skipping certificate fetch");
        return Ok(WwdrCertificate::Placeholder(PathBuf::from(
            signing.wwdr_certificate.to_string(),
        )));
    }
    Ok(WwdrCertificate::Fetched(signing.wwdr_certificate.fetch()?))
}

enum WwdrCertificate {
    Fetched(FetchedCertificate),
    Placeholder(PathBuf),
}

impl WwdrCertificate {
    fn path(&self) -> &Path {
        match self {
            WwdrCertificate::Fetched(cert) => cert.path(),
            WwdrCertificate::Placeholder(path) => path,
        }
    }
}

/// Maps a failure to the process exit code.
pub fn exit_code_for(err: &anyhow::Error) -> u8 {
    err.downcast_ref::<CiError>()
        .map(CiError::exit_code)
        .and_then(|code| u8::try_from(code).ok())
        .filter(|code| *code != 0)
        .unwrap_or(1)
}

fn load_dotenv() {
    let _ = dotenvy::from_path(Path::new(".env.local"));
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

fn now_rfc3339() -> String {
    let now = OffsetDateTime::now_utc();
    now.format(&Rfc3339)
        .unwrap_or_else(|_| now.unix_timestamp().to_string())
}

/// Serialized form of a finished run.
#[derive(Debug, Serialize)]
struct RunSummary {
    started_at: String,
    finished_at: String,
    success: bool,
    tool: BuildTool,
    container: String,
    container_kind: &'static str,
    schemes: Vec<SchemeReport>,
}

fn print_summary(report: &RunReport) {
    println!();
    println!("*** Summary");
    for scheme in &report.schemes {
        let sdk = scheme
            .plan
            .sdk
            .map(|s| format!(" -sdk {s}"))
            .unwrap_or_default();
        println!(
            "    {:<6} {} ({}{}, {:.1}s)",
            if scheme.passed() { "PASS" } else { "FAIL" },
            scheme.scheme,
            scheme.plan.action,
            sdk,
            scheme.duration.as_secs_f64()
        );
    }
}

fn render_markdown_summary(summary: &RunSummary) -> String {
    let mut out = String::new();
    out.push_str("# cibuild summary\n\n");
    out.push_str(&format!(
        "- Result: {}\n- Container: {} `{}`\n- Tool: `{}`\n- Started: {}\n- Finished: {}\n\n",
        if summary.success { "passed" } else { "failed" },
        summary.container_kind,
        summary.container,
        summary.tool,
        summary.started_at,
        summary.finished_at,
    ));
    out.push_str("| Scheme | Action | SDK | Status | Exit code | Duration (s) |\n");
    out.push_str("|--------|--------|-----|--------|-----------|--------------|\n");
    for s in &summary.schemes {
        out.push_str(&format!(
            "| {} | {} | {} | {} | {} | {:.1} |\n",
            s.scheme,
            s.plan.action,
            s.plan.sdk.map(|sdk| sdk.as_str()).unwrap_or("-"),
            if s.passed() { "passed" } else { "failed" },
            s.exit_code
                .map(|c| c.to_string())
                .unwrap_or_else(|| "-".to_string()),
            s.duration.as_secs_f64(),
        ));
    }
    out
}

fn write_summary(summary: &RunSummary, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(summary)?;
    ensure_parent_dir(path)?;
    fs::write(path, json).with_context(|| format!("writing {:?}", path))?;
    println!("Wrote run summary to {:?}", path);

    let markdown_path = path.with_extension("md");
    fs::write(&markdown_path, render_markdown_summary(summary))
        .with_context(|| format!("writing {:?}", markdown_path))?;
    println!("Wrote markdown summary to {:?}", markdown_path);
    Ok(())
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).with_context(|| format!("creating directory {:?}", parent))?;
    }
    Ok(())
}
