//! Configuration for cibuild.
//!
//! Settings come from four places, highest precedence first:
//!
//! 1. Command-line flags
//! 2. Environment variables (`XCWORKSPACE`, `XCODEPROJ`, `BOOTSTRAP`, ...)
//! 3. A `cibuild.toml` file
//! 4. Built-in defaults
//!
//! Flags and environment variables are merged by clap; this module layers the
//! file and the defaults underneath and produces an immutable [`RunConfig`].
//!
//! ## Configuration File Location
//!
//! `cibuild.toml` is searched for in the current working directory and then
//! in parent directories, stopping at the repository root. Relative paths in
//! the file are interpreted against the working directory, not the file.
//!
//! ## Example Configuration
//!
//! ```toml
//! workspace = "App.xcworkspace"
//! build_tool = "xcodebuild"
//! tool_options = ["RUN_CLANG_STATIC_ANALYZER=NO", "ONLY_ACTIVE_ARCH=YES"]
//! schemes = ["App", "AppKit Extension"]
//! required_tools = ["xcodebuild", "carthage"]
//!
//! [signing]
//! keychain = "ci.keychain"
//! certificate = "script/certificates/cibuild.p12"
//! ```

use anyhow::{Context, Result};
use cibuild_sdk::builders::{DEFAULT_BOOTSTRAP, split_list};
use cibuild_sdk::keychain::{
    DEFAULT_CERTIFICATE, DEFAULT_KEYCHAIN, DEFAULT_WWDR_CERTIFICATE, generate_keychain_password,
};
use cibuild_sdk::{BuildTool, CertificateSource, SigningConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::Cli;

/// The default configuration file name.
pub const CONFIG_FILE_NAME: &str = "cibuild.toml";

/// Options passed to the build tool when none are configured.
pub const DEFAULT_TOOL_OPTIONS: &str = "RUN_CLANG_STATIC_ANALYZER=NO";

/// Root structure of `cibuild.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CibuildConfig {
    /// Workspace to build. Takes precedence over `project`.
    pub workspace: Option<PathBuf>,

    /// Project to build when there is no workspace.
    pub project: Option<PathBuf>,

    /// Bootstrap script; an empty string disables bootstrapping.
    pub bootstrap: Option<String>,

    /// `xctool` or `xcodebuild`.
    pub build_tool: Option<String>,

    /// Extra options passed to every build tool invocation.
    pub tool_options: Option<Vec<String>>,

    /// Schemes to build, in order.
    pub schemes: Option<Vec<String>>,

    /// Executables that must be on `PATH` before anything runs.
    pub required_tools: Option<Vec<String>>,

    /// Code signing settings. Signing only happens when
    /// `CODE_SIGNING_PASSWORD` is set.
    pub signing: SigningFileConfig,
}

/// `[signing]` table of `cibuild.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SigningFileConfig {
    pub keychain: Option<String>,
    pub certificate: Option<PathBuf>,
    /// URL or local path of the WWDR intermediate certificate.
    pub wwdr_certificate: Option<String>,
}

impl CibuildConfig {
    /// Loads configuration from the specified file path.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config: CibuildConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        Ok(config)
    }

    /// Searches for `cibuild.toml` from the current directory upwards.
    pub fn discover() -> Result<Option<(Self, PathBuf)>> {
        let cwd = std::env::current_dir().context("Failed to get current directory")?;
        Self::discover_from(&cwd)
    }

    /// Searches for `cibuild.toml` starting at `start_dir`.
    ///
    /// # Returns
    ///
    /// * `Ok(Some((config, path)))` - Found and loaded configuration with its path
    /// * `Ok(None)` - No configuration file found
    /// * `Err` - If a config file was found but couldn't be parsed
    pub fn discover_from(start_dir: &Path) -> Result<Option<(Self, PathBuf)>> {
        let mut current = start_dir.to_path_buf();

        loop {
            let config_path = current.join(CONFIG_FILE_NAME);

            if config_path.is_file() {
                let config = Self::load_from_file(&config_path)?;
                return Ok(Some((config, config_path)));
            }

            // Stop at repository root or filesystem root
            if current.join(".git").exists() || !current.pop() {
                break;
            }
        }

        Ok(None)
    }
}

/// Merges the config file underneath CLI and environment values.
#[derive(Debug, Default)]
pub struct ConfigResolver {
    /// Loaded configuration, if any.
    pub config: Option<CibuildConfig>,

    /// Path to the loaded config file, if any.
    pub config_path: Option<PathBuf>,
}

impl ConfigResolver {
    /// Creates a resolver by discovering `cibuild.toml`.
    pub fn new() -> Result<Self> {
        Ok(match CibuildConfig::discover()? {
            Some((config, path)) => Self {
                config: Some(config),
                config_path: Some(path),
            },
            None => Self::default(),
        })
    }

    /// Creates a resolver from an explicitly named file, which must exist.
    pub fn from_file(path: &Path) -> Result<Self> {
        Ok(Self {
            config: Some(CibuildConfig::load_from_file(path)?),
            config_path: Some(path.to_path_buf()),
        })
    }

    /// Resolves a value, preferring the CLI/environment over config over default.
    pub fn resolve<T, F>(&self, cli_value: Option<T>, config_getter: F, default: T) -> T
    where
        F: FnOnce(&CibuildConfig) -> Option<T>,
    {
        self.resolve_opt(cli_value, config_getter).unwrap_or(default)
    }

    /// Like [`Self::resolve`] but without a default.
    pub fn resolve_opt<T, F>(&self, cli_value: Option<T>, config_getter: F) -> Option<T>
    where
        F: FnOnce(&CibuildConfig) -> Option<T>,
    {
        cli_value.or_else(|| self.config.as_ref().and_then(config_getter))
    }
}

/// Immutable settings for one CI run, handed to every step.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Directory searched for a workspace or project.
    pub working_dir: PathBuf,
    pub workspace: Option<PathBuf>,
    pub project: Option<PathBuf>,
    pub bootstrap: Option<PathBuf>,
    pub build_tool: BuildTool,
    pub tool_options: Vec<String>,
    /// Empty means "discover from the container".
    pub schemes: Vec<String>,
    pub required_tools: Vec<String>,
    /// Present exactly when a code signing password was supplied.
    pub signing: Option<SigningConfig>,
    pub dry_run: bool,
    pub summary_json: Option<PathBuf>,
}

impl RunConfig {
    /// Builds the run configuration from parsed CLI arguments (which already
    /// include environment fallbacks), the raw `SCHEMES` variable and the
    /// config file.
    pub fn resolve(
        cli: &Cli,
        env_schemes: Option<&str>,
        resolver: &ConfigResolver,
    ) -> Result<Self> {
        let working_dir = PathBuf::from(".");

        let build_tool = match resolver.resolve_opt(cli.build_tool.clone(), |c| c.build_tool.clone())
        {
            Some(name) => BuildTool::parse(&name)?,
            None => BuildTool::default(),
        };

        let tool_options = resolver.resolve(
            cli.tool_options.as_deref().map(split_list),
            |c| c.tool_options.clone(),
            split_list(DEFAULT_TOOL_OPTIONS),
        );

        let required_tools = resolver.resolve(
            cli.required_tools.as_deref().map(split_list),
            |c| c.required_tools.clone(),
            vec![build_tool.program().to_string()],
        );

        let schemes = if !cli.schemes.is_empty() {
            cli.schemes.clone()
        } else {
            resolver
                .resolve_opt(
                    env_schemes.map(split_list).filter(|s| !s.is_empty()),
                    |c| c.schemes.clone(),
                )
                .unwrap_or_default()
        };

        let bootstrap = if cli.no_bootstrap {
            None
        } else {
            match resolver.resolve_opt(cli.bootstrap.clone(), |c| c.bootstrap.clone()) {
                Some(script) if script.trim().is_empty() => None,
                Some(script) => {
                    let path = PathBuf::from(script);
                    if path.is_file() {
                        Some(path)
                    } else {
                        tracing::warn!(script = %path.display(), "bootstrap script not found, skipping");
                        None
                    }
                }
                None => Some(working_dir.join(DEFAULT_BOOTSTRAP)).filter(|p| p.is_file()),
            }
        };

        let signing = match cli
            .code_signing_password
            .as_deref()
            .filter(|p| !p.is_empty())
        {
            Some(password) => Some(SigningConfig {
                keychain: resolver.resolve(
                    cli.keychain.clone(),
                    |c| c.signing.keychain.clone(),
                    DEFAULT_KEYCHAIN.to_string(),
                ),
                keychain_password: cli
                    .keychain_password
                    .clone()
                    .filter(|p| !p.is_empty())
                    .unwrap_or_else(generate_keychain_password),
                certificate: resolver.resolve(
                    cli.certificate.clone(),
                    |c| c.signing.certificate.clone(),
                    PathBuf::from(DEFAULT_CERTIFICATE),
                ),
                certificate_password: password.to_string(),
                wwdr_certificate: CertificateSource::parse(&resolver.resolve(
                    cli.wwdr_certificate.clone(),
                    |c| c.signing.wwdr_certificate.clone(),
                    DEFAULT_WWDR_CERTIFICATE.to_string(),
                )),
            }),
            None => None,
        };

        Ok(Self {
            working_dir,
            workspace: resolver.resolve_opt(cli.workspace.clone(), |c| c.workspace.clone()),
            project: resolver.resolve_opt(cli.project.clone(), |c| c.project.clone()),
            bootstrap,
            build_tool,
            tool_options,
            schemes,
            required_tools,
            signing,
            dry_run: cli.dry_run,
            summary_json: cli.summary_json.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    // Built directly so variables exported by the test environment cannot
    // leak in through clap's `env` fallbacks.
    fn cli() -> Cli {
        Cli::default()
    }

    fn with_file(toml: &str) -> ConfigResolver {
        ConfigResolver {
            config: Some(toml::from_str(toml).unwrap()),
            config_path: None,
        }
    }

    #[test]
    fn test_load_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join(CONFIG_FILE_NAME);

        let toml_content = r#"
workspace = "App.xcworkspace"
bootstrap = ""
build_tool = "xcodebuild"
tool_options = ["ONLY_ACTIVE_ARCH=YES"]
schemes = ["App", "App Extension"]

[signing]
keychain = "ci.keychain"
wwdr_certificate = "certs/wwdr.cer"
"#;

        let mut file = std::fs::File::create(&config_path).unwrap();
        file.write_all(toml_content.as_bytes()).unwrap();

        let config = CibuildConfig::load_from_file(&config_path).unwrap();
        assert_eq!(config.workspace, Some(PathBuf::from("App.xcworkspace")));
        assert_eq!(config.bootstrap.as_deref(), Some(""));
        assert_eq!(config.build_tool.as_deref(), Some("xcodebuild"));
        assert_eq!(
            config.schemes,
            Some(vec!["App".to_string(), "App Extension".to_string()])
        );
        assert_eq!(config.signing.keychain.as_deref(), Some("ci.keychain"));
        assert!(config.signing.certificate.is_none());
    }

    #[test]
    fn test_discover_config() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::create_dir(temp_dir.path().join(".git")).unwrap();
        let config_path = temp_dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&config_path, "project = \"Lib.xcodeproj\"\n").unwrap();

        let nested = temp_dir.path().join("Sources/Lib");
        std::fs::create_dir_all(&nested).unwrap();

        let (config, path) = CibuildConfig::discover_from(&nested).unwrap().unwrap();
        assert_eq!(config.project, Some(PathBuf::from("Lib.xcodeproj")));
        assert_eq!(path, config_path);
    }

    #[test]
    fn test_discover_no_config() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::create_dir(temp_dir.path().join(".git")).unwrap();

        let result = CibuildConfig::discover_from(temp_dir.path()).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_invalid_config_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&config_path, "schemes = \"not a list\"\n").unwrap();
        assert!(CibuildConfig::load_from_file(&config_path).is_err());
    }

    #[test]
    fn test_defaults() {
        let config = RunConfig::resolve(&cli(), None, &ConfigResolver::default()).unwrap();
        assert_eq!(config.build_tool, BuildTool::Xctool);
        assert_eq!(config.tool_options, vec!["RUN_CLANG_STATIC_ANALYZER=NO"]);
        assert_eq!(config.required_tools, vec!["xctool"]);
        assert!(config.schemes.is_empty());
        assert!(config.signing.is_none());
        assert!(!config.dry_run);
    }

    #[test]
    fn test_cli_over_file_over_default() {
        let resolver = with_file(
            r#"
build_tool = "xcodebuild"
tool_options = ["FROM_FILE=YES"]
workspace = "File.xcworkspace"
project = "File.xcodeproj"
"#,
        );

        let from_file = RunConfig::resolve(&cli(), None, &resolver).unwrap();
        assert_eq!(from_file.build_tool, BuildTool::Xcodebuild);
        assert_eq!(from_file.required_tools, vec!["xcodebuild"]);
        assert_eq!(from_file.tool_options, vec!["FROM_FILE=YES"]);
        assert_eq!(from_file.workspace, Some(PathBuf::from("File.xcworkspace")));

        let from_cli = RunConfig::resolve(
            &Cli {
                build_tool: Some("xctool".into()),
                tool_options: Some("A=1  B=2".into()),
                workspace: Some(PathBuf::from("Cli.xcworkspace")),
                ..cli()
            },
            None,
            &resolver,
        )
        .unwrap();
        assert_eq!(from_cli.build_tool, BuildTool::Xctool);
        assert_eq!(from_cli.tool_options, vec!["A=1", "B=2"]);
        assert_eq!(from_cli.workspace, Some(PathBuf::from("Cli.xcworkspace")));
        assert_eq!(from_cli.project, Some(PathBuf::from("File.xcodeproj")));
    }

    #[test]
    fn test_scheme_sources() {
        let resolver = with_file("schemes = [\"FromFile\"]\n");

        let positional = Cli {
            schemes: vec!["One".into(), "Two".into()],
            ..cli()
        };
        let config = RunConfig::resolve(&positional, Some("Env"), &resolver).unwrap();
        assert_eq!(config.schemes, vec!["One", "Two"]);

        let config = RunConfig::resolve(&cli(), Some(" Env\nOther "), &resolver).unwrap();
        assert_eq!(config.schemes, vec!["Env", "Other"]);

        let config = RunConfig::resolve(&cli(), Some("   "), &resolver).unwrap();
        assert_eq!(config.schemes, vec!["FromFile"]);
    }

    #[test]
    fn test_bootstrap_can_be_disabled() {
        let temp_dir = TempDir::new().unwrap();
        let script = temp_dir.path().join("setup");
        std::fs::write(&script, "#!/bin/sh\n").unwrap();
        let explicit = Cli {
            bootstrap: Some(script.display().to_string()),
            ..cli()
        };

        let config = RunConfig::resolve(&explicit, None, &ConfigResolver::default()).unwrap();
        assert_eq!(config.bootstrap, Some(script.clone()));

        let config = RunConfig::resolve(
            &Cli {
                no_bootstrap: true,
                ..explicit
            },
            None,
            &ConfigResolver::default(),
        )
        .unwrap();
        assert!(config.bootstrap.is_none());

        let config = RunConfig::resolve(&cli(), None, &with_file("bootstrap = \"\"\n")).unwrap();
        assert!(config.bootstrap.is_none());
    }

    #[test]
    fn test_missing_explicit_bootstrap_is_skipped() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("bin/setup");

        let config = RunConfig::resolve(
            &Cli {
                bootstrap: Some(missing.display().to_string()),
                ..cli()
            },
            None,
            &ConfigResolver::default(),
        )
        .unwrap();
        assert!(config.bootstrap.is_none());

        let resolver = with_file(&format!("bootstrap = {:?}\n", missing.display().to_string()));
        let config = RunConfig::resolve(&cli(), None, &resolver).unwrap();
        assert!(config.bootstrap.is_none());
    }

    #[test]
    fn test_signing_only_with_password() {
        let resolver = with_file("[signing]\nkeychain = \"file.keychain\"\n");

        let config = RunConfig::resolve(&Cli {
                keychain: Some("x".into()),
                ..cli()
            }, None, &resolver).unwrap();
        assert!(config.signing.is_none());

        let config = RunConfig::resolve(
            &Cli {
                code_signing_password: Some("s3cret".into()),
                ..cli()
            },
            None,
            &resolver,
        )
        .unwrap();
        let signing = config.signing.unwrap();
        assert_eq!(signing.keychain, "file.keychain");
        assert_eq!(signing.certificate_password, "s3cret");
        assert_eq!(signing.certificate, PathBuf::from(DEFAULT_CERTIFICATE));
        assert_eq!(signing.keychain_password.len(), 16);
        assert_eq!(
            signing.wwdr_certificate,
            CertificateSource::Url(DEFAULT_WWDR_CERTIFICATE.to_string())
        );
    }

    #[test]
    fn test_unknown_build_tool() {
        let err = RunConfig::resolve(
            &Cli {
                build_tool: Some("make".into()),
                ..cli()
            },
            None,
            &ConfigResolver::default(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("unknown build tool"));
    }
}
