//! Core types for cibuild-sdk.
//!
//! This module defines the fundamental types used throughout the SDK:
//!
//! - [`CiError`] - Error types for every step of a CI run
//! - [`BuildTool`] / [`BuildContainer`] - What is invoked and on which Xcode container
//! - [`Sdk`] / [`BuildAction`] / [`SchemePlan`] - How a single scheme is driven
//! - [`TestSupport`] - Structured result of probing a scheme's tests
//! - [`SchemeReport`] / [`RunReport`] - Outcome of a run

use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Error types for cibuild-sdk operations.
///
/// Every fatal condition of a CI run maps to one variant, and
/// [`CiError::exit_code`] decides which process exit status it produces.
///
/// # Example
///
/// ```
/// use cibuild_sdk::CiError;
///
/// let err = CiError::Clean { scheme: "App".into(), code: Some(65) };
/// assert_eq!(err.exit_code(), 65);
///
/// let err = CiError::MissingDependency("xctool".into());
/// assert_eq!(err.exit_code(), 1);
/// ```
#[derive(Debug, thiserror::Error)]
pub enum CiError {
    /// A tool listed as required could not be located on `PATH`.
    #[error("{0} not found. Please install it and run cibuild again")]
    MissingDependency(String),

    /// The bootstrap script exited unsuccessfully.
    #[error("bootstrap script {script:?} failed with {}", describe_code(.code))]
    Bootstrap { script: PathBuf, code: Option<i32> },

    /// Neither a workspace nor a project could be found.
    #[error("no workspace or project file found in {0:?}")]
    NoBuildContainer(PathBuf),

    /// No schemes were given and none could be discovered.
    #[error("no schemes to build. Pass scheme names, set SCHEMES, or share schemes in the container")]
    NoSchemes,

    /// Cleaning a scheme failed. This aborts the whole run.
    #[error("cleaning scheme '{scheme}' failed with {}", describe_code(.code))]
    Clean { scheme: String, code: Option<i32> },

    /// A `security` keychain operation failed.
    #[error("keychain operation failed: {0}")]
    Keychain(String),

    /// A signing certificate could not be obtained.
    #[error("certificate error: {0}")]
    Certificate(String),

    /// An external program could not be started at all.
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Invalid or contradictory configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Downloading a certificate failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl CiError {
    /// Returns the process exit status this error should terminate the run with.
    ///
    /// Bootstrap and clean failures propagate the failing command's own exit
    /// code; everything else exits with `1`.
    pub fn exit_code(&self) -> i32 {
        match self {
            CiError::Bootstrap { code, .. } | CiError::Clean { code, .. } => {
                code.filter(|c| *c != 0).unwrap_or(1)
            }
            _ => 1,
        }
    }
}

fn describe_code(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "no exit code (terminated by signal)".to_string(),
    }
}

/// The external build tool driving each scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildTool {
    /// Facebook's `xctool`.
    #[default]
    Xctool,
    /// Apple's `xcodebuild`.
    Xcodebuild,
}

impl BuildTool {
    /// Executable name.
    pub fn program(&self) -> &'static str {
        match self {
            BuildTool::Xctool => "xctool",
            BuildTool::Xcodebuild => "xcodebuild",
        }
    }

    /// Action used to find out whether a scheme's tests can run.
    pub fn probe_action(&self) -> &'static str {
        match self {
            BuildTool::Xctool => "run-tests",
            BuildTool::Xcodebuild => "test",
        }
    }

    /// Parses a tool name as accepted on the command line or in config files.
    pub fn parse(name: &str) -> Result<Self, CiError> {
        match name.trim() {
            "xctool" => Ok(BuildTool::Xctool),
            "xcodebuild" => Ok(BuildTool::Xcodebuild),
            other => Err(CiError::Config(format!(
                "unknown build tool '{other}', expected 'xctool' or 'xcodebuild'"
            ))),
        }
    }
}

impl fmt::Display for BuildTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.program())
    }
}

/// The Xcode container a run builds. A workspace always takes precedence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildContainer {
    /// An `.xcworkspace` bundle.
    Workspace(PathBuf),
    /// An `.xcodeproj` bundle.
    Project(PathBuf),
}

impl BuildContainer {
    /// Arguments selecting this container, e.g. `["-workspace", "App.xcworkspace"]`.
    pub fn args(&self) -> [String; 2] {
        match self {
            BuildContainer::Workspace(path) => {
                ["-workspace".to_string(), path.display().to_string()]
            }
            BuildContainer::Project(path) => ["-project".to_string(), path.display().to_string()],
        }
    }

    /// Path of the container bundle.
    pub fn path(&self) -> &std::path::Path {
        match self {
            BuildContainer::Workspace(path) | BuildContainer::Project(path) => path,
        }
    }
}

impl fmt::Display for BuildContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildContainer::Workspace(path) => write!(f, "workspace {}", path.display()),
            BuildContainer::Project(path) => write!(f, "project {}", path.display()),
        }
    }
}

/// SDK override passed to the build tool with `-sdk`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Sdk {
    #[serde(rename = "iphonesimulator")]
    IphoneSimulator,
}

impl Sdk {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sdk::IphoneSimulator => "iphonesimulator",
        }
    }
}

impl fmt::Display for Sdk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Build tool action run for a scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildAction {
    Clean,
    Build,
    Test,
}

impl BuildAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildAction::Clean => "clean",
            BuildAction::Build => "build",
            BuildAction::Test => "test",
        }
    }
}

impl fmt::Display for BuildAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a scheme's unit tests can run, as reported by a probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestSupport {
    /// Tests can run with the SDK that was probed.
    Runnable,
    /// The probed SDK cannot run tests; retry with the simulator SDK.
    NeedsSimulator,
    /// The scheme has no runnable test target.
    Unsupported,
}

/// The SDK/action pair a scheme ends up being driven with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SchemePlan {
    pub sdk: Option<Sdk>,
    pub action: BuildAction,
}

impl SchemePlan {
    /// Run the tests with the tool's default SDK.
    pub const fn test() -> Self {
        Self {
            sdk: None,
            action: BuildAction::Test,
        }
    }

    /// Plain build with the tool's default SDK.
    pub const fn build() -> Self {
        Self {
            sdk: None,
            action: BuildAction::Build,
        }
    }
}

/// Final status of a single scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemeStatus {
    Passed,
    Failed,
}

/// Outcome of building or testing one scheme.
#[derive(Debug, Clone, Serialize)]
pub struct SchemeReport {
    pub scheme: String,
    #[serde(flatten)]
    pub plan: SchemePlan,
    pub status: SchemeStatus,
    /// Exit code of the final action, `None` if it was killed by a signal.
    pub exit_code: Option<i32>,
    #[serde(rename = "duration_secs", serialize_with = "serialize_secs")]
    pub duration: Duration,
}

impl SchemeReport {
    pub fn passed(&self) -> bool {
        self.status == SchemeStatus::Passed
    }
}

fn serialize_secs<S: serde::Serializer>(duration: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(duration.as_secs_f64())
}

/// Aggregate outcome of a CI run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub schemes: Vec<SchemeReport>,
}

impl RunReport {
    /// `true` when every scheme passed.
    pub fn success(&self) -> bool {
        self.schemes.iter().all(SchemeReport::passed)
    }

    /// Names of the schemes whose final action failed.
    pub fn failed_schemes(&self) -> Vec<&str> {
        self.schemes
            .iter()
            .filter(|r| !r.passed())
            .map(|r| r.scheme.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(scheme: &str, status: SchemeStatus) -> SchemeReport {
        SchemeReport {
            scheme: scheme.to_string(),
            plan: SchemePlan::test(),
            status,
            exit_code: Some(if status == SchemeStatus::Passed { 0 } else { 65 }),
            duration: Duration::from_millis(1500),
        }
    }

    #[test]
    fn test_exit_code_propagates_command_status() {
        let err = CiError::Bootstrap {
            script: PathBuf::from("script/bootstrap"),
            code: Some(3),
        };
        assert_eq!(err.exit_code(), 3);

        let err = CiError::Clean {
            scheme: "App".into(),
            code: None,
        };
        assert_eq!(err.exit_code(), 1);

        assert_eq!(CiError::NoBuildContainer(PathBuf::from(".")).exit_code(), 1);
        assert_eq!(CiError::NoSchemes.exit_code(), 1);
    }

    #[test]
    fn test_build_tool_parse() {
        assert_eq!(BuildTool::parse("xctool").unwrap(), BuildTool::Xctool);
        assert_eq!(BuildTool::parse(" xcodebuild ").unwrap(), BuildTool::Xcodebuild);
        assert!(matches!(BuildTool::parse("make"), Err(CiError::Config(_))));
        assert_eq!(BuildTool::Xctool.probe_action(), "run-tests");
        assert_eq!(BuildTool::Xcodebuild.probe_action(), "test");
    }

    #[test]
    fn test_container_args() {
        let ws = BuildContainer::Workspace(PathBuf::from("App.xcworkspace"));
        assert_eq!(ws.args(), ["-workspace".to_string(), "App.xcworkspace".to_string()]);

        let proj = BuildContainer::Project(PathBuf::from("App.xcodeproj"));
        assert_eq!(proj.args(), ["-project".to_string(), "App.xcodeproj".to_string()]);
    }

    #[test]
    fn test_run_report_success() {
        let mut run = RunReport::default();
        assert!(run.success());

        run.schemes.push(report("App", SchemeStatus::Passed));
        assert!(run.success());

        run.schemes.push(report("Framework", SchemeStatus::Failed));
        assert!(!run.success());
        assert_eq!(run.failed_schemes(), vec!["Framework"]);
    }

    #[test]
    fn test_scheme_report_json_shape() {
        let mut r = report("App", SchemeStatus::Passed);
        r.plan.sdk = Some(Sdk::IphoneSimulator);
        let value = serde_json::to_value(&r).unwrap();
        assert_eq!(value["scheme"], "App");
        assert_eq!(value["sdk"], "iphonesimulator");
        assert_eq!(value["action"], "test");
        assert_eq!(value["status"], "passed");
        assert_eq!(value["exit_code"], 0);
        assert_eq!(value["duration_secs"], 1.5);
    }
}
