//! Xcode scheme automation
//!
//! [`XcodeBuilder`] drives `xctool` or `xcodebuild` for one container. For
//! each scheme it cleans, works out whether the scheme's unit tests can run,
//! and then either tests or merely builds it.

use std::time::Instant;

use crate::runner::{CommandRunner, ToolCommand, ToolOutput};
use crate::types::{
    BuildAction, BuildContainer, BuildTool, CiError, SchemePlan, SchemeReport, SchemeStatus, Sdk,
    TestSupport,
};

/// Emitted by xctool when tests cannot run with the selected SDK, e.g.
/// `Testing with the 'iphoneos' SDK is not yet supported.`
const SDK_NOT_SUPPORTED_PREFIX: &str = "Testing with the '";
const SDK_NOT_SUPPORTED_SUFFIX: &str = "' SDK is not yet supported";
/// Emitted when the scheme's test action references no test target.
const MISSING_TARGET: &str = "does not contain a target named";
/// xcodebuild's wording for a scheme without a test action.
const NOT_CONFIGURED_FOR_TEST: &str = "is not currently configured for the test action";

/// Builds and tests the schemes of one workspace or project.
pub struct XcodeBuilder<R> {
    runner: R,
    tool: BuildTool,
    container: BuildContainer,
    /// Extra options inserted after the container arguments.
    options: Vec<String>,
}

impl<R: CommandRunner> XcodeBuilder<R> {
    /// Creates a builder for `container` invoking `tool` through `runner`.
    pub fn new(runner: R, tool: BuildTool, container: BuildContainer) -> Self {
        Self {
            runner,
            tool,
            container,
            options: Vec::new(),
        }
    }

    /// Sets extra options passed on every invocation (e.g. `RUN_CLANG_STATIC_ANALYZER=NO`).
    pub fn options(mut self, options: Vec<String>) -> Self {
        self.options = options;
        self
    }

    pub fn tool(&self) -> BuildTool {
        self.tool
    }

    pub fn container(&self) -> &BuildContainer {
        &self.container
    }

    /// Builds the tool command for `scheme`:
    /// `<tool> <container> <options...> [-sdk <sdk>] -scheme <scheme> <action>`.
    fn command(&self, scheme: &str, sdk: Option<Sdk>, action: &str) -> ToolCommand {
        let mut cmd = ToolCommand::new(self.tool.program())
            .args(self.container.args())
            .args(self.options.iter().cloned());
        if let Some(sdk) = sdk {
            cmd = cmd.args(["-sdk", sdk.as_str()]);
        }
        cmd.args(["-scheme", scheme, action])
    }

    /// Cleans `scheme`. Output is discarded; a failure aborts the run.
    pub fn clean(&self, scheme: &str) -> Result<(), CiError> {
        tracing::info!(scheme, "cleaning");
        let output = self
            .runner
            .run(&self.command(scheme, None, BuildAction::Clean.as_str()))?;
        if !output.success() {
            return Err(CiError::Clean {
                scheme: scheme.to_string(),
                code: output.code,
            });
        }
        Ok(())
    }

    /// Asks the tool to run `scheme`'s tests with `sdk` and reports whether
    /// that is possible at all. Test failures still count as runnable.
    pub fn probe_tests(&self, scheme: &str, sdk: Option<Sdk>) -> Result<TestSupport, CiError> {
        let output = self
            .runner
            .run(&self.command(scheme, sdk, self.tool.probe_action()).echo(true))?;
        let support = classify_test_output(&output);
        tracing::debug!(scheme, sdk = ?sdk, ?support, "probed tests");
        Ok(support)
    }

    /// Decides how `scheme` will be driven.
    ///
    /// Tests that cannot run on the default SDK are retried on the iOS
    /// simulator; if that does not work either, the scheme is only built.
    pub fn plan_scheme(&self, scheme: &str) -> Result<SchemePlan, CiError> {
        let plan = match self.probe_tests(scheme, None)? {
            TestSupport::Runnable => SchemePlan::test(),
            TestSupport::Unsupported => SchemePlan::build(),
            TestSupport::NeedsSimulator => {
                match self.probe_tests(scheme, Some(Sdk::IphoneSimulator))? {
                    TestSupport::Runnable => SchemePlan {
                        sdk: Some(Sdk::IphoneSimulator),
                        action: BuildAction::Test,
                    },
                    TestSupport::NeedsSimulator | TestSupport::Unsupported => SchemePlan::build(),
                }
            }
        };
        if plan.action == BuildAction::Build {
            tracing::warn!(scheme, "unit tests are not supported, building only");
        }
        Ok(plan)
    }

    /// Runs `plan` for `scheme`, streaming the tool's output.
    pub fn execute(&self, scheme: &str, plan: SchemePlan) -> Result<ToolOutput, CiError> {
        tracing::info!(scheme, action = %plan.action, sdk = ?plan.sdk.map(|s| s.as_str()), "running");
        self.runner
            .run(&self.command(scheme, plan.sdk, plan.action.as_str()).echo(true))
    }

    /// Cleans, plans and executes `scheme`.
    ///
    /// `Err` is reserved for failures that must abort the whole run (clean
    /// failures, tools that cannot be started). A failing build or test is
    /// reported as [`SchemeStatus::Failed`].
    pub fn build_scheme(&self, scheme: &str) -> Result<SchemeReport, CiError> {
        let started = Instant::now();
        self.clean(scheme)?;

        tracing::info!(scheme, "building and testing");
        let plan = self.plan_scheme(scheme)?;
        let output = self.execute(scheme, plan)?;

        let status = if output.success() {
            SchemeStatus::Passed
        } else {
            tracing::error!(scheme, code = ?output.code, "scheme failed");
            SchemeStatus::Failed
        };

        Ok(SchemeReport {
            scheme: scheme.to_string(),
            plan,
            status,
            exit_code: output.code,
            duration: started.elapsed(),
        })
    }

    /// Lists the schemes shared by the container using `xcodebuild -list`.
    ///
    /// `xctool` has no equivalent, so `xcodebuild` is used regardless of the
    /// configured tool. A failing listing yields no schemes.
    pub fn list_schemes(&self) -> Result<Vec<String>, CiError> {
        let cmd = ToolCommand::new(BuildTool::Xcodebuild.program())
            .arg("-list")
            .args(self.container.args());
        let output = self.runner.run(&cmd)?;
        if !output.success() {
            tracing::warn!(
                code = ?output.code,
                stderr = %output.stderr.trim(),
                "could not list schemes"
            );
            return Ok(Vec::new());
        }
        Ok(parse_scheme_list(&output.stdout))
    }
}

/// Maps build tool output to a [`TestSupport`] signal.
///
/// The last marker line in the output decides.
fn classify_test_output(output: &ToolOutput) -> TestSupport {
    let text = output.combined();
    let mut support = TestSupport::Runnable;
    for line in text.lines() {
        if line.contains(MISSING_TARGET) || line.contains(NOT_CONFIGURED_FOR_TEST) {
            support = TestSupport::Unsupported;
        } else if let Some(start) = line.find(SDK_NOT_SUPPORTED_PREFIX)
            && line[start + SDK_NOT_SUPPORTED_PREFIX.len()..].contains(SDK_NOT_SUPPORTED_SUFFIX)
        {
            support = TestSupport::NeedsSimulator;
        }
    }
    support
}

/// Extracts scheme names from `xcodebuild -list` output.
///
/// Names are the indented lines following `Schemes:` up to the first blank
/// line or the end of output.
pub fn parse_scheme_list(output: &str) -> Vec<String> {
    output
        .lines()
        .skip_while(|line| line.trim() != "Schemes:")
        .skip(1)
        .map(str::trim)
        .take_while(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}
