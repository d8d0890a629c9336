//! Preparation steps shared by every CI run.
//!
//! Each helper here either succeeds or produces the [`CiError`] that ends the
//! run:
//!
//! - **Dependency check** - every required tool must be on `PATH`
//! - **Bootstrap** - the project's bootstrap script must exit cleanly
//! - **Container discovery** - a workspace or project must exist
//!
//! Error messages name the missing tool, script, or directory so the CI log
//! alone is enough to fix the problem.

use std::fs;
use std::path::{Path, PathBuf};

use crate::runner::{CommandRunner, ToolCommand};
use crate::types::{BuildContainer, CiError};

/// Bootstrap script used when none is configured, relative to the working directory.
pub const DEFAULT_BOOTSTRAP: &str = "script/bootstrap";

/// Splits a whitespace-separated list (as found in `REQUIRED_TOOLS`,
/// `SCHEMES` or `XCTOOL_OPTIONS`) into its words.
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split_whitespace().map(str::to_string).collect()
}

/// Verifies that every tool in `tools` can be located on `PATH`.
///
/// Fails on the first missing tool, in list order.
pub fn check_required_tools<S: AsRef<str>>(tools: &[S]) -> Result<(), CiError> {
    for tool in tools {
        let tool = tool.as_ref();
        match which::which(tool) {
            Ok(path) => tracing::debug!(tool, path = %path.display(), "found required tool"),
            Err(_) => return Err(CiError::MissingDependency(tool.to_string())),
        }
    }
    Ok(())
}

/// Runs the bootstrap script, streaming its output.
///
/// A non-zero exit is fatal and carries the script's exit code.
pub fn run_bootstrap<R: CommandRunner>(runner: &R, script: &Path) -> Result<(), CiError> {
    tracing::info!(script = %script.display(), "bootstrapping");

    let output = runner.run(&ToolCommand::new(script.display().to_string()).echo(true))?;
    if !output.success() {
        return Err(CiError::Bootstrap {
            script: script.to_path_buf(),
            code: output.code,
        });
    }
    Ok(())
}

/// Decides which workspace or project to build.
///
/// Explicit paths win over discovery, and a workspace always wins over a
/// project. Without explicit paths, `dir` is searched for the first
/// `*.xcworkspace`, then the first `*.xcodeproj`, in lexical order.
pub fn find_build_container(
    dir: &Path,
    workspace: Option<&Path>,
    project: Option<&Path>,
) -> Result<BuildContainer, CiError> {
    if let Some(ws) = workspace {
        return Ok(BuildContainer::Workspace(ws.to_path_buf()));
    }
    if let Some(found) = first_with_extension(dir, "xcworkspace")? {
        return Ok(BuildContainer::Workspace(found));
    }
    if let Some(proj) = project {
        return Ok(BuildContainer::Project(proj.to_path_buf()));
    }
    if let Some(found) = first_with_extension(dir, "xcodeproj")? {
        return Ok(BuildContainer::Project(found));
    }
    Err(CiError::NoBuildContainer(dir.to_path_buf()))
}

/// First entry of `dir` (sorted by name) whose extension is `ext`.
///
/// The returned path is relative to `dir` when `dir` is `.`, matching what a
/// user would type.
fn first_with_extension(dir: &Path, ext: &str) -> Result<Option<PathBuf>, CiError> {
    let mut names: Vec<_> = fs::read_dir(dir)?
        .filter_map(Result::ok)
        .map(|entry| entry.file_name())
        .filter(|name| Path::new(name).extension().and_then(|e| e.to_str()) == Some(ext))
        .collect();
    names.sort();

    Ok(names.into_iter().next().map(|name| {
        if dir == Path::new(".") {
            PathBuf::from(name)
        } else {
            dir.join(name)
        }
    }))
}
