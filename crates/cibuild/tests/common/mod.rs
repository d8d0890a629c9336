//! Common test utilities for cibuild integration tests.
//!
//! Provides `TestEnv`, a scratch checkout with fake `xctool`, `xcodebuild`
//! and `security` executables on `PATH`. Every fake appends its command line
//! to a shared log so tests can assert on what cibuild ran, and in which
//! order, without Xcode being installed.

#![allow(dead_code)]

use assert_cmd::Command;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
pub use tempfile::TempDir;

/// An isolated checkout plus a directory of fake tools.
pub struct TestEnv {
    pub repo_dir: TempDir,
    pub bin_dir: TempDir,
    log: PathBuf,
}

impl TestEnv {
    /// Creates an empty checkout with no tools installed.
    pub fn new() -> Self {
        let bin_dir = TempDir::new().unwrap();
        let log = bin_dir.path().join("calls.log");
        fs::write(&log, "").unwrap();
        Self {
            repo_dir: TempDir::new().unwrap(),
            bin_dir,
            log,
        }
    }

    /// Creates a checkout with an `App.xcworkspace` and well-behaved fakes
    /// for every tool cibuild drives.
    pub fn with_workspace() -> Self {
        let env = Self::new();
        env.mkdir("App.xcworkspace");
        env.fake_tool("xctool", "");
        env.fake_tool("xcodebuild", "");
        env.fake_security();
        env
    }

    /// Installs an executable `name` that logs its arguments and then runs
    /// `body` as POSIX shell.
    pub fn fake_tool(&self, name: &str, body: &str) {
        let script = format!(
            "#!/bin/sh\nprintf '%s\\n' \"{name} $*\" >> '{log}'\n{body}\nexit 0\n",
            log = self.log.display()
        );
        write_executable(&self.bin_dir.path().join(name), &script);
    }

    /// Installs a `security` fake that reports an existing login keychain.
    pub fn fake_security(&self) {
        self.fake_tool(
            "security",
            r#"if [ "$1" = "list-keychains" ] && [ "$#" -eq 3 ]; then
    echo '    "/Users/ci/Library/Keychains/login.keychain-db"'
fi"#,
        );
    }

    /// Writes an executable `script/bootstrap` running `body`.
    pub fn bootstrap_script(&self, body: &str) {
        self.mkdir("script");
        let script = format!(
            "#!/bin/sh\nprintf '%s\\n' \"bootstrap\" >> '{log}'\n{body}\n",
            log = self.log.display()
        );
        write_executable(&self.path().join("script/bootstrap"), &script);
    }

    /// Writes a file in the checkout and returns its path.
    pub fn write_file(&self, relative: &str, contents: &str) -> PathBuf {
        let path = self.path().join(relative);
        fs::write(&path, contents).unwrap();
        path
    }

    pub fn mkdir(&self, relative: &str) {
        fs::create_dir_all(self.path().join(relative)).unwrap();
    }

    /// Get a Command for the cibuild binary running inside the checkout.
    ///
    /// The environment is cleared so CI variables of the outer process
    /// cannot leak into the run.
    pub fn cibuild(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_cibuild"));
        cmd.current_dir(self.path());
        cmd.env_clear();
        cmd.env(
            "PATH",
            format!("{}:/usr/bin:/bin", self.bin_dir.path().display()),
        );
        cmd.env("HOME", self.path());
        cmd
    }

    /// Command lines recorded by the fakes, in execution order.
    pub fn calls(&self) -> Vec<String> {
        fs::read_to_string(&self.log)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    /// Recorded calls containing `needle`.
    pub fn calls_matching(&self, needle: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.contains(needle))
            .collect()
    }

    /// Index of the first recorded call containing `needle`.
    pub fn position(&self, needle: &str) -> Option<usize> {
        self.calls().iter().position(|c| c.contains(needle))
    }

    pub fn path(&self) -> &Path {
        self.repo_dir.path()
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}

fn write_executable(path: &Path, contents: &str) {
    fs::write(path, contents).unwrap();
    let mut perms = fs::metadata(path).unwrap().permissions();
    perms.set_mode(0o755);
    fs::set_permissions(path, perms).unwrap();
}
