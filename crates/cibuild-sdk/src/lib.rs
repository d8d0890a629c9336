//! Xcode CI building blocks
//!
//! `cibuild-sdk` contains the pieces of a continuous-integration run for
//! Xcode projects. The `cibuild` CLI sequences them, but each can be used on
//! its own.
//!
//! # Architecture
//!
//! - **Runner**: [`CommandRunner`] abstracts external process execution
//! - **Builders**: dependency checks, bootstrap, container discovery and the
//!   per-scheme test/build fallback ([`builders::XcodeBuilder`])
//! - **Keychain**: a transient signing keychain that cleans itself up
//!   ([`keychain::SigningKeychain`])
//! - **Types**: errors, plans and reports
//!
//! # Example
//!
//! ```no_run
//! use cibuild_sdk::builders::{XcodeBuilder, check_required_tools, find_build_container};
//! use cibuild_sdk::{BuildTool, RunReport, SystemRunner};
//! use std::path::Path;
//!
//! fn main() -> Result<(), cibuild_sdk::CiError> {
//!     check_required_tools(&["xctool"])?;
//!     let container = find_build_container(Path::new("."), None, None)?;
//!     let builder = XcodeBuilder::new(SystemRunner, BuildTool::Xctool, container);
//!
//!     let mut run = RunReport::default();
//!     for scheme in builder.list_schemes()? {
//!         run.schemes.push(builder.build_scheme(&scheme)?);
//!     }
//!     println!("success: {}", run.success());
//!     Ok(())
//! }
//! ```

pub mod builders;
pub mod keychain;
pub mod runner;
pub mod types;

pub use keychain::{CertificateSource, SigningConfig, SigningKeychain};
pub use runner::{CommandRunner, DryRunRunner, SystemRunner, ToolCommand, ToolOutput};
pub use types::{
    BuildAction, BuildContainer, BuildTool, CiError, RunReport, SchemePlan, SchemeReport,
    SchemeStatus, Sdk, TestSupport,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_is_set() {
        assert!(!VERSION.is_empty());
    }
}
