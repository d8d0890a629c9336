//! Build automation for Xcode containers.
//!
//! ## Overview
//!
//! A CI run prepares the checkout and then drives every scheme through the
//! external build tool:
//!
//! 1. **Dependency check** - required tools must be on `PATH`
//! 2. **Bootstrap** - the project's bootstrap script, if any
//! 3. **Container discovery** - workspace first, then project
//! 4. **Per scheme** - clean, probe tests, then test or build
//!
//! ## Scheme fallback
//!
//! | First probe | Simulator probe | Result |
//! |-------------|-----------------|--------|
//! | runnable | - | `test`, default SDK |
//! | needs simulator | runnable | `test -sdk iphonesimulator` |
//! | needs simulator | anything else | `build`, default SDK |
//! | unsupported | - | `build`, default SDK |
//!
//! ## Example
//!
//! ```no_run
//! use cibuild_sdk::builders::{XcodeBuilder, find_build_container};
//! use cibuild_sdk::{BuildTool, SystemRunner};
//! use std::path::Path;
//!
//! let container = find_build_container(Path::new("."), None, None)?;
//! let builder = XcodeBuilder::new(SystemRunner, BuildTool::Xctool, container);
//! let report = builder.build_scheme("MyApp")?;
//! println!("{} {:?}", report.scheme, report.status);
//! # Ok::<(), cibuild_sdk::CiError>(())
//! ```

pub mod common;
pub mod xcode;

pub use common::{
    DEFAULT_BOOTSTRAP, check_required_tools, find_build_container, run_bootstrap, split_list,
};
pub use xcode::{XcodeBuilder, parse_scheme_list};
