//! Build automation for Xamarin projects.
//!
//! ## Overview
//!
//! A build for one project runs in three steps:
//!
//! 1. **Clean** - `<tool> <project> /t:Clean` (when cleaning is enabled)
//! 2. **Build** - `/t:PackageForAndroid` for Android application projects,
//!    `/t:Build` for everything else, always into `bin/<platform>/<configuration>/`
//! 3. **Artifact discovery** - the output tree is searched for the first
//!    `*.apk` or `*.dll` in depth-first, lexicographic order
//!
//! ## Builders
//!
//! | Builder | Toolchain | Output |
//! |---------|-----------|--------|
//! | [`XamarinBuilder`] | `xbuild` or `msbuild` | `.apk` package or `.dll` assembly |
//!
//! ## Common Utilities
//!
//! The [`common`] module is shared with the restorer and the test runner:
//!
//! - Child-process execution with captured output and an optional timeout
//! - Printable commands for logs and error messages
//! - Path normalization for project files written on Windows
//!
//! ## Example
//!
//! ```ignore
//! use xamarin_uitest_sdk::builders::XamarinBuilder;
//! use xamarin_uitest_sdk::{BuildTarget, Timeouts, ToolPaths};
//!
//! let builder = XamarinBuilder::new(&ToolPaths::default(), Timeouts::default())
//!     .verbose(true)
//!     .dry_run(true); // Preview only
//!
//! builder.clean(&app, &app.settings)?;
//! let output = builder.build(&app, &app.settings, BuildTarget::PackageForAndroid)?;
//! println!("apk: {}", output.artifact.display());
//! # Ok::<(), xamarin_uitest_sdk::UiTestError>(())
//! ```

pub mod common;
pub mod xamarin;

pub use xamarin::XamarinBuilder;
