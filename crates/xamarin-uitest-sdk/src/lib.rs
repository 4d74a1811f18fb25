//! Xamarin UITest SDK
//!
//! `xamarin-uitest-sdk` analyses Xamarin solutions and drives the external
//! toolchain needed to run Xamarin.UITest suites against an Android emulator:
//! NuGet restore, `xbuild`/`msbuild` clean and build, artifact discovery and
//! the NUnit console.
//!
//! # Architecture
//!
//! Components, leaf to root (data only flows downward):
//!
//! - **Project parser** ([`project`]): identity, platform, output kind and
//!   project references of one `.csproj`
//! - **Solution parser** ([`solution`]): member projects and configuration
//!   mapping of one `.sln`, plus the reverse lookup of related solutions
//! - **Resolver** ([`resolver`]): (application, test) pairings
//! - **Restorer** ([`restore`]): sequential, best-effort `nuget restore`
//! - **Builder** ([`builders`]): clean, build and artifact discovery
//! - **Runner** ([`runner`], [`report`]): NUnit console execution and result
//!   interpretation
//!
//! Every component takes its tool paths and timeouts through its constructor
//! ([`ToolPaths`], [`Timeouts`]); nothing reads global state.
//!
//! # Example
//!
//! ```ignore
//! use xamarin_uitest_sdk::{
//!     BuildSettings, PackageRestorer, ProjectDescriptor, TargetPlatform, Timeouts, ToolPaths,
//!     builders::XamarinBuilder, resolver, solution,
//! };
//!
//! let tools = ToolPaths::default();
//! let settings = BuildSettings::new("Release", "AnyCPU");
//!
//! let app = ProjectDescriptor::parse("Droid/Droid.csproj".as_ref(), &settings)?;
//! let solutions = solution::related_solutions(&app.path)?;
//! PackageRestorer::new(&tools, Timeouts::default()).restore_all(&solutions);
//!
//! let builder = XamarinBuilder::new(&tools, Timeouts::default());
//! let apk = builder.build(&app, &settings, XamarinBuilder::target_for(&app, TargetPlatform::Android))?;
//! # Ok::<(), xamarin_uitest_sdk::UiTestError>(())
//! ```

pub mod builders;
pub mod project;
pub mod report;
pub mod resolver;
pub mod restore;
pub mod runner;
pub mod solution;
pub mod types;

pub use builders::XamarinBuilder;
pub use project::{ProjectDescriptor, ProjectReference};
pub use report::{ResultReport, SummaryCounts, TestFailure};
pub use resolver::{TestPairing, pair_solution, pair_tests};
pub use restore::{PackageRestorer, RestoreReport};
pub use runner::{NunitRunner, RESULT_LOG_NAME, RunnerEnvironment, TestRunOutcome, TestRunState};
pub use solution::{SolutionDescriptor, SolutionProject, related_solutions};
pub use types::{
    ArtifactKind, BuildOutput, BuildSettings, BuildTarget, BuildTool, ErrorKind, OutputKind,
    ProjectId, TargetPlatform, TestFramework, Timeouts, ToolPaths, UiTestError,
};

/// Library version, matching `Cargo.toml`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
