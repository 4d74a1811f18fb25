//! Core types for xamarin-uitest-sdk.
//!
//! This module defines the fundamental types shared by every component:
//!
//! - [`UiTestError`] / [`ErrorKind`] - The error taxonomy of the step
//! - [`ProjectId`] - A normalized project GUID
//! - [`TargetPlatform`], [`OutputKind`], [`TestFramework`] - Project classification
//! - [`BuildSettings`] / [`BuildTarget`] - What to build and how
//! - [`BuildOutput`] / [`ArtifactKind`] - What a build produced
//! - [`ToolPaths`] / [`Timeouts`] - Explicit toolchain configuration

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Error types for xamarin-uitest-sdk operations.
///
/// Every variant maps to exactly one [`ErrorKind`], which is what callers
/// inspect to decide whether to continue or abort.
///
/// # Example
///
/// ```ignore
/// use xamarin_uitest_sdk::{ErrorKind, UiTestError};
///
/// match restorer.restore(&solution) {
///     Ok(()) => {}
///     Err(e) if e.kind() == ErrorKind::RestoreFailed => tracing::error!("{}", e),
///     Err(e) => return Err(e),
/// }
/// ```
#[derive(Debug, thiserror::Error)]
pub enum UiTestError {
    /// Missing or invalid input (CLI flag, environment variable, config file).
    #[error("configuration error: {0}. Check the step inputs")]
    Configuration(String),

    /// A project file could not be read or lacks a required field.
    #[error("malformed project file {path:?}: {reason}")]
    MalformedProjectFile { path: PathBuf, reason: String },

    /// A solution file could not be read or declares no projects.
    #[error("malformed solution file {path:?}: {reason}")]
    MalformedSolutionFile { path: PathBuf, reason: String },

    /// The package restore tool failed for one solution.
    ///
    /// This is the only non-fatal category: the pipeline logs it and proceeds.
    #[error("package restore failed for {solution:?}: {reason}")]
    RestoreFailed { solution: PathBuf, reason: String },

    /// The build toolchain exited unsuccessfully (or timed out).
    #[error("build failed for {project:?}: {reason}")]
    BuildFailed { project: PathBuf, reason: String },

    /// The build succeeded but the expected artifact is missing.
    #[error(
        "no *.{extension} artifact found under {search_dir:?}\n\n\
         The build reported success but produced nothing usable. \
         Check the project's output type and OutputPath."
    )]
    ArtifactNotFound {
        search_dir: PathBuf,
        extension: String,
    },

    /// The resolver found zero (app, test) pairings.
    #[error("no related test project found: {0}")]
    NoMatchingTestProject(String),

    /// The test runner reported failing tests.
    #[error("test execution failed for {assembly:?}: {summary}")]
    TestExecutionFailed { assembly: PathBuf, summary: String },

    /// The test runner failed without producing any failing-test record.
    #[error("test runner crashed for {assembly:?}: {reason}")]
    RunnerCrashed { assembly: PathBuf, reason: String },

    /// An I/O error occurred.
    #[error("I/O error: {0}. Check file paths and permissions")]
    Io(#[from] std::io::Error),
}

/// Fieldless classification of a [`UiTestError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Configuration,
    MalformedProjectFile,
    MalformedSolutionFile,
    RestoreFailed,
    BuildFailed,
    ArtifactNotFound,
    NoMatchingTestProject,
    TestExecutionFailed,
    RunnerCrashed,
    Io,
}

impl UiTestError {
    /// Returns the taxonomy category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            UiTestError::Configuration(_) => ErrorKind::Configuration,
            UiTestError::MalformedProjectFile { .. } => ErrorKind::MalformedProjectFile,
            UiTestError::MalformedSolutionFile { .. } => ErrorKind::MalformedSolutionFile,
            UiTestError::RestoreFailed { .. } => ErrorKind::RestoreFailed,
            UiTestError::BuildFailed { .. } => ErrorKind::BuildFailed,
            UiTestError::ArtifactNotFound { .. } => ErrorKind::ArtifactNotFound,
            UiTestError::NoMatchingTestProject(_) => ErrorKind::NoMatchingTestProject,
            UiTestError::TestExecutionFailed { .. } => ErrorKind::TestExecutionFailed,
            UiTestError::RunnerCrashed { .. } => ErrorKind::RunnerCrashed,
            UiTestError::Io(_) => ErrorKind::Io,
        }
    }

    /// Whether the pipeline may continue after this error.
    pub fn is_fatal(&self) -> bool {
        self.kind() != ErrorKind::RestoreFailed
    }
}

/// A project GUID, normalized to upper case without braces.
///
/// Solution files and project files disagree on casing and on whether the
/// braces are present, so identity comparisons always go through this type.
///
/// ```
/// use xamarin_uitest_sdk::ProjectId;
///
/// let a = ProjectId::parse("{1f2e3d4c-0000-4000-8000-00000000abcd}").unwrap();
/// let b = ProjectId::parse("1F2E3D4C-0000-4000-8000-00000000ABCD").unwrap();
/// assert_eq!(a, b);
/// assert_eq!(a.to_string(), "{1F2E3D4C-0000-4000-8000-00000000ABCD}");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectId(String);

impl ProjectId {
    /// Parses a GUID with or without surrounding braces.
    ///
    /// Returns `None` unless the value has the `8-4-4-4-12` hex layout.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        let inner = trimmed
            .strip_prefix('{')
            .and_then(|s| s.strip_suffix('}'))
            .unwrap_or(trimmed);

        let groups: Vec<&str> = inner.split('-').collect();
        let lengths = [8, 4, 4, 4, 12];
        if groups.len() != lengths.len() {
            return None;
        }
        let well_formed = groups
            .iter()
            .zip(lengths)
            .all(|(group, len)| group.len() == len && group.chars().all(|c| c.is_ascii_hexdigit()));
        if !well_formed {
            return None;
        }

        Some(Self(inner.to_ascii_uppercase()))
    }

    /// The GUID without braces.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}}}", self.0)
    }
}

/// Mobile platform a project targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetPlatform {
    /// Xamarin.Android
    Android,
    /// Xamarin.iOS
    Ios,
    /// Anything else (shared libraries, desktop, test assemblies)
    Other,
}

impl TargetPlatform {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetPlatform::Android => "android",
            TargetPlatform::Ios => "ios",
            TargetPlatform::Other => "other",
        }
    }
}

/// What a project produces when built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    /// An installable application package (`<AndroidApplication>true`).
    Package,
    /// A plain assembly (library, test assembly, or console executable).
    Assembly,
}

/// Test framework a project is written against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestFramework {
    /// `Xamarin.UITest` (runs against a deployed app)
    XamarinUiTest,
    /// Plain NUnit
    NUnit,
}

/// A (configuration, platform) pair, e.g. `Release` / `AnyCPU`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BuildSettings {
    pub configuration: String,
    pub platform: String,
}

impl BuildSettings {
    pub fn new(configuration: impl Into<String>, platform: impl Into<String>) -> Self {
        Self {
            configuration: configuration.into(),
            platform: platform.into(),
        }
    }

    /// The `Configuration|Platform` key used by solution and project files.
    pub fn key(&self) -> String {
        format!("{}|{}", self.configuration, self.platform)
    }

    /// Relative output directory: `bin/<platform>/<configuration>/`.
    pub fn output_dir(&self) -> PathBuf {
        PathBuf::from("bin")
            .join(&self.platform)
            .join(&self.configuration)
    }
}

impl fmt::Display for BuildSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.configuration, self.platform)
    }
}

/// Toolchain target selected for a build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BuildTarget {
    /// `PackageForAndroid`: produces the installable `.apk`.
    PackageForAndroid,
    /// `Build`: produces a library or test assembly.
    Build,
}

impl BuildTarget {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildTarget::PackageForAndroid => "PackageForAndroid",
            BuildTarget::Build => "Build",
        }
    }

    /// File extension of the artifact this target produces.
    pub fn artifact_extension(&self) -> &'static str {
        match self {
            BuildTarget::PackageForAndroid => "apk",
            BuildTarget::Build => "dll",
        }
    }
}

/// Classification of a located build artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// Installable application package for the platform under test.
    AppPackage,
    /// Assembly containing UI tests.
    TestAssembly,
    /// Anything else that was built along the way.
    Other,
}

/// What one successful build produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildOutput {
    /// Identity of the built project.
    pub project_id: ProjectId,
    /// Display name of the built project.
    pub project_name: String,
    /// Absolute output directory handed to the toolchain.
    pub output_dir: PathBuf,
    /// Classification of the artifact.
    pub kind: ArtifactKind,
    /// Canonical path of the located artifact.
    pub artifact: PathBuf,
}

impl BuildOutput {
    pub fn is_app_package(&self) -> bool {
        self.kind == ArtifactKind::AppPackage
    }

    pub fn is_test_assembly(&self) -> bool {
        self.kind == ArtifactKind::TestAssembly
    }
}

/// Which executable drives clean/build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildTool {
    #[default]
    Xbuild,
    Msbuild,
    /// Xamarin Studio's command line builder. Takes `-c:`/`-t:` switches and
    /// builds into the project's own `OutputPath`.
    Mdtool,
}

impl BuildTool {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildTool::Xbuild => "xbuild",
            BuildTool::Msbuild => "msbuild",
            BuildTool::Mdtool => "mdtool",
        }
    }
}

/// Paths of every external executable the step invokes.
///
/// Created once per run and passed into each component's constructor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolPaths {
    pub build_tool: BuildTool,
    pub xbuild: PathBuf,
    pub msbuild: PathBuf,
    pub mdtool: PathBuf,
    pub nuget: PathBuf,
    pub mono: PathBuf,
    /// `nunit3-console.exe` (or the legacy `nunit-console.exe`).
    pub nunit_console: Option<PathBuf>,
}

/// Default Mono installation prefix on macOS build machines.
pub const MONO_BIN_DIR: &str = "/Library/Frameworks/Mono.framework/Versions/Current/bin";

/// Default `mdtool` location inside a Xamarin Studio installation.
pub const MDTOOL_PATH: &str = "/Applications/Xamarin Studio.app/Contents/MacOS/mdtool";

impl Default for ToolPaths {
    fn default() -> Self {
        let mono_bin = PathBuf::from(MONO_BIN_DIR);
        Self {
            build_tool: BuildTool::default(),
            xbuild: mono_bin.join("xbuild"),
            msbuild: mono_bin.join("msbuild"),
            mdtool: PathBuf::from(MDTOOL_PATH),
            nuget: mono_bin.join("nuget"),
            mono: mono_bin.join("mono"),
            nunit_console: None,
        }
    }
}

impl ToolPaths {
    /// Path of the selected build executable.
    pub fn build_executable(&self) -> &PathBuf {
        match self.build_tool {
            BuildTool::Xbuild => &self.xbuild,
            BuildTool::Msbuild => &self.msbuild,
            BuildTool::Mdtool => &self.mdtool,
        }
    }
}

/// Per-invocation timeouts for external processes. `None` waits forever.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Timeouts {
    pub restore: Option<Duration>,
    pub build: Option<Duration>,
    pub test: Option<Duration>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_id_normalizes_case_and_braces() {
        let a = ProjectId::parse("{ab12cd34-ef56-7890-abcd-ef1234567890}").unwrap();
        let b = ProjectId::parse(" AB12CD34-EF56-7890-ABCD-EF1234567890 ").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "AB12CD34-EF56-7890-ABCD-EF1234567890");
    }

    #[test]
    fn test_project_id_rejects_malformed() {
        assert!(ProjectId::parse("").is_none());
        assert!(ProjectId::parse("{not-a-guid}").is_none());
        assert!(ProjectId::parse("AB12CD34-EF56-7890-ABCD-EF12345678").is_none());
        assert!(ProjectId::parse("ZZ12CD34-EF56-7890-ABCD-EF1234567890").is_none());
    }

    #[test]
    fn test_build_settings_output_dir() {
        let settings = BuildSettings::new("Release", "AnyCPU");
        assert_eq!(settings.output_dir(), PathBuf::from("bin/AnyCPU/Release"));
        assert_eq!(settings.key(), "Release|AnyCPU");
    }

    #[test]
    fn test_restore_failed_is_not_fatal() {
        let err = UiTestError::RestoreFailed {
            solution: PathBuf::from("App.sln"),
            reason: "exit 1".into(),
        };
        assert_eq!(err.kind(), ErrorKind::RestoreFailed);
        assert!(!err.is_fatal());

        let err = UiTestError::NoMatchingTestProject("App".into());
        assert!(err.is_fatal());
    }

    #[test]
    fn test_build_target_extensions() {
        assert_eq!(BuildTarget::PackageForAndroid.artifact_extension(), "apk");
        assert_eq!(BuildTarget::Build.artifact_extension(), "dll");
        assert_eq!(BuildTarget::PackageForAndroid.as_str(), "PackageForAndroid");
    }
}
