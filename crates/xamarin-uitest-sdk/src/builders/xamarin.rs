//! Xamarin build automation
//!
//! This module drives `xbuild`/`msbuild` (or Xamarin Studio's `mdtool`) to
//! clean and build Xamarin projects and locates the artifacts they produce.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;

use walkdir::WalkDir;

use super::common::{find_first_artifact, printable_command, run_command};
use crate::project::ProjectDescriptor;
use crate::types::{
    ArtifactKind, BuildOutput, BuildSettings, BuildTarget, BuildTool, OutputKind, ProjectId,
    TargetPlatform, Timeouts, ToolPaths, UiTestError,
};

/// Xamarin builder that handles clean, build and artifact discovery
pub struct XamarinBuilder {
    build_tool: BuildTool,
    /// Build executable (xbuild, msbuild or mdtool)
    tool: PathBuf,
    timeouts: Timeouts,
    /// Whether to pass verbose logging flags to the toolchain
    verbose: bool,
    /// Log commands without running them
    dry_run: bool,
}

impl XamarinBuilder {
    /// Creates a new builder using the build tool selected in `tools`
    pub fn new(tools: &ToolPaths, timeouts: Timeouts) -> Self {
        Self {
            build_tool: tools.build_tool,
            tool: tools.build_executable().clone(),
            timeouts,
            verbose: false,
            dry_run: false,
        }
    }

    /// Enables verbose toolchain output
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Logs commands instead of running them
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Absolute output directory: `<project dir>/bin/<platform>/<configuration>/`
    pub fn output_dir(project: &ProjectDescriptor, settings: &BuildSettings) -> PathBuf {
        project.directory().join(settings.output_dir())
    }

    /// Directory scanned for the artifact of `project`.
    ///
    /// `mdtool` cannot redirect `OutputPath`, so its artifacts are looked up
    /// anywhere under the project's `bin/`.
    pub fn artifact_dir(&self, project: &ProjectDescriptor, settings: &BuildSettings) -> PathBuf {
        match self.build_tool {
            BuildTool::Mdtool => project.directory().join("bin"),
            BuildTool::Xbuild | BuildTool::Msbuild => Self::output_dir(project, settings),
        }
    }

    fn base_command(&self, project: &ProjectDescriptor, target: &str, settings: &BuildSettings) -> Command {
        if self.build_tool == BuildTool::Mdtool {
            return self.mdtool_command(project, target, settings);
        }

        let output_path = format!(
            "{}{}",
            settings.output_dir().display(),
            std::path::MAIN_SEPARATOR
        );

        let mut cmd = Command::new(&self.tool);
        cmd.arg(&project.path)
            .arg(format!("/t:{}", target))
            .arg(format!("/p:Configuration={}", settings.configuration))
            .arg(format!("/p:Platform={}", settings.platform))
            .arg(format!("/p:OutputPath={}", output_path));
        if self.verbose {
            cmd.arg("/verbosity:detailed");
        }
        cmd.current_dir(project.directory());
        cmd
    }

    /// `mdtool build -c:<configuration>|<platform> -t:<target> <project>`
    fn mdtool_command(&self, project: &ProjectDescriptor, target: &str, settings: &BuildSettings) -> Command {
        let mut cmd = Command::new(&self.tool);
        cmd.arg("build")
            .arg(format!("-c:{}", settings.key()))
            .arg(format!("-t:{}", target))
            .arg(&project.path);
        cmd.current_dir(project.directory());
        cmd
    }

    /// The clean command for `project`
    pub fn clean_command(&self, project: &ProjectDescriptor, settings: &BuildSettings) -> Command {
        self.base_command(project, "Clean", settings)
    }

    /// The build command for `project` and `target`
    pub fn build_command(
        &self,
        project: &ProjectDescriptor,
        settings: &BuildSettings,
        target: BuildTarget,
    ) -> Command {
        self.base_command(project, target.as_str(), settings)
    }

    /// Cleans the project's build output
    ///
    /// # Returns
    ///
    /// * `Ok(())` if the toolchain exits with status 0
    /// * `Err(UiTestError::BuildFailed)` otherwise
    pub fn clean(&self, project: &ProjectDescriptor, settings: &BuildSettings) -> Result<(), UiTestError> {
        let cmd = self.clean_command(project, settings);
        self.execute(cmd, project, "clean")
    }

    /// Builds the project and locates its artifact
    ///
    /// This performs the following steps:
    /// 1. Run the toolchain with `target` into `bin/<platform>/<configuration>/`
    /// 2. Scan that directory for the first `*.apk` (packaging) or `*.dll` (plain build)
    ///
    /// # Returns
    ///
    /// * `Ok(BuildOutput)` containing the canonical artifact path
    /// * `Err(UiTestError::BuildFailed)` if the toolchain fails
    /// * `Err(UiTestError::ArtifactNotFound)` if it succeeds without producing the artifact
    pub fn build(
        &self,
        project: &ProjectDescriptor,
        settings: &BuildSettings,
        target: BuildTarget,
    ) -> Result<BuildOutput, UiTestError> {
        let cmd = self.build_command(project, settings, target);
        self.execute(cmd, project, "build")?;

        let output_dir = self.artifact_dir(project, settings);
        let extension = target.artifact_extension();
        let artifact = if self.dry_run {
            output_dir.join(format!("{}.{}", project.assembly_name, extension))
        } else {
            locate_artifact(&output_dir, extension, &project.assembly_name)?
        };

        let kind = if target == BuildTarget::PackageForAndroid {
            ArtifactKind::AppPackage
        } else if project.is_test() {
            ArtifactKind::TestAssembly
        } else {
            ArtifactKind::Other
        };

        tracing::info!("  (i) {} path: {}", extension, artifact.display());
        Ok(BuildOutput {
            project_id: project.id.clone(),
            project_name: project.name.clone(),
            output_dir,
            kind,
            artifact,
        })
    }

    /// Builds every project in one pass, keyed by project identity.
    ///
    /// Each project is built with its own `settings`. Android application
    /// packages use `PackageForAndroid`; everything else a plain `Build`.
    /// The first failure aborts the pass.
    pub fn build_all(
        &self,
        projects: &[ProjectDescriptor],
        platform: TargetPlatform,
    ) -> Result<BTreeMap<ProjectId, BuildOutput>, UiTestError> {
        let mut outputs = BTreeMap::new();
        for project in projects {
            if outputs.contains_key(&project.id) {
                continue;
            }
            let target = Self::target_for(project, platform);
            if project.is_test() {
                tracing::info!("Building test project: {}", project.name);
            } else {
                tracing::info!("Building project: {}", project.name);
            }
            let output = self.build(project, &project.settings, target)?;
            outputs.insert(project.id.clone(), output);
        }
        Ok(outputs)
    }

    /// Toolchain target for `project` when testing on `platform`
    pub fn target_for(project: &ProjectDescriptor, platform: TargetPlatform) -> BuildTarget {
        if platform == TargetPlatform::Android
            && project.platform == TargetPlatform::Android
            && project.output_kind == OutputKind::Package
        {
            BuildTarget::PackageForAndroid
        } else {
            BuildTarget::Build
        }
    }

    fn execute(&self, cmd: Command, project: &ProjectDescriptor, action: &str) -> Result<(), UiTestError> {
        tracing::info!("$ {}", printable_command(&cmd));
        if self.dry_run {
            return Ok(());
        }

        let description = format!("{} {}", self.tool_name(), action);
        run_command(cmd, &description, self.timeouts.build)
            .map(|_| ())
            .map_err(|reason| UiTestError::BuildFailed {
                project: project.path.clone(),
                reason,
            })
    }

    fn tool_name(&self) -> String {
        self.tool
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "build tool".to_string())
    }
}

/// Finds the artifact of a build.
///
/// An assembly named after the project wins over other files with the same
/// extension (test output directories also hold the test framework's
/// assemblies), at the top of `output_dir` first, then anywhere below it.
/// Otherwise the first match in search order is used.
fn locate_artifact(output_dir: &Path, extension: &str, assembly_name: &str) -> Result<PathBuf, UiTestError> {
    let file_name = format!("{}.{}", assembly_name, extension);
    let preferred = output_dir.join(&file_name);
    if preferred.is_file() {
        return preferred.canonicalize().map_err(UiTestError::from);
    }
    let nested = WalkDir::new(output_dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .find(|entry| {
            entry.file_type().is_file() && entry.file_name() == std::ffi::OsStr::new(&file_name)
        });
    if let Some(entry) = nested {
        return entry.path().canonicalize().map_err(UiTestError::from);
    }
    find_first_artifact(output_dir, extension)
}
