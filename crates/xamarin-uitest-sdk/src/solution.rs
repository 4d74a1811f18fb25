//! Solution file (`.sln`) scanning.
//!
//! The solution format has no published grammar, so it is scanned line by
//! line: `Project(...)` declarations for members, and the
//! `SolutionConfigurationPlatforms` / `ProjectConfigurationPlatforms` global
//! sections for per-configuration build settings.
//!
//! ```text
//! Project("{FAE04EC0-301F-11D3-BF4B-00C04F79EFBC}") = "Droid", "Droid\Droid.csproj", "{1A2B...}"
//! EndProject
//! Global
//!     GlobalSection(ProjectConfigurationPlatforms) = postSolution
//!         {1A2B...}.Release|Any CPU.ActiveCfg = Release|Any CPU
//!         {1A2B...}.Release|Any CPU.Build.0 = Release|Any CPU
//!     EndGlobalSection
//! EndGlobal
//! ```

use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use walkdir::WalkDir;

use crate::builders::common::{absolute_path, host_path, normalize_path};
use crate::types::{BuildSettings, ProjectId, UiTestError};

/// Type GUID of solution folders (virtual entries with no project file).
pub const SOLUTION_FOLDER_TYPE: &str = "2150E333-8FDC-42A3-9474-1A3956D46DE8";

static PROJECT_DECLARATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"^\s*Project\(\s*"(?P<type>[^"]*)"\s*\)\s*=\s*"(?P<name>[^"]*)"\s*,\s*"(?P<path>[^"]*)"\s*,\s*"(?P<guid>[^"]*)""#,
    )
    .expect("project declaration pattern is valid")
});

/// Directories never searched when looking for solution files.
const SKIPPED_DIRS: [&str; 5] = ["bin", "obj", "packages", "node_modules", ".git"];

/// One `Project(...)` declaration of a solution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SolutionProject {
    pub name: String,
    /// Absolute path, resolved against the solution's directory.
    pub path: PathBuf,
    pub id: ProjectId,
    pub type_id: Option<ProjectId>,
}

impl SolutionProject {
    /// Whether this entry is a buildable C# project (not a solution folder).
    pub fn is_csproj(&self) -> bool {
        let is_folder = self
            .type_id
            .as_ref()
            .is_some_and(|t| t.as_str() == SOLUTION_FOLDER_TYPE);
        !is_folder
            && self
                .path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("csproj"))
    }
}

/// Project build settings selected by one solution configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectBuildSettings {
    pub settings: BuildSettings,
    /// Whether the project is checked for building (`.Build.0`).
    pub build: bool,
}

/// Parsed solution file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SolutionDescriptor {
    pub path: PathBuf,
    /// Member declarations in file order.
    pub projects: Vec<SolutionProject>,
    /// Solution-wide configuration names (`Release|Any CPU`) in file order.
    pub configurations: Vec<String>,
    /// Solution configuration name → project → settings.
    pub project_settings: BTreeMap<String, BTreeMap<ProjectId, ProjectBuildSettings>>,
}

#[derive(Clone, Copy)]
enum Section {
    None,
    SolutionConfigurations,
    ProjectConfigurations,
}

impl SolutionDescriptor {
    /// Reads and scans the solution file at `path`.
    ///
    /// A solution without any project declaration parses successfully; use
    /// [`SolutionDescriptor::require_projects`] when at least one is expected.
    pub fn parse(path: &Path) -> Result<Self, UiTestError> {
        let absolute = absolute_path(path)?;
        let content = std::fs::read_to_string(&absolute).map_err(|e| {
            UiTestError::MalformedSolutionFile {
                path: absolute.clone(),
                reason: format!("cannot read file: {}", e),
            }
        })?;
        Self::from_content(&content, &absolute)
    }

    /// Scans solution text already read from the absolute `path`.
    pub fn from_content(content: &str, path: &Path) -> Result<Self, UiTestError> {
        let solution_dir = path.parent().unwrap_or(Path::new("/"));
        let mut solution = Self {
            path: path.to_path_buf(),
            projects: Vec::new(),
            configurations: Vec::new(),
            project_settings: BTreeMap::new(),
        };

        let mut section = Section::None;
        for (index, line) in content.lines().enumerate() {
            let trimmed = line.trim().trim_start_matches('\u{feff}');

            if let Some(caps) = PROJECT_DECLARATION.captures(trimmed) {
                let id = ProjectId::parse(&caps["guid"]).ok_or_else(|| {
                    UiTestError::MalformedSolutionFile {
                        path: path.to_path_buf(),
                        reason: format!(
                            "line {}: project GUID is not a GUID: {}",
                            index + 1,
                            &caps["guid"]
                        ),
                    }
                })?;
                solution.projects.push(SolutionProject {
                    name: caps["name"].trim().to_string(),
                    path: normalize_path(&solution_dir.join(host_path(&caps["path"]))),
                    id,
                    type_id: ProjectId::parse(&caps["type"]),
                });
                continue;
            }

            if trimmed.starts_with("GlobalSection(SolutionConfigurationPlatforms)") {
                section = Section::SolutionConfigurations;
                continue;
            }
            if trimmed.starts_with("GlobalSection(ProjectConfigurationPlatforms)") {
                section = Section::ProjectConfigurations;
                continue;
            }
            if trimmed.starts_with("EndGlobalSection") {
                section = Section::None;
                continue;
            }

            match section {
                Section::None => {}
                Section::SolutionConfigurations => {
                    if let Some((name, _)) = trimmed.split_once('=') {
                        let name = name.trim().to_string();
                        if !name.is_empty() && !solution.configurations.contains(&name) {
                            solution.configurations.push(name);
                        }
                    }
                }
                Section::ProjectConfigurations => solution.add_project_setting(trimmed),
            }
        }

        Ok(solution)
    }

    /// Parses `{GUID}.<solution cfg>.ActiveCfg = <cfg>|<platform>` and `.Build.0` lines.
    fn add_project_setting(&mut self, line: &str) {
        let Some((lhs, rhs)) = line.split_once('=') else {
            return;
        };
        let Some((guid, rest)) = lhs.trim().split_once('.') else {
            return;
        };
        let Some(id) = ProjectId::parse(guid) else {
            return;
        };

        let (solution_config, is_build) = if let Some(cfg) = rest.strip_suffix(".Build.0") {
            (cfg, true)
        } else if let Some(cfg) = rest.strip_suffix(".ActiveCfg") {
            (cfg, false)
        } else {
            return;
        };

        let Some((configuration, platform)) = rhs.trim().split_once('|') else {
            return;
        };
        // MSBuild passes the solution's "Any CPU" to projects as "AnyCPU".
        let platform = if platform.trim().eq_ignore_ascii_case("Any CPU") {
            "AnyCPU"
        } else {
            platform.trim()
        };

        let entry = self
            .project_settings
            .entry(solution_config.trim().to_string())
            .or_default()
            .entry(id)
            .or_insert_with(|| ProjectBuildSettings {
                settings: BuildSettings::new(configuration.trim(), platform),
                build: false,
            });
        if is_build {
            entry.build = true;
        } else {
            entry.settings = BuildSettings::new(configuration.trim(), platform);
        }
    }

    /// Fails with [`UiTestError::MalformedSolutionFile`] if no project is declared.
    pub fn require_projects(self) -> Result<Self, UiTestError> {
        if self.projects.is_empty() {
            return Err(UiTestError::MalformedSolutionFile {
                path: self.path,
                reason: "no Project(...) declarations found".to_string(),
            });
        }
        Ok(self)
    }

    /// Buildable C# member projects.
    pub fn csprojs(&self) -> impl Iterator<Item = &SolutionProject> {
        self.projects.iter().filter(|p| p.is_csproj())
    }

    /// Build settings of `id` under the solution configuration `solution_settings`.
    ///
    /// Matching is exact first, then ignoring case and spaces, so `Release|AnyCPU`
    /// finds the `Release|Any CPU` section. Returns `None` if the solution does
    /// not map the project for that configuration.
    pub fn project_settings_for(
        &self,
        id: &ProjectId,
        solution_settings: &BuildSettings,
    ) -> Option<&ProjectBuildSettings> {
        let key = solution_settings.key();
        let squash = |s: &str| s.replace(' ', "").to_ascii_lowercase();
        let projects = self.project_settings.get(&key).or_else(|| {
            self.project_settings
                .iter()
                .find(|(name, _)| squash(name) == squash(&key))
                .map(|(_, projects)| projects)
        })?;
        projects.get(id)
    }

    pub fn directory(&self) -> &Path {
        self.path.parent().unwrap_or(Path::new("/"))
    }
}

/// Finds every solution that references the project at `project_path`.
///
/// The search root is the parent of the project's directory; every `.sln`
/// below it (outside `bin`/`obj`/`packages`) is scanned for a declaration
/// whose file name matches the project's. The result is a sorted set: it may
/// hold several solutions, or none. Unreadable solutions are skipped with a
/// warning.
pub fn related_solutions(project_path: &Path) -> Result<Vec<PathBuf>, UiTestError> {
    let project_path = absolute_path(project_path)?;
    let Some(project_name) = project_path.file_name().map(|n| n.to_string_lossy().into_owned())
    else {
        return Ok(Vec::new());
    };
    let project_dir = project_path.parent().unwrap_or(Path::new("/"));
    let search_root = project_dir.parent().unwrap_or(project_dir);

    let mut related = Vec::new();
    for solution_path in find_solution_files(search_root) {
        let solution = match SolutionDescriptor::parse(&solution_path) {
            Ok(solution) => solution,
            Err(e) => {
                tracing::warn!("Skipping solution {:?}: {}", solution_path, e);
                continue;
            }
        };
        let references_project = solution.projects.iter().any(|p| {
            p.path
                .file_name()
                .is_some_and(|n| n.to_string_lossy().eq_ignore_ascii_case(&project_name))
        });
        if references_project && !related.contains(&solution.path) {
            related.push(solution.path);
        }
    }

    related.sort();
    Ok(related)
}

fn find_solution_files(root: &Path) -> Vec<PathBuf> {
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            let name = entry.file_name().to_string_lossy();
            entry.depth() == 0
                || !entry.file_type().is_dir()
                || !SKIPPED_DIRS.iter().any(|skipped| name == *skipped)
        })
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry
                .path()
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("sln"))
        })
        .map(|entry| entry.into_path())
        .collect()
}
