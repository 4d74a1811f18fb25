//! Configuration file support for xamarin-uitest.
//!
//! Step inputs are resolved once per run into a [`StepConfig`], highest
//! precedence first:
//!
//! 1. CLI flags
//! 2. Environment variables (Bitrise step inputs, see [`crate::Cli`])
//! 3. `xamarin-uitest.toml`, searched from the source directory (or the
//!    current directory) up to the repository root
//! 4. Built-in defaults
//!
//! ## Example Configuration
//!
//! ```toml
//! [tools]
//! nuget = "/usr/local/bin/nuget"
//! nunit_console = "/opt/nunit/nunit3-console.exe"
//! envman = "envman"
//!
//! [build]
//! tool = "msbuild"
//! configuration = "Release"
//! platform = "AnyCPU"
//! clean = true
//!
//! [timeouts]
//! restore_secs = 600
//! build_secs = 1800
//! test_secs = 3600
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use xamarin_uitest_sdk::{BuildSettings, BuildTool, RESULT_LOG_NAME, Timeouts, ToolPaths, UiTestError};

use crate::Cli;

/// The default configuration file name.
pub const CONFIG_FILE_NAME: &str = "xamarin-uitest.toml";

/// File name of the JSON run summary.
pub const SUMMARY_FILE_NAME: &str = "xamarin-uitest-summary.json";

pub const DEFAULT_CONFIGURATION: &str = "Release";
pub const DEFAULT_PLATFORM: &str = "AnyCPU";

/// Root structure of `xamarin-uitest.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StepConfigFile {
    /// Executable paths.
    pub tools: ToolsConfig,

    /// Build defaults.
    pub build: BuildConfig,

    /// Per-invocation timeouts.
    pub timeouts: TimeoutsConfig,
}

/// `[tools]` section. Unset entries fall back to the Mono installation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub xbuild: Option<PathBuf>,
    pub msbuild: Option<PathBuf>,
    pub mdtool: Option<PathBuf>,
    pub nuget: Option<PathBuf>,
    pub mono: Option<PathBuf>,
    pub nunit_console: Option<PathBuf>,
    pub envman: Option<PathBuf>,
}

/// `[build]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    pub tool: Option<BuildTool>,
    pub configuration: Option<String>,
    pub platform: Option<String>,
    pub clean: Option<bool>,
}

/// `[timeouts]` section, in seconds. `0` disables the timeout.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutsConfig {
    pub restore_secs: Option<u64>,
    pub build_secs: Option<u64>,
    pub test_secs: Option<u64>,
}

impl StepConfigFile {
    /// Loads configuration from the specified file path.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config: StepConfigFile = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        Ok(config)
    }

    /// Searches for `xamarin-uitest.toml` from `start_dir` upwards.
    ///
    /// The search stops at the first directory containing `.git`, or at the
    /// file system root.
    ///
    /// # Returns
    ///
    /// * `Ok(Some((config, path)))` - Found and loaded configuration with its path
    /// * `Ok(None)` - No configuration file found
    /// * `Err` - If a config file was found but couldn't be parsed
    pub fn discover_from(start_dir: &Path) -> Result<Option<(Self, PathBuf)>> {
        let mut current = start_dir.to_path_buf();

        loop {
            let config_path = current.join(CONFIG_FILE_NAME);

            if config_path.is_file() {
                let config = Self::load_from_file(&config_path)?;
                return Ok(Some((config, config_path)));
            }

            if current.join(".git").exists() || !current.pop() {
                break;
            }
        }

        Ok(None)
    }
}

/// Merges config file values with CLI arguments.
///
/// CLI arguments always take precedence over config file values.
#[derive(Debug, Default)]
pub struct ConfigResolver {
    /// Loaded configuration, if any.
    pub config: Option<StepConfigFile>,

    /// Path to the loaded config file, if any.
    pub config_path: Option<PathBuf>,
}

impl ConfigResolver {
    /// Discovers and loads configuration starting at `start_dir`.
    pub fn discover_from(start_dir: &Path) -> Result<Self> {
        Ok(match StepConfigFile::discover_from(start_dir)? {
            Some((config, path)) => Self {
                config: Some(config),
                config_path: Some(path),
            },
            None => Self::default(),
        })
    }

    /// Resolves a CLI value, using config as fallback, then `default`.
    pub fn resolve<T, F>(&self, cli_value: Option<T>, config_getter: F, default: T) -> T
    where
        F: FnOnce(&StepConfigFile) -> Option<T>,
    {
        cli_value
            .or_else(|| self.config.as_ref().and_then(config_getter))
            .unwrap_or(default)
    }

    /// Like [`ConfigResolver::resolve`] without a default.
    pub fn resolve_opt<T, F>(&self, cli_value: Option<T>, config_getter: F) -> Option<T>
    where
        F: FnOnce(&StepConfigFile) -> Option<T>,
    {
        cli_value.or_else(|| self.config.as_ref().and_then(config_getter))
    }
}

/// Parses a boolean step input.
///
/// `true`, `t`, `yes`, `y`, `1` (any case) are true; `false`, `f`, `no`,
/// `n`, `0`, the empty string and an absent value are false.
///
/// ```
/// use xamarin_uitest::config::parse_bool_flag;
///
/// assert!(parse_bool_flag(Some("YES")).unwrap());
/// assert!(!parse_bool_flag(None).unwrap());
/// assert!(parse_bool_flag(Some("maybe")).is_err());
/// ```
pub fn parse_bool_flag(raw: Option<&str>) -> Result<bool, UiTestError> {
    let Some(raw) = raw else {
        return Ok(false);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "t" | "yes" | "y" | "1" => Ok(true),
        "false" | "f" | "no" | "n" | "0" | "" => Ok(false),
        other => Err(UiTestError::Configuration(format!(
            "invalid boolean value {:?} (expected true/false, yes/no, t/f, y/n or 1/0)",
            other
        ))),
    }
}

/// Parses the `--build-tool` input.
pub fn parse_build_tool(raw: &str) -> Result<BuildTool, UiTestError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "xbuild" => Ok(BuildTool::Xbuild),
        "msbuild" => Ok(BuildTool::Msbuild),
        "mdtool" => Ok(BuildTool::Mdtool),
        other => Err(UiTestError::Configuration(format!(
            "unsupported build tool {:?} (expected xbuild, msbuild or mdtool)",
            other
        ))),
    }
}

/// What `-t/--test` selects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestSelection {
    /// An explicit UITest project file.
    Project(PathBuf),
    /// A test or fixture name handed to the runner.
    Filter(String),
}

impl TestSelection {
    /// A value naming an existing `.csproj` is a project; anything else a filter.
    pub fn classify(raw: &str) -> Self {
        let path = Path::new(raw.trim());
        let is_project = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("csproj"))
            && path.is_file();
        if is_project {
            TestSelection::Project(path.to_path_buf())
        } else {
            TestSelection::Filter(raw.trim().to_string())
        }
    }
}

/// Fully resolved inputs of one run. Read-only after construction.
#[derive(Debug, Clone)]
pub struct StepConfig {
    /// `.csproj` (project mode) or `.sln` (solution mode).
    pub project: PathBuf,
    pub test_project: Option<PathBuf>,
    pub test_filter: Option<String>,
    pub settings: BuildSettings,
    pub clean: bool,
    pub emulator_serial: String,
    pub tools: ToolPaths,
    pub envman: PathBuf,
    pub timeouts: Timeouts,
    /// Where the result log and the run summary are written.
    pub output_dir: PathBuf,
    pub verbose: bool,
    pub dry_run: bool,
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn non_empty_path(value: &Option<PathBuf>) -> Option<PathBuf> {
    value
        .as_ref()
        .filter(|p| !p.as_os_str().is_empty())
        .cloned()
}

fn timeout(secs: Option<u64>) -> Option<Duration> {
    secs.filter(|s| *s > 0).map(Duration::from_secs)
}

impl StepConfig {
    /// Resolves CLI arguments against the config file and defaults.
    ///
    /// # Errors
    ///
    /// [`UiTestError::Configuration`] for a missing required input, an
    /// unsupported project file, or an invalid boolean/build-tool value.
    pub fn resolve(cli: &Cli, resolver: &ConfigResolver, cwd: &Path) -> Result<Self, UiTestError> {
        let project = non_empty_path(&cli.project).ok_or_else(|| {
            UiTestError::Configuration("project not specified (-s/--project)".to_string())
        })?;
        let is_supported = project
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("csproj") || ext.eq_ignore_ascii_case("sln"));
        if !is_supported {
            return Err(UiTestError::Configuration(format!(
                "{:?} is neither a .csproj nor a .sln file",
                project
            )));
        }
        if !project.is_file() {
            return Err(UiTestError::Configuration(format!(
                "project file {:?} does not exist",
                project
            )));
        }

        let emulator_serial = non_empty(&cli.emulator).ok_or_else(|| {
            UiTestError::Configuration("emulator serial not specified (-e/--emulator)".to_string())
        })?;

        let (test_project, test_filter) = match non_empty(&cli.test).map(|t| TestSelection::classify(&t)) {
            Some(TestSelection::Project(path)) => (Some(path), None),
            Some(TestSelection::Filter(filter)) => (None, Some(filter)),
            None => (None, None),
        };

        let clean = match non_empty(&cli.clean) {
            Some(raw) => parse_bool_flag(Some(&raw))?,
            None => resolver.resolve(None, |c| c.build.clean, true),
        };

        let cli_tool = non_empty(&cli.build_tool)
            .map(|raw| parse_build_tool(&raw))
            .transpose()?;
        let build_tool = resolver.resolve(cli_tool, |c| c.build.tool, BuildTool::default());

        let settings = BuildSettings::new(
            resolver.resolve(
                non_empty(&cli.configuration),
                |c| c.build.configuration.clone(),
                DEFAULT_CONFIGURATION.to_string(),
            ),
            resolver.resolve(
                non_empty(&cli.platform),
                |c| c.build.platform.clone(),
                DEFAULT_PLATFORM.to_string(),
            ),
        );

        let defaults = ToolPaths::default();
        let nunit_console = resolver
            .resolve_opt(non_empty_path(&cli.nunit), |c| c.tools.nunit_console.clone())
            .ok_or_else(|| {
                UiTestError::Configuration(
                    "NUnit console path not specified (-n/--nunit or NUNIT_PATH)".to_string(),
                )
            })?;
        let tools = ToolPaths {
            build_tool,
            xbuild: resolver.resolve(None, |c| c.tools.xbuild.clone(), defaults.xbuild),
            msbuild: resolver.resolve(None, |c| c.tools.msbuild.clone(), defaults.msbuild),
            mdtool: resolver.resolve(None, |c| c.tools.mdtool.clone(), defaults.mdtool),
            nuget: resolver.resolve(None, |c| c.tools.nuget.clone(), defaults.nuget),
            mono: resolver.resolve(None, |c| c.tools.mono.clone(), defaults.mono),
            nunit_console: Some(nunit_console),
        };
        let envman = resolver.resolve(None, |c| c.tools.envman.clone(), PathBuf::from("envman"));

        let timeouts = Timeouts {
            restore: timeout(resolver.resolve_opt(cli.timeout_secs, |c| c.timeouts.restore_secs)),
            build: timeout(resolver.resolve_opt(cli.timeout_secs, |c| c.timeouts.build_secs)),
            test: timeout(resolver.resolve_opt(cli.timeout_secs, |c| c.timeouts.test_secs)),
        };

        let output_dir = non_empty_path(&cli.deploy_dir)
            .or_else(|| non_empty_path(&cli.source_dir))
            .unwrap_or_else(|| cwd.to_path_buf());

        Ok(Self {
            project,
            test_project,
            test_filter,
            settings,
            clean,
            emulator_serial,
            tools,
            envman,
            timeouts,
            output_dir,
            verbose: cli.verbose,
            dry_run: cli.dry_run,
        })
    }

    /// `<output dir>/TestResult.xml`
    pub fn result_log(&self) -> PathBuf {
        self.output_dir.join(RESULT_LOG_NAME)
    }

    /// `<output dir>/xamarin-uitest-summary.json`
    pub fn summary_path(&self) -> PathBuf {
        self.output_dir.join(SUMMARY_FILE_NAME)
    }

    /// Whether `project` names a solution rather than a single project.
    pub fn is_solution_mode(&self) -> bool {
        self.project
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("sln"))
    }

    /// Logs the resolved configuration.
    pub fn log(&self) {
        tracing::info!("========== Configs ==========");
        tracing::info!(" * project: {}", self.project.display());
        if let Some(test_project) = &self.test_project {
            tracing::info!(" * test_project: {}", test_project.display());
        }
        if let Some(filter) = &self.test_filter {
            tracing::info!(" * test_filter: {}", filter);
        }
        tracing::info!(" * configuration: {}", self.settings);
        tracing::info!(" * clean_build: {}", self.clean);
        tracing::info!(" * emulator_serial: {}", self.emulator_serial);
        tracing::info!(" * build_tool: {}", self.tools.build_tool.as_str());
        tracing::info!(" * output_dir: {}", self.output_dir.display());
        if self.dry_run {
            tracing::info!(" * dry_run: true");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use tempfile::TempDir;

    fn cli(args: &[&str]) -> Cli {
        let mut argv = vec!["xamarin-uitest"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    fn project_file(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, "<Project />").unwrap();
        path
    }

    #[test]
    fn test_parse_bool_flag() {
        for raw in ["true", "T", "Yes", "y", "1"] {
            assert!(parse_bool_flag(Some(raw)).unwrap(), "{raw}");
        }
        for raw in ["false", "F", "NO", "n", "0", ""] {
            assert!(!parse_bool_flag(Some(raw)).unwrap(), "{raw}");
        }
        assert!(!parse_bool_flag(None).unwrap());

        let err = parse_bool_flag(Some("sometimes")).unwrap_err();
        assert!(matches!(err, UiTestError::Configuration(_)));
    }

    #[test]
    fn test_parse_build_tool() {
        assert_eq!(parse_build_tool("MSBuild").unwrap(), BuildTool::Msbuild);
        assert_eq!(parse_build_tool("xbuild").unwrap(), BuildTool::Xbuild);
        assert_eq!(parse_build_tool(" mdtool ").unwrap(), BuildTool::Mdtool);
        assert!(parse_build_tool("dotnet").is_err());
    }

    #[test]
    fn test_classify_test_selection() {
        let temp_dir = TempDir::new().unwrap();
        let test_project = project_file(temp_dir.path(), "UITests.csproj");

        assert_eq!(
            TestSelection::classify(test_project.to_str().unwrap()),
            TestSelection::Project(test_project.clone())
        );
        assert_eq!(
            TestSelection::classify("UITests.Tests.Login"),
            TestSelection::Filter("UITests.Tests.Login".to_string())
        );
        // A missing project file is treated as a filter.
        assert!(matches!(
            TestSelection::classify("/nonexistent/UITests.csproj"),
            TestSelection::Filter(_)
        ));
    }

    #[test]
    fn test_resolve_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let project = project_file(temp_dir.path(), "Droid.csproj");

        let cli = cli(&[
            "-s",
            project.to_str().unwrap(),
            "-e",
            "emulator-5554",
            "-n",
            "/opt/nunit/nunit3-console.exe",
            "--deploy-dir",
            "/deploy",
        ]);
        let config = StepConfig::resolve(&cli, &ConfigResolver::default(), temp_dir.path()).unwrap();

        assert!(config.clean);
        assert_eq!(config.settings, BuildSettings::new("Release", "AnyCPU"));
        assert_eq!(config.tools.build_tool, BuildTool::Xbuild);
        assert_eq!(config.timeouts, Timeouts::default());
        assert_eq!(config.result_log(), PathBuf::from("/deploy/TestResult.xml"));
        assert!(!config.is_solution_mode());
    }

    #[test]
    fn test_resolve_missing_inputs() {
        let temp_dir = TempDir::new().unwrap();
        let project = project_file(temp_dir.path(), "Droid.csproj");
        let resolver = ConfigResolver::default();

        let err = StepConfig::resolve(&cli(&["-e", "emulator-5554"]), &resolver, temp_dir.path())
            .unwrap_err();
        assert!(err.to_string().contains("project not specified"));

        let err = StepConfig::resolve(
            &cli(&["-s", project.to_str().unwrap(), "-n", "nunit.exe"]),
            &resolver,
            temp_dir.path(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("emulator"));

        let err = StepConfig::resolve(
            &cli(&["-s", project.to_str().unwrap(), "-e", "emulator-5554", "-n", "nunit.exe", "-i", "perhaps"]),
            &resolver,
            temp_dir.path(),
        )
        .unwrap_err();
        assert!(matches!(err, UiTestError::Configuration(_)));
    }

    #[test]
    fn test_resolve_rejects_unknown_project_type() {
        let temp_dir = TempDir::new().unwrap();
        let project = project_file(temp_dir.path(), "Droid.fsproj");
        let err = StepConfig::resolve(
            &cli(&["-s", project.to_str().unwrap(), "-e", "emulator-5554", "-n", "nunit.exe"]),
            &ConfigResolver::default(),
            temp_dir.path(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("neither a .csproj nor a .sln"));
    }

    #[test]
    fn test_load_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(
            &config_path,
            r#"
[tools]
nuget = "/usr/local/bin/nuget"
nunit_console = "/opt/nunit/nunit3-console.exe"
mdtool = "/opt/xs/mdtool"

[build]
tool = "msbuild"
configuration = "Debug"
clean = false

[timeouts]
build_secs = 1800
test_secs = 0
"#,
        )
        .unwrap();

        let config = StepConfigFile::load_from_file(&config_path).unwrap();
        assert_eq!(config.tools.nuget, Some(PathBuf::from("/usr/local/bin/nuget")));
        assert_eq!(config.tools.mdtool, Some(PathBuf::from("/opt/xs/mdtool")));
        assert_eq!(config.build.tool, Some(BuildTool::Msbuild));
        assert_eq!(config.build.configuration.as_deref(), Some("Debug"));
        assert_eq!(config.build.platform, None);
        assert_eq!(config.timeouts.build_secs, Some(1800));
    }

    #[test]
    fn test_discover_config() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::create_dir(temp_dir.path().join(".git")).unwrap();
        let nested = temp_dir.path().join("src/Droid");
        std::fs::create_dir_all(&nested).unwrap();
        let config_path = temp_dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&config_path, "[build]\nplatform = \"x86\"\n").unwrap();

        let (config, path) = StepConfigFile::discover_from(&nested).unwrap().unwrap();
        assert_eq!(path, config_path);
        assert_eq!(config.build.platform.as_deref(), Some("x86"));
    }

    #[test]
    fn test_discover_no_config() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::create_dir(temp_dir.path().join(".git")).unwrap();

        let result = StepConfigFile::discover_from(temp_dir.path()).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_cli_overrides_config_file() {
        let temp_dir = TempDir::new().unwrap();
        let project = project_file(temp_dir.path(), "App.sln");
        let resolver = ConfigResolver {
            config: Some(StepConfigFile {
                tools: ToolsConfig {
                    nunit_console: Some(PathBuf::from("/config/nunit3-console.exe")),
                    ..ToolsConfig::default()
                },
                build: BuildConfig {
                    tool: Some(BuildTool::Msbuild),
                    configuration: Some("Debug".to_string()),
                    clean: Some(false),
                    ..BuildConfig::default()
                },
                timeouts: TimeoutsConfig {
                    restore_secs: Some(60),
                    ..TimeoutsConfig::default()
                },
            }),
            config_path: None,
        };

        let config = StepConfig::resolve(
            &cli(&["-s", project.to_str().unwrap(), "-e", "emulator-5554", "-c", "Release", "-i", "yes"]),
            &resolver,
            temp_dir.path(),
        )
        .unwrap();

        assert!(config.is_solution_mode());
        assert!(config.clean);
        assert_eq!(config.settings.configuration, "Release");
        assert_eq!(config.tools.build_tool, BuildTool::Msbuild);
        assert_eq!(
            config.tools.nunit_console,
            Some(PathBuf::from("/config/nunit3-console.exe"))
        );
        assert_eq!(config.timeouts.restore, Some(Duration::from_secs(60)));
        assert_eq!(config.timeouts.build, None);
        assert_eq!(config.output_dir, temp_dir.path());
    }
}
