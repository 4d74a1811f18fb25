//! Bitrise step that builds a Xamarin.Android app and runs its Xamarin.UITest
//! suite against an emulator.
//!
//! The heavy lifting lives in `xamarin-uitest-sdk`; this crate resolves the
//! step inputs ([`config`]), sequences the stages ([`pipeline`]) and reports
//! back to the CI environment ([`envman`]).
//!
//! # Usage
//!
//! ```bash
//! xamarin-uitest -s Droid/Droid.csproj -t UITests/UITests.csproj \
//!     -e emulator-5554 -n /opt/nunit/nunit3-console.exe
//! xamarin-uitest -s App.sln -e emulator-5554 --dry-run
//! ```

use anyhow::{Context, Result, bail};
use clap::Parser;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

pub mod config;
pub mod envman;
pub mod pipeline;

use config::{ConfigResolver, StepConfig};
use envman::{CiExporter, TestResultStatus};
use pipeline::Pipeline;

/// Builds a Xamarin.Android app and its UITest project, then runs the tests on an emulator.
#[derive(Parser, Debug)]
#[command(name = "xamarin-uitest", author, version, about = "Xamarin.UITest runner for Android emulators", long_about = None)]
pub struct Cli {
    #[arg(short = 's', long, env = "xamarin_project", help = "Android project (.csproj) or solution (.sln)")]
    pub project: Option<PathBuf>,

    #[arg(short = 't', long, env = "test_to_run", help = "UITest project (.csproj), or a test/fixture name to run")]
    pub test: Option<String>,

    #[arg(short = 'c', long, env = "xamarin_configuration", help = "Build configuration [default: Release]")]
    pub configuration: Option<String>,

    #[arg(short = 'p', long, env = "xamarin_platform", help = "Build platform [default: AnyCPU]")]
    pub platform: Option<String>,

    #[arg(short = 'i', long, env = "clean_build", value_name = "BOOL", help = "Clean before building (true/false, yes/no, 1/0) [default: true]")]
    pub clean: Option<String>,

    #[arg(short = 'e', long, env = "emulator_serial", help = "Serial of the running emulator")]
    pub emulator: Option<String>,

    #[arg(short = 'n', long, env = "NUNIT_PATH", help = "Path to the NUnit console executable")]
    pub nunit: Option<PathBuf>,

    #[arg(long, env = "build_tool", help = "xbuild, msbuild or mdtool [default: xbuild]")]
    pub build_tool: Option<String>,

    #[arg(long, help = "Timeout for each external command, in seconds (0 = none)")]
    pub timeout_secs: Option<u64>,

    #[arg(long, env = "BITRISE_DEPLOY_DIR", help = "Directory for the test report and run summary")]
    pub deploy_dir: Option<PathBuf>,

    #[arg(long, env = "BITRISE_SOURCE_DIR", help = "Source checkout root")]
    pub source_dir: Option<PathBuf>,

    #[arg(short, long, help = "Log every command's output")]
    pub verbose: bool,

    #[arg(long, help = "Print the commands that would run without running them")]
    pub dry_run: bool,
}

pub fn run() -> Result<()> {
    load_dotenv();
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        // --help / --version
        Err(e) if !e.use_stderr() => e.exit(),
        Err(e) => {
            let _ = e.print();
            let resolver = source_root()
                .and_then(|root| ConfigResolver::discover_from(&root).ok())
                .unwrap_or_default();
            export_failure(&resolver, std::env::args().any(|arg| arg == "--dry-run"));
            bail!("invalid command line");
        }
    };
    init_tracing(cli.verbose);

    let cwd = std::env::current_dir().context("resolving current directory")?;
    let search_from = cli
        .source_dir
        .clone()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| cwd.clone());
    let resolver = match ConfigResolver::discover_from(&search_from) {
        Ok(resolver) => resolver,
        Err(e) => {
            export_failure(&ConfigResolver::default(), cli.dry_run);
            return Err(e);
        }
    };
    if let Some(path) = &resolver.config_path {
        tracing::info!("Using config file {:?}", path);
    }

    let config = match StepConfig::resolve(&cli, &resolver, &cwd) {
        Ok(config) => config,
        Err(e) => {
            export_failure(&resolver, cli.dry_run);
            return Err(e.into());
        }
    };
    config.log();

    let mut exporter = CiExporter::new(&config.envman).dry_run(config.dry_run);
    let mut report = Pipeline::new(&config).run(&mut exporter);

    if !config.dry_run
        && let Err(e) = report.write_summary(&config.summary_path())
    {
        tracing::warn!("{:#}", e);
    }

    match report.error.take() {
        Some(e) => Err(anyhow::Error::new(e).context("Xamarin UITest step failed")),
        None => {
            tracing::info!("Xamarin UITest step succeeded");
            Ok(())
        }
    }
}

/// Marks the step as failed when it stops before the pipeline runs.
fn export_failure(resolver: &ConfigResolver, dry_run: bool) {
    let envman = resolver.resolve(None, |c| c.tools.envman.clone(), PathBuf::from("envman"));
    CiExporter::new(envman)
        .dry_run(dry_run)
        .export_status(TestResultStatus::Failed);
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .ok();
}

/// `BITRISE_SOURCE_DIR`, else the current directory.
fn source_root() -> Option<PathBuf> {
    std::env::var_os("BITRISE_SOURCE_DIR")
        .map(PathBuf::from)
        .filter(|dir| !dir.as_os_str().is_empty())
        .or_else(|| std::env::current_dir().ok())
}

fn load_dotenv() {
    if let Some(root) = source_root() {
        let _ = dotenvy::from_path(Path::new(&root).join(".env.local"));
    }
}
