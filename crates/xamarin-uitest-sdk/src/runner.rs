//! NUnit console execution.
//!
//! One run moves through `NotRun -> Running -> {Passed, Failed, RunnerCrashed}`.
//! A non-zero exit is never an `Err` here: it is classified into a
//! [`TestRunOutcome`], and [`TestRunOutcome::into_result`] turns the failing
//! states into the matching [`UiTestError`] for the caller.
//!
//! Classification, in order:
//!
//! 1. The runner was killed by its timeout, or could not be started: `RunnerCrashed`
//! 2. The XML report lists failed `test-case`s, or the console summary shows
//!    errors/failures: `Failed` (regardless of the exit code)
//! 3. Non-zero exit without any failing-test record: `RunnerCrashed`
//! 4. Otherwise: `Passed`

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::builders::common::{OutputEcho, printable_command, run_process};
use crate::report::{SummaryCounts, TestFailure, parse_result_report, parse_summary_counts};
use crate::types::{Timeouts, ToolPaths, UiTestError};

/// File name of the runner's XML report.
pub const RESULT_LOG_NAME: &str = "TestResult.xml";

/// Environment passed to the runner process (not to this process).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerEnvironment {
    /// Exported as `ANDROID_APK_PATH`.
    pub apk_path: PathBuf,
    /// Exported as `ANDROID_EMULATOR_SERIAL`.
    pub emulator_serial: String,
}

/// State of one test execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TestRunState {
    NotRun,
    Running,
    Passed,
    Failed,
    RunnerCrashed,
}

/// Everything known about one finished test execution.
#[derive(Debug, Clone, Serialize)]
pub struct TestRunOutcome {
    pub assembly: PathBuf,
    pub state: TestRunState,
    pub exit_code: Option<i32>,
    /// Failing test cases from the XML report.
    pub failures: Vec<TestFailure>,
    /// Console summary counts, when the runner printed them.
    pub summary: Option<SummaryCounts>,
    /// Path of the XML report, when one was written.
    pub result_log: Option<PathBuf>,
    /// Full text of the XML report, when one was written.
    #[serde(skip)]
    pub report_text: Option<String>,
    /// Why the run is `RunnerCrashed`.
    pub crash_reason: Option<String>,
    #[serde(skip)]
    pub stdout: String,
}

impl TestRunOutcome {
    fn new(assembly: &Path, state: TestRunState) -> Self {
        Self {
            assembly: assembly.to_path_buf(),
            state,
            exit_code: None,
            failures: Vec::new(),
            summary: None,
            result_log: None,
            report_text: None,
            crash_reason: None,
            stdout: String::new(),
        }
    }

    pub fn passed(&self) -> bool {
        matches!(self.state, TestRunState::Passed | TestRunState::NotRun)
    }

    /// Short description of the failing tests, for error messages.
    pub fn failure_summary(&self) -> String {
        if !self.failures.is_empty() {
            let names: Vec<&str> = self.failures.iter().map(|f| f.name.as_str()).collect();
            return format!("{} failing test(s): {}", names.len(), names.join(", "));
        }
        match &self.summary {
            Some(counts) => format!(
                "{} tests run, {} errors, {} failures",
                counts.total, counts.errors, counts.failures
            ),
            None => "test run failed".to_string(),
        }
    }

    /// Converts a failing state into its error category.
    pub fn into_result(self) -> Result<Self, UiTestError> {
        match self.state {
            TestRunState::Failed => Err(UiTestError::TestExecutionFailed {
                summary: self.failure_summary(),
                assembly: self.assembly,
            }),
            TestRunState::RunnerCrashed => Err(UiTestError::RunnerCrashed {
                reason: self
                    .crash_reason
                    .unwrap_or_else(|| "runner ended without a report".to_string()),
                assembly: self.assembly,
            }),
            _ => Ok(self),
        }
    }
}

/// Runs test assemblies with `mono <nunit-console>`.
pub struct NunitRunner {
    mono: PathBuf,
    console: PathBuf,
    result_log: PathBuf,
    timeouts: Timeouts,
    dry_run: bool,
}

impl NunitRunner {
    /// Creates a runner writing its report to `result_log`.
    ///
    /// # Errors
    ///
    /// [`UiTestError::Configuration`] when no NUnit console is configured.
    pub fn new(
        tools: &ToolPaths,
        timeouts: Timeouts,
        result_log: impl Into<PathBuf>,
    ) -> Result<Self, UiTestError> {
        let console = tools.nunit_console.clone().ok_or_else(|| {
            UiTestError::Configuration(
                "NUnit console path is not set (use --nunit or NUNIT_PATH)".to_string(),
            )
        })?;
        Ok(Self {
            mono: tools.mono.clone(),
            console,
            result_log: result_log.into(),
            timeouts,
            dry_run: false,
        })
    }

    /// Logs the runner command instead of running it.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn result_log(&self) -> &Path {
        &self.result_log
    }

    /// The runner command for one assembly.
    pub fn command(&self, assembly: &Path, filter: Option<&str>, env: &RunnerEnvironment) -> Command {
        let mut cmd = Command::new(&self.mono);
        cmd.arg(&self.console)
            .arg(assembly)
            .arg(format!("--result={}", self.result_log.display()));
        if let Some(filter) = filter {
            cmd.arg(format!("--test={}", filter));
        }
        cmd.env("ANDROID_APK_PATH", &env.apk_path)
            .env("ANDROID_EMULATOR_SERIAL", &env.emulator_serial);
        cmd
    }

    /// Runs the tests in `assembly`, optionally narrowed to `filter`.
    ///
    /// # Errors
    ///
    /// Only [`UiTestError::Io`] when a stale report cannot be removed. Test
    /// failures and crashes are reported through [`TestRunOutcome::state`].
    pub fn run(
        &self,
        assembly: &Path,
        filter: Option<&str>,
        env: &RunnerEnvironment,
    ) -> Result<TestRunOutcome, UiTestError> {
        let cmd = self.command(assembly, filter, env);
        tracing::info!("$ {}", printable_command(&cmd));
        if self.dry_run {
            return Ok(TestRunOutcome::new(assembly, TestRunState::NotRun));
        }

        if self.result_log.exists() {
            tracing::debug!("Removing stale result log {}", self.result_log.display());
            std::fs::remove_file(&self.result_log)?;
        }

        tracing::debug!("{} -> {:?}", assembly.display(), TestRunState::Running);
        let output = match run_process(cmd, self.timeouts.test, OutputEcho::Live) {
            Ok(output) => output,
            Err(e) => {
                let mut outcome = TestRunOutcome::new(assembly, TestRunState::RunnerCrashed);
                outcome.crash_reason = Some(format!(
                    "failed to start {}: {}. Check the mono and NUnit console paths",
                    self.mono.display(),
                    e
                ));
                return Ok(outcome);
            }
        };

        let mut outcome = TestRunOutcome::new(assembly, TestRunState::Passed);
        outcome.exit_code = output.exit_code;
        outcome.summary = parse_summary_counts(&output.stdout);

        let mut report_error = None;
        if let Ok(text) = std::fs::read_to_string(&self.result_log) {
            match parse_result_report(&text) {
                Ok(report) => outcome.failures = report.failures,
                Err(e) => report_error = Some(e),
            }
            outcome.result_log = Some(self.result_log.clone());
            outcome.report_text = Some(text);
        }

        let summary_failing = outcome.summary.as_ref().is_some_and(SummaryCounts::is_failing);
        outcome.state = if output.timed_out {
            outcome.crash_reason = Some(format!("runner {}", output.status_line()));
            TestRunState::RunnerCrashed
        } else if !outcome.failures.is_empty() || summary_failing {
            TestRunState::Failed
        } else if !output.success() {
            let report_note = match (&outcome.result_log, report_error) {
                (_, Some(e)) => format!("result log is not valid XML: {}", e),
                (Some(_), None) => "result log lists no failed test".to_string(),
                (None, None) => format!("no result log at {}", self.result_log.display()),
            };
            outcome.crash_reason = Some(format!(
                "runner {} and {}\n\n{}",
                output.status_line(),
                report_note,
                output.tail(20)
            ));
            TestRunState::RunnerCrashed
        } else {
            TestRunState::Passed
        };
        outcome.stdout = output.stdout;

        tracing::debug!("{} -> {:?}", assembly.display(), outcome.state);
        Ok(outcome)
    }
}
