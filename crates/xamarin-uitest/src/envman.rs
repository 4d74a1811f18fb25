//! CI environment export through `envman`.

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::Command;

use xamarin_uitest_sdk::builders::common::{OutputEcho, printable_command, run_process};

/// `succeeded` / `failed`.
pub const RESULT_KEY: &str = "BITRISE_XAMARIN_TEST_RESULT";
/// Full text of the XML result report (or its path when the text is unavailable).
pub const FULL_RESULTS_KEY: &str = "BITRISE_XAMARIN_TEST_FULL_RESULTS_TEXT";
pub const APK_PATH_KEY: &str = "ANDROID_APK_PATH";
pub const EMULATOR_SERIAL_KEY: &str = "ANDROID_EMULATOR_SERIAL";

/// Overall result token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TestResultStatus {
    Succeeded,
    Failed,
}

impl TestResultStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TestResultStatus::Succeeded => "succeeded",
            TestResultStatus::Failed => "failed",
        }
    }
}

/// Publishes key/value pairs to the CI environment.
///
/// Export is best-effort: a missing or failing `envman` is logged as a
/// warning and never fails the step.
pub struct CiExporter {
    envman: PathBuf,
    dry_run: bool,
    exported: Vec<(String, String)>,
}

impl CiExporter {
    pub fn new(envman: impl Into<PathBuf>) -> Self {
        Self {
            envman: envman.into(),
            dry_run: false,
            exported: Vec::new(),
        }
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn envman(&self) -> &Path {
        &self.envman
    }

    /// Every `(key, value)` handed to `envman`, in order.
    pub fn exported(&self) -> &[(String, String)] {
        &self.exported
    }

    /// Last value exported for `key`.
    pub fn value_of(&self, key: &str) -> Option<&str> {
        self.exported
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Exports one variable. Returns whether `envman` accepted it.
    pub fn export(&mut self, key: &str, value: &str) -> bool {
        self.exported.push((key.to_string(), value.to_string()));

        let mut cmd = Command::new(&self.envman);
        cmd.args(["add", "--key", key, "--value", value]);
        if self.dry_run {
            tracing::info!("$ {} add --key {} --value <{} bytes>", self.envman.display(), key, value.len());
            return true;
        }
        tracing::debug!("$ {}", printable_command(&cmd));

        match run_process(cmd, None, OutputEcho::Quiet) {
            Ok(output) if output.success() => true,
            Ok(output) => {
                tracing::warn!(
                    "envman failed to export {} ({}): {}",
                    key,
                    output.status_line(),
                    output.stderr.trim()
                );
                false
            }
            Err(e) => {
                tracing::warn!(
                    "Could not run {} to export {}: {}",
                    self.envman.display(),
                    key,
                    e
                );
                false
            }
        }
    }

    /// Exports the overall result token.
    pub fn export_status(&mut self, status: TestResultStatus) -> bool {
        self.export(RESULT_KEY, status.as_str())
    }
}
