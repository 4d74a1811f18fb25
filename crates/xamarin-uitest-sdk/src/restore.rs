//! NuGet package restore.
//!
//! Restores run one solution at a time, in input order. Concurrent restores
//! against the same package cache are unsafe, and a failed restore is not
//! fatal: some solutions build fine from an already-populated cache.

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::builders::common::{printable_command, run_command};
use crate::types::{Timeouts, ToolPaths, UiTestError};

/// Outcome of restoring a set of solutions.
#[derive(Debug, Default)]
pub struct RestoreReport {
    /// Solutions restored successfully, in order.
    pub restored: Vec<PathBuf>,
    /// Solutions whose restore failed, with the (non-fatal) error.
    pub failed: Vec<UiTestError>,
}

impl RestoreReport {
    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Invokes `nuget restore` for solutions.
pub struct PackageRestorer {
    nuget: PathBuf,
    timeouts: Timeouts,
    dry_run: bool,
}

impl PackageRestorer {
    /// Creates a restorer using the `nuget` executable from `tools`.
    pub fn new(tools: &ToolPaths, timeouts: Timeouts) -> Self {
        Self {
            nuget: tools.nuget.clone(),
            timeouts,
            dry_run: false,
        }
    }

    /// Logs the restore commands instead of running them.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// The restore command for one solution.
    pub fn command(&self, solution: &Path) -> Command {
        let mut cmd = Command::new(&self.nuget);
        cmd.arg("restore").arg(solution);
        cmd
    }

    /// Restores a single solution.
    ///
    /// # Errors
    ///
    /// [`UiTestError::RestoreFailed`] if `nuget` cannot be started, exits
    /// unsuccessfully, or times out.
    pub fn restore(&self, solution: &Path) -> Result<(), UiTestError> {
        let cmd = self.command(solution);
        tracing::info!("$ {}", printable_command(&cmd));
        if self.dry_run {
            return Ok(());
        }

        run_command(cmd, "nuget restore", self.timeouts.restore)
            .map(|_| ())
            .map_err(|reason| UiTestError::RestoreFailed {
                solution: solution.to_path_buf(),
                reason,
            })
    }

    /// Restores every distinct solution in `solutions`, sequentially.
    ///
    /// Duplicates (by path equality) are restored once, at their first
    /// position. Failures are logged and collected; they never stop the loop.
    pub fn restore_all(&self, solutions: &[PathBuf]) -> RestoreReport {
        let mut report = RestoreReport::default();
        let mut seen: Vec<&PathBuf> = Vec::new();

        for solution in solutions {
            if seen.contains(&solution) {
                continue;
            }
            seen.push(solution);

            tracing::info!("Restoring NuGet packages for solution: {}", solution.display());
            match self.restore(solution) {
                Ok(()) => report.restored.push(solution.clone()),
                Err(e) => {
                    tracing::error!("Failed to restore NuGet packages: {}", e);
                    report.failed.push(e);
                }
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tools_with_nuget(nuget: &str) -> ToolPaths {
        ToolPaths {
            nuget: PathBuf::from(nuget),
            ..ToolPaths::default()
        }
    }

    #[test]
    fn test_restore_command_arguments() {
        let restorer = PackageRestorer::new(&tools_with_nuget("nuget"), Timeouts::default());
        let cmd = restorer.command(Path::new("/src/App.sln"));
        assert_eq!(printable_command(&cmd), "nuget restore /src/App.sln");
    }

    #[test]
    fn test_restore_failure_is_collected_not_raised() {
        let restorer = PackageRestorer::new(
            &tools_with_nuget("/nonexistent/nuget-12345"),
            Timeouts::default(),
        );
        let solutions = vec![
            PathBuf::from("/src/A.sln"),
            PathBuf::from("/src/A.sln"),
            PathBuf::from("/src/B.sln"),
        ];

        let report = restorer.restore_all(&solutions);
        assert!(!report.all_succeeded());
        // The duplicate is restored once.
        assert_eq!(report.failed.len(), 2);
        assert!(report.failed.iter().all(|e| !e.is_fatal()));
    }

    #[cfg(unix)]
    #[test]
    fn test_restore_partial_failure() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = tempfile::TempDir::new().unwrap();
        let nuget = temp_dir.path().join("nuget");
        std::fs::write(
            &nuget,
            "#!/bin/sh\ncase \"$2\" in *Broken.sln) echo 'Unable to find version' >&2; exit 1;; esac\nexit 0\n",
        )
        .unwrap();
        std::fs::set_permissions(&nuget, std::fs::Permissions::from_mode(0o755)).unwrap();

        let restorer = PackageRestorer::new(
            &tools_with_nuget(nuget.to_str().unwrap()),
            Timeouts::default(),
        );
        let report = restorer.restore_all(&[
            PathBuf::from("/src/Broken.sln"),
            PathBuf::from("/src/App.sln"),
        ]);

        assert_eq!(report.restored, vec![PathBuf::from("/src/App.sln")]);
        assert_eq!(report.failed.len(), 1);
        assert!(report.failed[0].to_string().contains("Broken.sln"));
    }

    #[test]
    fn test_dry_run_spawns_nothing() {
        let restorer = PackageRestorer::new(
            &tools_with_nuget("/nonexistent/nuget-12345"),
            Timeouts::default(),
        )
        .dry_run(true);
        assert!(restorer.restore(Path::new("/src/App.sln")).is_ok());
    }
}
