//! The step's pipeline.
//!
//! Stages run strictly in order, one external process at a time:
//!
//! 1. **Plan** - parse the project or solution and resolve (app, test)
//!    pairings. Nothing is spawned yet, so malformed input and missing
//!    pairings fail here cheaply.
//! 2. **Restore** - `nuget restore` each related solution (best effort)
//! 3. **Clean** - optional, every project of the plan
//! 4. **Build** - every project of the plan once, then locate `.apk`/`.dll`
//! 5. **Test** - one runner invocation per pairing; a failing pairing does
//!    not stop the remaining ones but fails the step
//! 6. **Export** - result token and report text through `envman`

use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use xamarin_uitest_sdk::{
    ArtifactKind, BuildOutput, BuildSettings, ErrorKind, NunitRunner, PackageRestorer,
    ProjectDescriptor, ProjectId, RunnerEnvironment, SolutionDescriptor, TargetPlatform,
    TestPairing, TestRunOutcome, TestRunState, UiTestError, XamarinBuilder, pair_solution,
    pair_tests, related_solutions,
};

use crate::config::StepConfig;
use crate::envman::{
    APK_PATH_KEY, CiExporter, EMULATOR_SERIAL_KEY, FULL_RESULTS_KEY, TestResultStatus,
};

/// The step only tests Android applications.
pub const PLATFORM: TargetPlatform = TargetPlatform::Android;

/// Everything decided before the first external process runs.
#[derive(Debug, Clone)]
pub struct Plan {
    pub pairings: Vec<TestPairing>,
    /// Solutions to restore, in order, without duplicates.
    pub solutions: Vec<PathBuf>,
}

impl Plan {
    /// Projects to clean and build: each pairing's app, then its test, each once.
    pub fn projects(&self) -> Vec<ProjectDescriptor> {
        let mut projects: Vec<ProjectDescriptor> = Vec::new();
        for pairing in &self.pairings {
            for project in [&pairing.app, &pairing.test] {
                if !projects.iter().any(|p| p.id == project.id) {
                    projects.push(project.clone());
                }
            }
        }
        projects
    }
}

/// Parses the inputs and resolves pairings.
///
/// # Errors
///
/// Any parse or resolution error; no process has been spawned at that point.
pub fn plan(config: &StepConfig) -> Result<Plan, UiTestError> {
    if config.is_solution_mode() {
        plan_solution(config)
    } else {
        plan_project(config)
    }
}

fn plan_project(config: &StepConfig) -> Result<Plan, UiTestError> {
    let app = ProjectDescriptor::parse(&config.project, &config.settings)?;
    let mut solutions = related_solutions(&app.path)?;
    if solutions.is_empty() {
        tracing::warn!("No solution found for project: {}", app.path.display());
    }

    let tests = match &config.test_project {
        Some(path) => vec![ProjectDescriptor::parse(path, &config.settings)?],
        None => discover_test_projects(&app, &solutions, &config.settings),
    };
    let pairings = pair_tests(&app, &tests, PLATFORM)?;

    for pairing in &pairings {
        let test_solutions = related_solutions(&pairing.test.path)?;
        if test_solutions.is_empty() {
            tracing::warn!("No solution found for project: {}", pairing.test.path.display());
        }
        for solution in test_solutions {
            if !solutions.contains(&solution) {
                solutions.push(solution);
            }
        }
    }

    Ok(Plan { pairings, solutions })
}

/// Test projects among the members of `solutions`.
///
/// Candidates are only discovered, not named by the user, so one that fails
/// to parse is skipped with a warning.
fn discover_test_projects(
    app: &ProjectDescriptor,
    solutions: &[PathBuf],
    settings: &BuildSettings,
) -> Vec<ProjectDescriptor> {
    let mut seen: Vec<ProjectId> = vec![app.id.clone()];
    let mut tests = Vec::new();

    for solution_path in solutions {
        let solution = match SolutionDescriptor::parse(solution_path) {
            Ok(solution) => solution,
            Err(e) => {
                tracing::warn!("{}", e);
                continue;
            }
        };
        for member in solution.csprojs() {
            if seen.contains(&member.id) {
                continue;
            }
            seen.push(member.id.clone());

            let member_settings = solution
                .project_settings_for(&member.id, settings)
                .map(|mapped| mapped.settings.clone())
                .unwrap_or_else(|| settings.clone());
            match ProjectDescriptor::parse(&member.path, &member_settings) {
                Ok(project) if project.is_test() => {
                    tracing::debug!("Discovered test project {}", project.name);
                    tests.push(project);
                }
                Ok(_) => {}
                Err(e) => tracing::warn!("Skipping {}: {}", member.name, e),
            }
        }
    }
    tests
}

fn plan_solution(config: &StepConfig) -> Result<Plan, UiTestError> {
    let solution = SolutionDescriptor::parse(&config.project)?.require_projects()?;

    let mut projects = Vec::new();
    for member in solution.csprojs() {
        let settings = solution
            .project_settings_for(&member.id, &config.settings)
            .map(|mapped| mapped.settings.clone())
            .unwrap_or_else(|| config.settings.clone());
        projects.push(ProjectDescriptor::parse(&member.path, &settings)?);
    }

    let mut pairings = pair_solution(&projects, PLATFORM)?;
    if let Some(test_project) = &config.test_project {
        let wanted = test_project.canonicalize()?;
        pairings.retain(|pairing| pairing.test.path == wanted);
        if pairings.is_empty() {
            return Err(UiTestError::NoMatchingTestProject(format!(
                "{} does not reference a {} project of {}",
                test_project.display(),
                PLATFORM.as_str(),
                solution.path.display()
            )));
        }
    }

    Ok(Plan {
        pairings,
        solutions: vec![solution.path],
    })
}

/// Outcome of one (app, test) pairing.
#[derive(Debug, Clone, Serialize)]
pub struct PairingReport {
    pub app: String,
    pub test: String,
    pub apk: Option<PathBuf>,
    pub test_assembly: Option<PathBuf>,
    pub outcome: Option<TestRunOutcome>,
    pub error: Option<String>,
}

impl PairingReport {
    fn new(pairing: &TestPairing) -> Self {
        Self {
            app: pairing.app.name.clone(),
            test: pairing.test.name.clone(),
            apk: None,
            test_assembly: None,
            outcome: None,
            error: None,
        }
    }

    pub fn state(&self) -> TestRunState {
        self.outcome
            .as_ref()
            .map(|o| o.state)
            .unwrap_or(TestRunState::NotRun)
    }
}

/// Everything one run did, written as the JSON run summary.
#[derive(Debug, Serialize)]
pub struct PipelineReport {
    pub generated_at: String,
    pub project: PathBuf,
    pub mode: &'static str,
    pub settings: BuildSettings,
    pub dry_run: bool,
    pub restored: Vec<PathBuf>,
    pub restore_failures: Vec<String>,
    pub pairings: Vec<PairingReport>,
    pub status: TestResultStatus,
    pub error_kind: Option<ErrorKind>,
    pub error_message: Option<String>,
    /// The error that failed the run.
    #[serde(skip)]
    pub error: Option<UiTestError>,
}

impl PipelineReport {
    fn new(config: &StepConfig) -> Self {
        Self {
            generated_at: OffsetDateTime::now_utc()
                .format(&Rfc3339)
                .unwrap_or_else(|_| "unknown".to_string()),
            project: config.project.clone(),
            mode: if config.is_solution_mode() {
                "solution"
            } else {
                "project"
            },
            settings: config.settings.clone(),
            dry_run: config.dry_run,
            restored: Vec::new(),
            restore_failures: Vec::new(),
            pairings: Vec::new(),
            status: TestResultStatus::Failed,
            error_kind: None,
            error_message: None,
            error: None,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.status == TestResultStatus::Succeeded
    }

    /// Value exported as the full results: the report of the first failing
    /// pairing, else the last report written, else the report path.
    fn full_results(&self) -> Option<String> {
        let outcomes: Vec<&TestRunOutcome> =
            self.pairings.iter().filter_map(|p| p.outcome.as_ref()).collect();

        outcomes
            .iter()
            .find(|o| !o.passed() && o.report_text.is_some())
            .or_else(|| outcomes.iter().rev().find(|o| o.report_text.is_some()))
            .and_then(|o| o.report_text.clone())
            .or_else(|| {
                outcomes
                    .iter()
                    .rev()
                    .find_map(|o| o.result_log.as_ref())
                    .map(|path| path.display().to_string())
            })
    }

    /// Writes the report as pretty JSON to `path`.
    pub fn write_summary(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("serializing run summary")?;
        ensure_parent_dir(path)?;
        std::fs::write(path, json).with_context(|| format!("writing run summary to {:?}", path))?;
        tracing::info!("Wrote run summary to {:?}", path);
        Ok(())
    }
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).with_context(|| format!("creating directory {:?}", parent))?;
    }
    Ok(())
}

/// Drives one run from a resolved [`StepConfig`].
pub struct Pipeline<'a> {
    config: &'a StepConfig,
}

impl<'a> Pipeline<'a> {
    pub fn new(config: &'a StepConfig) -> Self {
        Self { config }
    }

    /// Runs every stage and exports the result.
    ///
    /// Never returns early: the failure token is exported for every fatal
    /// error, and the error is kept in [`PipelineReport::error`].
    pub fn run(&self, exporter: &mut CiExporter) -> PipelineReport {
        let mut report = PipelineReport::new(self.config);
        let result = self.execute(exporter, &mut report);

        report.status = if result.is_ok() {
            TestResultStatus::Succeeded
        } else {
            TestResultStatus::Failed
        };
        exporter.export_status(report.status);
        if let Some(full_results) = report.full_results() {
            exporter.export(FULL_RESULTS_KEY, &full_results);
        }

        if let Err(e) = result {
            tracing::error!("{}", e);
            report.error_kind = Some(e.kind());
            report.error_message = Some(e.to_string());
            report.error = Some(e);
        }
        report
    }

    fn execute(&self, exporter: &mut CiExporter, report: &mut PipelineReport) -> Result<(), UiTestError> {
        let config = self.config;

        tracing::info!("==> Resolving projects: {}", config.project.display());
        let plan = plan(config)?;
        for pairing in &plan.pairings {
            tracing::info!("  (i) pairing: {}", pairing.label());
        }
        report.pairings = plan.pairings.iter().map(PairingReport::new).collect();

        if plan.solutions.is_empty() {
            tracing::warn!("No related solution found, skipping NuGet restore");
        } else {
            tracing::info!("==> Restoring NuGet packages");
            let restore = PackageRestorer::new(&config.tools, config.timeouts)
                .dry_run(config.dry_run)
                .restore_all(&plan.solutions);
            report.restored = restore.restored;
            report.restore_failures = restore.failed.iter().map(ToString::to_string).collect();
        }

        let builder = XamarinBuilder::new(&config.tools, config.timeouts)
            .verbose(config.verbose)
            .dry_run(config.dry_run);
        let projects = plan.projects();

        if config.clean {
            for project in &projects {
                tracing::info!("==> Cleaning project: {}", project.path.display());
                builder.clean(project, &project.settings)?;
            }
        }

        tracing::info!("==> Building {} project(s)", projects.len());
        let outputs = builder.build_all(&projects, PLATFORM)?;

        let runner = NunitRunner::new(&config.tools, config.timeouts, config.result_log())?
            .dry_run(config.dry_run);
        exporter.export(EMULATOR_SERIAL_KEY, &config.emulator_serial);

        let mut first_failure = None;
        for (pairing, pairing_report) in plan.pairings.iter().zip(report.pairings.iter_mut()) {
            let apk = artifact_of(&outputs, &pairing.app, ArtifactKind::AppPackage)?;
            let dll = artifact_of(&outputs, &pairing.test, ArtifactKind::TestAssembly)?;
            pairing_report.apk = Some(apk.clone());
            pairing_report.test_assembly = Some(dll.clone());
            exporter.export(APK_PATH_KEY, &apk.display().to_string());

            tracing::info!("==> Running UI tests: {}", pairing.label());
            let env = RunnerEnvironment {
                apk_path: apk,
                emulator_serial: config.emulator_serial.clone(),
            };
            let outcome = runner.run(&dll, config.test_filter.as_deref(), &env)?;
            log_failures(&outcome);
            pairing_report.outcome = Some(outcome.clone());

            match outcome.into_result() {
                Ok(_) => tracing::info!("  (i) {} passed", pairing.label()),
                Err(e) => {
                    tracing::error!("{}", e);
                    pairing_report.error = Some(e.to_string());
                    first_failure.get_or_insert(e);
                }
            }
        }

        match first_failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

fn artifact_of(
    outputs: &BTreeMap<ProjectId, BuildOutput>,
    project: &ProjectDescriptor,
    kind: ArtifactKind,
) -> Result<PathBuf, UiTestError> {
    outputs
        .get(&project.id)
        .filter(|output| output.kind == kind)
        .map(|output| output.artifact.clone())
        .ok_or_else(|| UiTestError::ArtifactNotFound {
            search_dir: project.directory().join(project.settings.output_dir()),
            extension: match kind {
                ArtifactKind::AppPackage => "apk",
                _ => "dll",
            }
            .to_string(),
        })
}

fn log_failures(outcome: &TestRunOutcome) {
    for failure in &outcome.failures {
        tracing::error!("Test failed: {}", failure.name);
        if let Some(message) = &failure.message {
            tracing::error!("  Message: {}", message);
        }
        if let Some(stack_trace) = &failure.stack_trace {
            tracing::error!("  Stack trace:\n{}", stack_trace);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xamarin_uitest_sdk::{OutputKind, ProjectReference, TestFramework};

    fn project(name: &str, guid: &str, test: bool, references: &[&str]) -> ProjectDescriptor {
        ProjectDescriptor {
            id: ProjectId::parse(guid).unwrap(),
            path: PathBuf::from(format!("/src/{name}/{name}.csproj")),
            name: name.to_string(),
            assembly_name: name.to_string(),
            platform: if test {
                TargetPlatform::Other
            } else {
                TargetPlatform::Android
            },
            output_kind: if test {
                OutputKind::Assembly
            } else {
                OutputKind::Package
            },
            output_type: "Library".to_string(),
            test_framework: test.then_some(TestFramework::XamarinUiTest),
            settings: BuildSettings::new("Release", "AnyCPU"),
            references: references
                .iter()
                .map(|guid| ProjectReference {
                    id: ProjectId::parse(guid).unwrap(),
                    path: PathBuf::from("/src/ref.csproj"),
                    name: None,
                })
                .collect(),
        }
    }

    const APP: &str = "11111111-1111-1111-1111-111111111111";
    const SMOKE: &str = "22222222-2222-2222-2222-222222222222";
    const FULL: &str = "33333333-3333-3333-3333-333333333333";

    #[test]
    fn test_plan_projects_builds_shared_app_once() {
        let app = project("Droid", APP, false, &[]);
        let plan = Plan {
            pairings: vec![
                TestPairing {
                    app: app.clone(),
                    test: project("SmokeTests", SMOKE, true, &[APP]),
                },
                TestPairing {
                    app,
                    test: project("FullTests", FULL, true, &[APP]),
                },
            ],
            solutions: Vec::new(),
        };

        let names: Vec<String> = plan.projects().into_iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["Droid", "SmokeTests", "FullTests"]);
    }

    #[test]
    fn test_pairing_report_defaults_to_not_run() {
        let pairing = TestPairing {
            app: project("Droid", APP, false, &[]),
            test: project("SmokeTests", SMOKE, true, &[APP]),
        };
        let report = PairingReport::new(&pairing);
        assert_eq!(report.state(), TestRunState::NotRun);
        assert_eq!(report.app, "Droid");
    }

    #[test]
    fn test_artifact_of_rejects_library_output() {
        let app = project("Droid", APP, false, &[]);
        let mut outputs = BTreeMap::new();
        outputs.insert(
            app.id.clone(),
            BuildOutput {
                project_id: app.id.clone(),
                project_name: app.name.clone(),
                output_dir: PathBuf::from("/src/Droid/bin/AnyCPU/Release"),
                kind: ArtifactKind::Other,
                artifact: PathBuf::from("/src/Droid/bin/AnyCPU/Release/Droid.dll"),
            },
        );

        let err = artifact_of(&outputs, &app, ArtifactKind::AppPackage).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ArtifactNotFound);
        assert!(err.to_string().contains("apk"));

        outputs.get_mut(&app.id).unwrap().kind = ArtifactKind::AppPackage;
        outputs.get_mut(&app.id).unwrap().artifact = PathBuf::from("/src/Droid/app.apk");
        let apk = artifact_of(&outputs, &app, ArtifactKind::AppPackage).unwrap();
        assert_eq!(apk, PathBuf::from("/src/Droid/app.apk"));
    }
}
