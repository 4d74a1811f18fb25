//! Pairing of application projects with the test projects that exercise them.
//!
//! A test project is paired with an application project when it declares a
//! `<ProjectReference>` to the application's GUID and the application targets
//! the platform under test. Finding no pairing at all is an error
//! ([`UiTestError::NoMatchingTestProject`]), never an empty success.

use serde::Serialize;

use crate::project::ProjectDescriptor;
use crate::types::{OutputKind, TargetPlatform, UiTestError};

/// An (application, test) pair to build and run together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestPairing {
    pub app: ProjectDescriptor,
    pub test: ProjectDescriptor,
}

impl TestPairing {
    /// `"<test> -> <app>"`, for logs.
    pub fn label(&self) -> String {
        format!("{} -> {}", self.test.name, self.app.name)
    }
}

/// Pairs one application project with the given test projects.
pub fn pair_tests(
    app: &ProjectDescriptor,
    tests: &[ProjectDescriptor],
    platform: TargetPlatform,
) -> Result<Vec<TestPairing>, UiTestError> {
    if app.platform != platform {
        return Err(UiTestError::NoMatchingTestProject(format!(
            "{} targets {}, not {}; only {} projects can be tested on this emulator",
            app.name,
            app.platform.as_str(),
            platform.as_str(),
            platform.as_str()
        )));
    }
    if app.output_kind != OutputKind::Package {
        return Err(UiTestError::NoMatchingTestProject(format!(
            "{} is not an application package (output type {})",
            app.name, app.output_type
        )));
    }

    let pairings: Vec<TestPairing> = tests
        .iter()
        .filter(|test| test.is_test() && test.references_project(&app.id))
        .map(|test| TestPairing {
            app: app.clone(),
            test: test.clone(),
        })
        .collect();

    if pairings.is_empty() {
        let candidates: Vec<&str> = tests.iter().map(|t| t.name.as_str()).collect();
        return Err(UiTestError::NoMatchingTestProject(format!(
            "none of the test projects {:?} references {} {}",
            candidates, app.name, app.id
        )));
    }
    Ok(pairings)
}

/// Pairs every application and test project of one solution.
///
/// Applications are the non-test projects targeting `platform` that produce
/// an application package; class libraries are never paired. Test
/// projects are those written against a test framework. Pairings are ordered
/// by application, then by test, in the order `projects` lists them.
pub fn pair_solution(
    projects: &[ProjectDescriptor],
    platform: TargetPlatform,
) -> Result<Vec<TestPairing>, UiTestError> {
    let tests: Vec<&ProjectDescriptor> = projects.iter().filter(|p| p.is_test()).collect();

    let pairings: Vec<TestPairing> = projects
        .iter()
        .filter(|p| {
            !p.is_test() && p.platform == platform && p.output_kind == OutputKind::Package
        })
        .flat_map(|app| {
            tests
                .iter()
                .filter(move |test| test.references_project(&app.id))
                .map(move |test| TestPairing {
                    app: app.clone(),
                    test: (*test).clone(),
                })
        })
        .collect();

    if pairings.is_empty() {
        return Err(UiTestError::NoMatchingTestProject(format!(
            "no test project references a {} project ({} projects, {} test projects scanned)",
            platform.as_str(),
            projects.len(),
            tests.len()
        )));
    }
    Ok(pairings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::ProjectReference;
    use crate::types::{BuildSettings, ProjectId, TestFramework};
    use std::path::PathBuf;

    fn project(
        name: &str,
        guid: &str,
        platform: TargetPlatform,
        test_framework: Option<TestFramework>,
        references: &[&str],
    ) -> ProjectDescriptor {
        ProjectDescriptor {
            id: ProjectId::parse(guid).unwrap(),
            path: PathBuf::from(format!("/src/{name}/{name}.csproj")),
            name: name.to_string(),
            assembly_name: name.to_string(),
            platform,
            output_kind: if platform == TargetPlatform::Android {
                OutputKind::Package
            } else {
                OutputKind::Assembly
            },
            output_type: "Library".to_string(),
            test_framework,
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

    const DROID: &str = "11111111-1111-1111-1111-111111111111";
    const IOS: &str = "22222222-2222-2222-2222-222222222222";
    const CORE: &str = "33333333-3333-3333-3333-333333333333";
    const UITEST: &str = "44444444-4444-4444-4444-444444444444";
    const UNIT: &str = "55555555-5555-5555-5555-555555555555";

    fn solution_projects() -> Vec<ProjectDescriptor> {
        vec![
            project("Core", CORE, TargetPlatform::Other, None, &[]),
            project("Droid", DROID, TargetPlatform::Android, None, &[CORE]),
            project("iOS", IOS, TargetPlatform::Ios, None, &[CORE]),
            project(
                "UITests",
                UITEST,
                TargetPlatform::Other,
                Some(TestFramework::XamarinUiTest),
                &[DROID, IOS],
            ),
            project("UnitTests", UNIT, TargetPlatform::Other, Some(TestFramework::NUnit), &[CORE]),
        ]
    }

    #[test]
    fn test_pair_solution_filters_platform() {
        let pairings = pair_solution(&solution_projects(), TargetPlatform::Android).unwrap();
        assert_eq!(pairings.len(), 1);
        assert_eq!(pairings[0].app.name, "Droid");
        assert_eq!(pairings[0].test.name, "UITests");
        assert_eq!(pairings[0].label(), "UITests -> Droid");
    }

    #[test]
    fn test_pair_solution_no_match_is_error() {
        let projects: Vec<ProjectDescriptor> = solution_projects()
            .into_iter()
            .filter(|p| p.name != "UITests")
            .collect();
        let err = pair_solution(&projects, TargetPlatform::Android).unwrap_err();
        assert!(matches!(err, UiTestError::NoMatchingTestProject(_)));
    }

    #[test]
    fn test_pair_tests_many_tests_one_app() {
        let projects = solution_projects();
        let droid = &projects[1];
        let second = project(
            "SmokeTests",
            "66666666-6666-6666-6666-666666666666",
            TargetPlatform::Other,
            Some(TestFramework::XamarinUiTest),
            &[DROID],
        );
        let tests = vec![projects[3].clone(), projects[4].clone(), second];

        let pairings = pair_tests(droid, &tests, TargetPlatform::Android).unwrap();
        let names: Vec<&str> = pairings.iter().map(|p| p.test.name.as_str()).collect();
        assert_eq!(names, vec!["UITests", "SmokeTests"]);
    }

    #[test]
    fn test_pair_tests_wrong_platform_is_error() {
        let projects = solution_projects();
        let ios = &projects[2];
        let err = pair_tests(ios, &[projects[3].clone()], TargetPlatform::Android).unwrap_err();
        assert!(matches!(err, UiTestError::NoMatchingTestProject(_)));
    }

    #[test]
    fn test_pair_tests_unreferenced_is_error() {
        let projects = solution_projects();
        let droid = &projects[1];
        let err = pair_tests(droid, &[projects[4].clone()], TargetPlatform::Android).unwrap_err();
        assert!(err.to_string().contains("UnitTests"));
    }

    fn android_library() -> ProjectDescriptor {
        let mut lib = project(
            "DroidLib",
            "77777777-7777-7777-7777-777777777777",
            TargetPlatform::Android,
            None,
            &[CORE],
        );
        lib.output_kind = OutputKind::Assembly;
        lib
    }

    #[test]
    fn test_pair_solution_skips_android_library() {
        let lib = android_library();
        let mut projects = solution_projects();
        projects[3].references.push(ProjectReference {
            id: lib.id.clone(),
            path: PathBuf::from("/src/DroidLib/DroidLib.csproj"),
            name: None,
        });
        projects.insert(1, lib);

        let pairings = pair_solution(&projects, TargetPlatform::Android).unwrap();
        let apps: Vec<&str> = pairings.iter().map(|p| p.app.name.as_str()).collect();
        assert_eq!(apps, vec!["Droid"]);
    }

    #[test]
    fn test_pair_tests_library_app_is_error() {
        let lib = android_library();
        let mut test = solution_projects()[3].clone();
        test.references[0].id = lib.id.clone();

        let err = pair_tests(&lib, &[test], TargetPlatform::Android).unwrap_err();
        assert!(matches!(err, UiTestError::NoMatchingTestProject(_)));
        assert!(err.to_string().contains("DroidLib"));
    }
}
