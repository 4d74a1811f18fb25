//! Project file (`.csproj`) parsing.
//!
//! A [`ProjectDescriptor`] is parsed for one `(configuration, platform)` query:
//! properties are taken from unconditioned `PropertyGroup`s and from those
//! whose `Condition` matches the queried pair, in document order, later values
//! overriding earlier ones. Nothing is cached; every call re-reads the file.
//!
//! ## Classification
//!
//! | Field | Derived from |
//! |-------|--------------|
//! | `id` | `<ProjectGuid>` (required) |
//! | `output_kind` | `<AndroidApplication>true` → package, otherwise assembly |
//! | `platform` | `<ProjectTypeGuids>`, `<AndroidApplication>`, `Mono.Android`/`Xamarin.iOS` references, `<TargetFramework>` |
//! | `test_framework` | `Xamarin.UITest` / `nunit.framework` references |
//! | `references` | every `<ProjectReference>` carrying a `<Project>` GUID |

use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::builders::common::{host_path, normalize_path};
use crate::types::{BuildSettings, OutputKind, ProjectId, TargetPlatform, TestFramework, UiTestError};

/// Project type GUID of Xamarin.Android projects.
pub const ANDROID_PROJECT_TYPE: &str = "EFBA0AD7-5A72-4C68-AF49-83D382785DCF";
/// Project type GUIDs of Xamarin.iOS projects (unified and classic).
pub const IOS_PROJECT_TYPES: [&str; 2] = [
    "FEACFBD2-3405-455C-9665-78FE426C6842",
    "6BC8ED88-2882-458C-8E55-DFD12B67127B",
];

/// A reference from one project to another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectReference {
    pub id: ProjectId,
    /// Referenced project file, resolved against the referencing project's directory.
    pub path: PathBuf,
    pub name: Option<String>,
}

/// Everything the pipeline needs to know about one project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectDescriptor {
    pub id: ProjectId,
    /// Canonical path of the project file.
    pub path: PathBuf,
    /// Display name (file stem).
    pub name: String,
    pub assembly_name: String,
    pub platform: TargetPlatform,
    pub output_kind: OutputKind,
    /// Raw `<OutputType>` value (`Library`, `Exe`, ...).
    pub output_type: String,
    pub test_framework: Option<TestFramework>,
    pub settings: BuildSettings,
    /// Referenced projects in declaration order, without duplicates.
    pub references: Vec<ProjectReference>,
}

impl ProjectDescriptor {
    /// Reads and parses the project file at `path` for `settings`.
    ///
    /// # Errors
    ///
    /// [`UiTestError::MalformedProjectFile`] if the file cannot be read, is
    /// not well-formed XML, or lacks `<ProjectGuid>` / `<OutputType>`.
    pub fn parse(path: &Path, settings: &BuildSettings) -> Result<Self, UiTestError> {
        let malformed = |reason: String| UiTestError::MalformedProjectFile {
            path: path.to_path_buf(),
            reason,
        };

        let canonical = path
            .canonicalize()
            .map_err(|e| malformed(format!("cannot resolve path: {}", e)))?;
        let content = std::fs::read_to_string(&canonical)
            .map_err(|e| malformed(format!("cannot read file: {}", e)))?;

        Self::from_xml(&content, &canonical, settings)
    }

    /// Parses project XML already read from `path`.
    pub fn from_xml(content: &str, path: &Path, settings: &BuildSettings) -> Result<Self, UiTestError> {
        let malformed = |reason: String| UiTestError::MalformedProjectFile {
            path: path.to_path_buf(),
            reason,
        };

        let content = content.trim_start_matches('\u{feff}');
        let document = roxmltree::Document::parse(content)
            .map_err(|e| malformed(format!("invalid XML: {}", e)))?;
        let root = document.root_element();
        if root.tag_name().name() != "Project" {
            return Err(malformed(format!(
                "root element is <{}>, expected <Project>",
                root.tag_name().name()
            )));
        }

        let properties = collect_properties(root, settings);
        let project_dir = path.parent().unwrap_or(Path::new("."));

        let id = properties
            .get("ProjectGuid")
            .ok_or_else(|| malformed("missing <ProjectGuid>".to_string()))
            .and_then(|raw| {
                ProjectId::parse(raw)
                    .ok_or_else(|| malformed(format!("<ProjectGuid> is not a GUID: {}", raw)))
            })?;
        let output_type = properties
            .get("OutputType")
            .ok_or_else(|| malformed("missing <OutputType>".to_string()))?
            .to_string();

        let name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
        let assembly_name = properties
            .get("AssemblyName")
            .map(str::to_string)
            .unwrap_or_else(|| name.clone());

        let assembly_refs = assembly_references(root);
        let is_android_app = properties
            .get("AndroidApplication")
            .is_some_and(|v| v.eq_ignore_ascii_case("true"));

        Ok(Self {
            id,
            path: path.to_path_buf(),
            name,
            assembly_name,
            platform: detect_platform(&properties, &assembly_refs),
            output_kind: if is_android_app {
                OutputKind::Package
            } else {
                OutputKind::Assembly
            },
            output_type,
            test_framework: detect_test_framework(&assembly_refs),
            settings: settings.clone(),
            references: project_references(root, project_dir),
        })
    }

    /// Whether this project is a test project.
    pub fn is_test(&self) -> bool {
        self.test_framework.is_some()
    }

    /// Whether this project is a Xamarin.UITest project.
    pub fn is_uitest(&self) -> bool {
        self.test_framework == Some(TestFramework::XamarinUiTest)
    }

    /// Whether this project declares a reference to `id`.
    pub fn references_project(&self, id: &ProjectId) -> bool {
        self.references.iter().any(|r| &r.id == id)
    }

    /// Directory containing the project file.
    pub fn directory(&self) -> &Path {
        self.path.parent().unwrap_or(Path::new("."))
    }
}

/// Ordered property bag; later `set`s win.
#[derive(Debug, Default)]
struct Properties(Vec<(String, String)>);

impl Properties {
    fn set(&mut self, key: &str, value: &str) {
        self.0.retain(|(k, _)| !k.eq_ignore_ascii_case(key));
        self.0.push((key.to_string(), value.to_string()));
    }

    fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
            .filter(|v| !v.is_empty())
    }
}

fn collect_properties(root: roxmltree::Node<'_, '_>, settings: &BuildSettings) -> Properties {
    let mut properties = Properties::default();
    for group in root
        .children()
        .filter(|n| n.is_element() && n.tag_name().name() == "PropertyGroup")
    {
        if !condition_applies(group.attribute("Condition"), settings) {
            continue;
        }
        for property in group.children().filter(|n| n.is_element()) {
            // Per-property conditions are defaults like `'$(Configuration)' == ''`.
            if property.attribute("Condition").is_some() {
                continue;
            }
            let value = property.text().unwrap_or_default().trim();
            properties.set(property.tag_name().name(), value);
        }
    }
    properties
}

/// Evaluates an MSBuild `Condition` of the form `'<lhs>' == '<rhs>'` (or `!=`).
///
/// Conditions that cannot be evaluated are treated as not matching.
fn condition_applies(condition: Option<&str>, settings: &BuildSettings) -> bool {
    let Some(condition) = condition.map(str::trim).filter(|c| !c.is_empty()) else {
        return true;
    };

    let (lhs, rhs, negated) = if let Some((l, r)) = condition.split_once("==") {
        (l, r, false)
    } else if let Some((l, r)) = condition.split_once("!=") {
        (l, r, true)
    } else {
        return false;
    };

    let unquote = |s: &str| s.trim().trim_matches('\'').trim().to_string();
    let lhs = unquote(lhs)
        .replace("$(Configuration)", &settings.configuration)
        .replace("$(Platform)", &settings.platform);
    let rhs = unquote(rhs);

    let equal = lhs.eq_ignore_ascii_case(&rhs);
    equal != negated
}

/// Assembly names from `<Reference>` and `<PackageReference>` items.
fn assembly_references(root: roxmltree::Node<'_, '_>) -> Vec<String> {
    root.descendants()
        .filter(|n| {
            n.is_element() && matches!(n.tag_name().name(), "Reference" | "PackageReference")
        })
        .filter_map(|n| n.attribute("Include"))
        .map(|include| include.split(',').next().unwrap_or_default().trim().to_string())
        .filter(|name| !name.is_empty())
        .collect()
}

fn project_references(root: roxmltree::Node<'_, '_>, project_dir: &Path) -> Vec<ProjectReference> {
    let mut references: Vec<ProjectReference> = Vec::new();
    for node in root
        .descendants()
        .filter(|n| n.is_element() && n.tag_name().name() == "ProjectReference")
    {
        let child_text = |tag: &str| {
            node.children()
                .find(|c| c.is_element() && c.tag_name().name() == tag)
                .and_then(|c| c.text())
                .map(str::trim)
                .filter(|t| !t.is_empty())
        };

        let Some(id) = child_text("Project").and_then(ProjectId::parse) else {
            continue;
        };
        if references.iter().any(|r| r.id == id) {
            continue;
        }

        let include = node.attribute("Include").unwrap_or_default();
        references.push(ProjectReference {
            id,
            path: normalize_path(&project_dir.join(host_path(include))),
            name: child_text("Name").map(str::to_string),
        });
    }
    references
}

fn detect_platform(properties: &Properties, assembly_refs: &[String]) -> TargetPlatform {
    if let Some(type_guids) = properties.get("ProjectTypeGuids") {
        let type_ids: Vec<ProjectId> = type_guids.split(';').filter_map(ProjectId::parse).collect();
        let has = |guid: &str| type_ids.iter().any(|id| id.as_str() == guid);
        if has(ANDROID_PROJECT_TYPE) {
            return TargetPlatform::Android;
        }
        if IOS_PROJECT_TYPES.iter().any(|guid| has(guid)) {
            return TargetPlatform::Ios;
        }
    }

    if properties.get("AndroidApplication").is_some() {
        return TargetPlatform::Android;
    }

    let references = |prefix: &str| {
        assembly_refs
            .iter()
            .any(|name| name.to_ascii_lowercase().starts_with(&prefix.to_ascii_lowercase()))
    };
    if references("Mono.Android") {
        return TargetPlatform::Android;
    }
    if references("Xamarin.iOS") {
        return TargetPlatform::Ios;
    }

    let frameworks = properties
        .get("TargetFramework")
        .or_else(|| properties.get("TargetFrameworks"))
        .unwrap_or_default()
        .to_ascii_lowercase();
    if frameworks.contains("android") {
        TargetPlatform::Android
    } else if frameworks.contains("ios") {
        TargetPlatform::Ios
    } else {
        TargetPlatform::Other
    }
}

fn detect_test_framework(assembly_refs: &[String]) -> Option<TestFramework> {
    let has = |name: &str| assembly_refs.iter().any(|r| r.eq_ignore_ascii_case(name));
    if has("Xamarin.UITest") {
        Some(TestFramework::XamarinUiTest)
    } else if has("nunit.framework") || has("NUnit") {
        Some(TestFramework::NUnit)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const APP_CSPROJ: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<Project DefaultTargets="Build" ToolsVersion="4.0" xmlns="http://schemas.microsoft.com/developer/msbuild/2003">
  <PropertyGroup>
    <Configuration Condition=" '$(Configuration)' == '' ">Debug</Configuration>
    <ProjectGuid>{1A2B3C4D-1111-2222-3333-444455556666}</ProjectGuid>
    <ProjectTypeGuids>{EFBA0AD7-5A72-4C68-AF49-83D382785DCF};{FAE04EC0-301F-11D3-BF4B-00C04F79EFBC}</ProjectTypeGuids>
    <OutputType>Library</OutputType>
    <AssemblyName>Droid.App</AssemblyName>
    <AndroidApplication>True</AndroidApplication>
  </PropertyGroup>
  <PropertyGroup Condition=" '$(Configuration)|$(Platform)' == 'Release|AnyCPU' ">
    <AssemblyName>Droid.App.Release</AssemblyName>
  </PropertyGroup>
  <ItemGroup>
    <Reference Include="Mono.Android" />
    <Reference Include="System" />
  </ItemGroup>
  <ItemGroup>
    <ProjectReference Include="..\Core\Core.csproj">
      <Project>{aaaaaaaa-bbbb-cccc-dddd-eeeeeeeeeeee}</Project>
      <Name>Core</Name>
    </ProjectReference>
  </ItemGroup>
</Project>
"#;

    const TEST_CSPROJ: &str = r#"<Project xmlns="http://schemas.microsoft.com/developer/msbuild/2003">
  <ItemGroup>
    <ProjectReference Include="../Droid/Droid.csproj">
      <Name>Droid</Name>
      <Project>{1A2B3C4D-1111-2222-3333-444455556666}</Project>
    </ProjectReference>
    <ProjectReference Include="..\NoGuid\NoGuid.csproj" />
  </ItemGroup>
  <PropertyGroup>
    <OutputType>Library</OutputType>
    <ProjectGuid>{99999999-8888-7777-6666-555555555555}</ProjectGuid>
  </PropertyGroup>
  <ItemGroup>
    <Reference Include="nunit.framework, Version=2.6.4.14350, Culture=neutral" />
    <Reference Include="Xamarin.UITest, Version=1.3.7.1588, Culture=neutral" />
  </ItemGroup>
</Project>
"#;

    fn write_project(dir: &Path, rel: &str, content: &str) -> PathBuf {
        let path = dir.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_parse_android_app() {
        let temp_dir = TempDir::new().unwrap();
        let path = write_project(temp_dir.path(), "Droid/Droid.csproj", APP_CSPROJ);

        let project = ProjectDescriptor::parse(&path, &BuildSettings::new("Debug", "AnyCPU")).unwrap();
        assert_eq!(project.id, ProjectId::parse("1A2B3C4D-1111-2222-3333-444455556666").unwrap());
        assert_eq!(project.name, "Droid");
        assert_eq!(project.assembly_name, "Droid.App");
        assert_eq!(project.platform, TargetPlatform::Android);
        assert_eq!(project.output_kind, OutputKind::Package);
        assert_eq!(project.output_type, "Library");
        assert!(!project.is_test());
        assert_eq!(project.references.len(), 1);
        assert_eq!(project.references[0].name.as_deref(), Some("Core"));
        assert_eq!(
            project.references[0].path,
            temp_dir.path().canonicalize().unwrap().join("Core").join("Core.csproj")
        );
    }

    #[test]
    fn test_conditioned_property_group_follows_query() {
        let temp_dir = TempDir::new().unwrap();
        let path = write_project(temp_dir.path(), "Droid/Droid.csproj", APP_CSPROJ);

        let release = ProjectDescriptor::parse(&path, &BuildSettings::new("Release", "AnyCPU")).unwrap();
        assert_eq!(release.assembly_name, "Droid.App.Release");
        assert_eq!(release.settings, BuildSettings::new("Release", "AnyCPU"));
    }

    #[test]
    fn test_parse_uitest_project_references_in_any_order() {
        let temp_dir = TempDir::new().unwrap();
        let path = write_project(temp_dir.path(), "UITests/UITests.csproj", TEST_CSPROJ);

        let project = ProjectDescriptor::parse(&path, &BuildSettings::new("Release", "AnyCPU")).unwrap();
        assert!(project.is_uitest());
        assert_eq!(project.platform, TargetPlatform::Other);
        assert_eq!(project.output_kind, OutputKind::Assembly);
        // The reference without a <Project> GUID is skipped.
        assert_eq!(project.references.len(), 1);
        assert!(project.references_project(
            &ProjectId::parse("{1a2b3c4d-1111-2222-3333-444455556666}").unwrap()
        ));
    }

    #[test]
    fn test_parse_leaf_project_without_references() {
        let content = r#"<Project>
  <PropertyGroup>
    <ProjectGuid>{12345678-1234-1234-1234-123456789012}</ProjectGuid>
    <OutputType>Library</OutputType>
  </PropertyGroup>
</Project>"#;
        let project = ProjectDescriptor::from_xml(
            content,
            Path::new("/src/Core/Core.csproj"),
            &BuildSettings::new("Release", "AnyCPU"),
        )
        .unwrap();
        assert!(project.references.is_empty());
        assert_eq!(project.test_framework, None);
    }

    #[test]
    fn test_missing_guid_is_malformed() {
        let content = "<Project><PropertyGroup><OutputType>Exe</OutputType></PropertyGroup></Project>";
        let err = ProjectDescriptor::from_xml(
            content,
            Path::new("/src/App.csproj"),
            &BuildSettings::new("Release", "AnyCPU"),
        )
        .unwrap_err();
        assert!(matches!(err, UiTestError::MalformedProjectFile { .. }));
        assert!(err.to_string().contains("ProjectGuid"));
    }

    #[test]
    fn test_missing_output_type_is_malformed() {
        let content = "<Project><PropertyGroup><ProjectGuid>{12345678-1234-1234-1234-123456789012}</ProjectGuid></PropertyGroup></Project>";
        let err = ProjectDescriptor::from_xml(
            content,
            Path::new("/src/App.csproj"),
            &BuildSettings::new("Release", "AnyCPU"),
        )
        .unwrap_err();
        assert!(err.to_string().contains("OutputType"));
    }

    #[test]
    fn test_invalid_xml_is_malformed() {
        let err = ProjectDescriptor::from_xml(
            "<Project><PropertyGroup>",
            Path::new("/src/App.csproj"),
            &BuildSettings::new("Release", "AnyCPU"),
        )
        .unwrap_err();
        assert!(matches!(err, UiTestError::MalformedProjectFile { .. }));
    }

    #[test]
    fn test_reparse_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let path = write_project(temp_dir.path(), "Droid/Droid.csproj", APP_CSPROJ);
        let settings = BuildSettings::new("Release", "AnyCPU");

        let first = ProjectDescriptor::parse(&path, &settings).unwrap();
        let second = ProjectDescriptor::parse(&first.path, &settings).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_condition_evaluation() {
        let settings = BuildSettings::new("Release", "AnyCPU");
        assert!(condition_applies(None, &settings));
        assert!(condition_applies(
            Some(" '$(Configuration)|$(Platform)' == 'Release|AnyCPU' "),
            &settings
        ));
        assert!(!condition_applies(
            Some(" '$(Configuration)|$(Platform)' == 'Debug|AnyCPU' "),
            &settings
        ));
        assert!(condition_applies(Some(" '$(Configuration)' != 'Debug' "), &settings));
        assert!(!condition_applies(Some("Exists('foo.props')"), &settings));
    }
}
