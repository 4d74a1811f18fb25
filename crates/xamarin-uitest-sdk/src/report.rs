//! Test-runner output interpretation.
//!
//! Two sources, two strategies:
//!
//! - The XML result report (`TestResult.xml`) is parsed with a real XML
//!   parser. Every `test-case` whose `result` is a failed state becomes a
//!   [`TestFailure`].
//! - When no report exists, the console output is scanned for the runner's
//!   summary line ([`parse_summary_counts`]).

use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;

/// `result` attribute values that mark a failed test case (NUnit 3 and NUnit 2).
const FAILED_RESULTS: [&str; 3] = ["Failed", "Failure", "Error"];

// NUnit 2 console:
//   Tests run: 5, Errors: 0, Failures: 2, Inconclusive: 0, Time: 12.3 seconds
//     Not run: 0, Invalid: 0, Ignored: 0, Skipped: 0
static NUNIT2_SUMMARY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"Tests run: (?P<total>\d+), Errors: (?P<errors>\d+), Failures: (?P<failures>\d+), Inconclusive: (?P<inconclusive>\d+), Time: (?P<time>\S+) seconds\s+Not run: (?P<not_run>\d+), Invalid: (?P<invalid>\d+), Ignored: (?P<ignored>\d+), Skipped: (?P<skipped>\d+)",
    )
    .expect("NUnit 2 summary pattern is valid")
});

// NUnit 3 console:
//   Test Count: 5, Passed: 3, Failed: 2, Warnings: 0, Inconclusive: 0, Skipped: 0
static NUNIT3_SUMMARY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"Test Count: (?P<total>\d+), Passed: (?P<passed>\d+), Failed: (?P<failures>\d+), Warnings: (?P<warnings>\d+), Inconclusive: (?P<inconclusive>\d+), Skipped: (?P<skipped>\d+)",
    )
    .expect("NUnit 3 summary pattern is valid")
});

/// One failing test case from the result report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestFailure {
    pub name: String,
    pub message: Option<String>,
    pub stack_trace: Option<String>,
}

/// The parts of a result report the pipeline consumes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResultReport {
    /// Number of `test-case` elements.
    pub test_cases: usize,
    pub failures: Vec<TestFailure>,
}

impl ResultReport {
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// Parses the runner's XML result report.
///
/// Returns the XML parser's message when the document is not well-formed.
pub fn parse_result_report(xml: &str) -> Result<ResultReport, String> {
    let xml = xml.trim_start_matches('\u{feff}');
    let document = roxmltree::Document::parse(xml).map_err(|e| e.to_string())?;

    let mut report = ResultReport::default();
    for case in document
        .descendants()
        .filter(|n| n.is_element() && n.tag_name().name() == "test-case")
    {
        report.test_cases += 1;

        let failed = case
            .attribute("result")
            .is_some_and(|r| FAILED_RESULTS.iter().any(|f| r.eq_ignore_ascii_case(f)));
        if !failed {
            continue;
        }

        let failure = case
            .children()
            .find(|n| n.is_element() && n.tag_name().name() == "failure");
        let text_of = |tag: &str| {
            failure
                .and_then(|f| f.children().find(|n| n.is_element() && n.tag_name().name() == tag))
                .and_then(|n| n.text())
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
        };

        report.failures.push(TestFailure {
            name: case
                .attribute("fullname")
                .or_else(|| case.attribute("name"))
                .unwrap_or("<unnamed test>")
                .to_string(),
            message: text_of("message"),
            stack_trace: text_of("stack-trace"),
        });
    }
    Ok(report)
}

/// Aggregate counts from the runner's console summary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SummaryCounts {
    pub total: u32,
    pub errors: u32,
    pub failures: u32,
    pub inconclusive: u32,
    pub not_run: u32,
    pub invalid: u32,
    pub ignored: u32,
    pub skipped: u32,
}

impl SummaryCounts {
    /// Whether any test errored or failed.
    pub fn is_failing(&self) -> bool {
        self.errors > 0 || self.failures > 0
    }
}

/// Finds the runner's summary in console output (NUnit 2 or NUnit 3 format).
pub fn parse_summary_counts(output: &str) -> Option<SummaryCounts> {
    let number = |caps: &regex::Captures<'_>, name: &str| {
        caps.name(name)
            .and_then(|m| m.as_str().parse::<u32>().ok())
            .unwrap_or(0)
    };

    if let Some(caps) = NUNIT2_SUMMARY.captures(output) {
        return Some(SummaryCounts {
            total: number(&caps, "total"),
            errors: number(&caps, "errors"),
            failures: number(&caps, "failures"),
            inconclusive: number(&caps, "inconclusive"),
            not_run: number(&caps, "not_run"),
            invalid: number(&caps, "invalid"),
            ignored: number(&caps, "ignored"),
            skipped: number(&caps, "skipped"),
        });
    }

    NUNIT3_SUMMARY.captures(output).map(|caps| SummaryCounts {
        total: number(&caps, "total"),
        failures: number(&caps, "failures"),
        inconclusive: number(&caps, "inconclusive"),
        skipped: number(&caps, "skipped"),
        ..SummaryCounts::default()
    })
}
