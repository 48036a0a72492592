//! Output formatters for test results
//!
//! Provides table, JSON, CSV and summary output formats.

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::{RunSummary, TestOutcome, TestResult};

/// Output format options
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
    JsonPretty,
    Csv,
    Summary,
}

impl OutputFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "table" => Some(OutputFormat::Table),
            "json" => Some(OutputFormat::Json),
            "json-pretty" | "jsonpretty" => Some(OutputFormat::JsonPretty),
            "csv" => Some(OutputFormat::Csv),
            "summary" => Some(OutputFormat::Summary),
            _ => None,
        }
    }
}

/// Run summary stamped with the time the report was produced
#[derive(Serialize)]
struct Report<'a> {
    generated_at: DateTime<Utc>,
    #[serde(flatten)]
    summary: &'a RunSummary,
}

/// Flattened CSV row
#[derive(Serialize)]
struct CsvRow<'a> {
    binary: &'a str,
    method: &'a str,
    data_row: Option<usize>,
    outcome: String,
    target: &'a str,
    duration_ms: u64,
    inconclusive: bool,
    message: String,
}

/// Result formatter
pub struct ResultFormatter {
    format: OutputFormat,
    colorize: bool,
}

impl ResultFormatter {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            colorize: true,
        }
    }

    pub fn no_color(mut self) -> Self {
        self.colorize = false;
        self
    }

    /// Format a single test result as it arrives
    pub fn format_result(&self, result: &TestResult) -> String {
        match self.format {
            OutputFormat::Table => self.format_result_table(result),
            OutputFormat::Json | OutputFormat::JsonPretty => {
                serde_json::to_string(result).unwrap_or_default()
            }
            OutputFormat::Csv => self.format_result_csv(result),
            OutputFormat::Summary => format!("{} {}", result.outcome.symbol(), result.case),
        }
    }

    fn status(&self, outcome: TestOutcome) -> String {
        let label = format!("{} {}", outcome.symbol(), outcome);
        if !self.colorize {
            return label;
        }
        let color = match outcome {
            TestOutcome::Passed => "32",
            TestOutcome::Failed => "31",
            TestOutcome::Skipped => "33",
            TestOutcome::NotFound | TestOutcome::None => "35",
        };
        format!("\x1b[{color}m{label}\x1b[0m")
    }

    fn format_result_table(&self, result: &TestResult) -> String {
        let mut line = format!(
            "{:48} {:12} {:24} [{:>6}ms]",
            result.display_name,
            self.status(result.outcome),
            result.target.as_deref().unwrap_or("-"),
            result.duration_ms
        );
        if result.inconclusive {
            line.push_str(" (inconclusive)");
        }
        if let Some(message) = result.messages.first() {
            line.push_str(&format!(" {message}"));
        }
        line
    }

    fn format_result_csv(&self, result: &TestResult) -> String {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(Vec::new());
        if writer.serialize(csv_row(result)).is_err() {
            return String::new();
        }
        writer
            .into_inner()
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok())
            .map(|s| s.trim_end().to_string())
            .unwrap_or_default()
    }

    /// Format a complete run
    pub fn format_summary(&self, summary: &RunSummary) -> String {
        let report = Report {
            generated_at: Utc::now(),
            summary,
        };
        match self.format {
            OutputFormat::Table => self.format_summary_table(summary),
            OutputFormat::Json => serde_json::to_string(&report).unwrap_or_default(),
            OutputFormat::JsonPretty => serde_json::to_string_pretty(&report).unwrap_or_default(),
            OutputFormat::Csv => self.format_summary_csv(summary),
            OutputFormat::Summary => self.format_summary_brief(summary),
        }
    }

    fn format_summary_table(&self, summary: &RunSummary) -> String {
        let mut output = String::new();

        output.push_str("\n══════════════════════════════════════════════════════════════════════\n");
        output.push_str(&format!(
            " Test run {} | {} target(s) discovered\n",
            Utc::now().format("%Y-%m-%d %H:%M:%S UTC"),
            summary.targets_discovered
        ));
        output.push_str("══════════════════════════════════════════════════════════════════════\n");

        for result in &summary.results {
            output.push_str(&format!(" {}\n", self.format_result_table(result)));
        }

        output.push_str("──────────────────────────────────────────────────────────────────────\n");

        let pass_str = if self.colorize {
            format!("\x1b[32m{}\x1b[0m", summary.passed)
        } else {
            summary.passed.to_string()
        };
        let fail_str = if self.colorize && summary.failed > 0 {
            format!("\x1b[31m{}\x1b[0m", summary.failed)
        } else {
            summary.failed.to_string()
        };

        output.push_str(&format!(
            " Total: {} | Pass: {} | Fail: {} | Skip: {} | Not found: {}\n",
            summary.total, pass_str, fail_str, summary.skipped, summary.not_found
        ));
        output.push_str(&format!(
            " Pass Rate: {:5.1}% | Duration: {}ms{}\n",
            summary.pass_rate(),
            summary.total_duration_ms,
            if summary.cancelled { " | cancelled" } else { "" }
        ));

        output
    }

    fn format_summary_csv(&self, summary: &RunSummary) -> String {
        let mut writer = csv::Writer::from_writer(Vec::new());
        for result in &summary.results {
            if writer.serialize(csv_row(result)).is_err() {
                return String::new();
            }
        }
        writer
            .into_inner()
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok())
            .unwrap_or_default()
    }

    fn format_summary_brief(&self, summary: &RunSummary) -> String {
        format!(
            "{}/{} passed ({:.1}%), {} failed, {} skipped on {} target(s) in {}ms{}",
            summary.passed,
            summary.total,
            summary.pass_rate(),
            summary.failed,
            summary.skipped,
            summary.targets_discovered,
            summary.total_duration_ms,
            if summary.cancelled { " (cancelled)" } else { "" }
        )
    }
}

impl Default for ResultFormatter {
    fn default() -> Self {
        Self::new(OutputFormat::Table)
    }
}

fn csv_row(result: &TestResult) -> CsvRow<'_> {
    CsvRow {
        binary: &result.case.binary,
        method: &result.case.method,
        data_row: result.case.data_row,
        outcome: result.outcome.to_string(),
        target: result.target.as_deref().unwrap_or(""),
        duration_ms: result.duration_ms,
        inconclusive: result.inconclusive,
        message: result.messages.join(" | "),
    }
}

/// Write a run summary to a file
pub fn write_results_to_file(
    path: impl AsRef<std::path::Path>,
    summary: &RunSummary,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let path = path.as_ref();
    let content = ResultFormatter::new(format).no_color().format_summary(summary);
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write results: {}", path.display()))
}
