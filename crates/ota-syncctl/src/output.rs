//! Output formatting for CLI results
//!
//! Three output formats are supported:
//! - Table: Human-readable tables (default)
//! - JSON: Structured JSON for scripting
//! - Quiet: No output, exit codes only

use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use comfy_table::{presets::UTF8_FULL, Table};
use serde::Serialize;

use ota_sync::{CheckInterval, RefreshOutcome, SessionState, UpdateRecord};

use crate::ExitCode;

/// Output format options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
    Quiet,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "table" => Ok(Self::Table),
            "json" => Ok(Self::Json),
            "quiet" => Ok(Self::Quiet),
            _ => Err(format!("Unknown output format: {s}")),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Table => write!(f, "table"),
            Self::Json => write!(f, "json"),
            Self::Quiet => write!(f, "quiet"),
        }
    }
}

/// Standard JSON response wrapper
#[derive(Serialize)]
pub struct JsonResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// ISO 8601 timestamp
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
}

impl<T: Serialize> JsonResponse<T> {
    pub fn success_with_command(data: T, command: &str) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            timestamp: Utc::now().to_rfc3339(),
            command: Some(command.to_string()),
        }
    }
}

impl JsonResponse<()> {
    pub fn error_with_command(message: &str, command: &str) -> JsonResponse<()> {
        JsonResponse {
            success: false,
            data: None,
            error: Some(message.to_string()),
            timestamp: Utc::now().to_rfc3339(),
            command: Some(command.to_string()),
        }
    }
}

/// Snapshot printed by `status`
#[derive(Debug, Clone)]
pub struct StatusReport {
    pub manifest_url: String,
    pub last_check: Option<DateTime<Utc>>,
    pub check_interval: CheckInterval,
    pub session: SessionState,
}

/// Formats output for different modes
pub struct OutputFormatter {
    format: OutputFormat,
    verbose: bool,
}

impl OutputFormatter {
    pub fn new(format: OutputFormat, verbose: bool) -> Self {
        Self { format, verbose }
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    pub fn is_quiet(&self) -> bool {
        self.format == OutputFormat::Quiet
    }

    /// Format the update list
    pub fn format_updates(&self, updates: &[UpdateRecord]) -> String {
        match self.format {
            OutputFormat::Table => self.updates_table(updates),
            OutputFormat::Json => {
                let data: Vec<UpdateOutput> = updates.iter().map(UpdateOutput::from).collect();
                self.to_json_response(&data, "list")
            }
            OutputFormat::Quiet => String::new(),
        }
    }

    /// Format the outcome of a check
    pub fn format_outcome(&self, outcome: &RefreshOutcome) -> String {
        match self.format {
            OutputFormat::Table => {
                if outcome.deferred {
                    return "Check queued until the update worker is available.".to_string();
                }
                let headline = match outcome.signal {
                    Some(signal) => signal.message().to_string(),
                    None if outcome.any_new => "New updates found".to_string(),
                    None => "No new updates found".to_string(),
                };
                if self.verbose {
                    format!("{headline} ({} known)", outcome.update_count)
                } else {
                    headline
                }
            }
            OutputFormat::Json => self.to_json_response(&OutcomeOutput::from(outcome), "check"),
            OutputFormat::Quiet => String::new(),
        }
    }

    /// Format the `status` report
    pub fn format_status(&self, report: &StatusReport) -> String {
        match self.format {
            OutputFormat::Table => {
                let mut table = Table::new();
                table.load_preset(UTF8_FULL);
                table.set_header(vec!["Property", "Value"]);
                table.add_row(vec!["Manifest URL", &report.manifest_url]);
                table.add_row(vec![
                    "Last Check",
                    &report
                        .last_check
                        .map(format_datetime)
                        .unwrap_or_else(|| "Never".to_string()),
                ]);
                table.add_row(vec!["Check Interval", &report.check_interval.to_string()]);
                table.add_row(vec![
                    "Watched Update",
                    report.session.active_id.as_deref().unwrap_or("-"),
                ]);
                table.add_row(vec![
                    "Watched Status",
                    report.session.active_status_name.as_deref().unwrap_or("-"),
                ]);
                table.to_string()
            }
            OutputFormat::Json => self.to_json_response(&StatusOutput::from(report), "status"),
            OutputFormat::Quiet => String::new(),
        }
    }

    pub fn format_interval(&self, interval: CheckInterval) -> String {
        match self.format {
            OutputFormat::Table => format!("Check interval: {interval}"),
            OutputFormat::Json => self.to_json_response(
                &serde_json::json!({ "check_interval": interval }),
                "interval",
            ),
            OutputFormat::Quiet => String::new(),
        }
    }

    /// Format an error together with its exit code
    pub fn format_error_with_code(&self, error: &dyn std::error::Error, code: ExitCode, command: &str) -> String {
        match self.format {
            OutputFormat::Table => format!("Error: {error}"),
            OutputFormat::Json => {
                let response = JsonResponse::error_with_command(&error.to_string(), command);
                let mut output = serde_json::to_value(&response).unwrap_or_default();
                output["exit_code"] = serde_json::json!(code as i32);
                output["exit_code_name"] = serde_json::json!(code.name());
                self.to_json(&output)
            }
            OutputFormat::Quiet => String::new(),
        }
    }

    /// Progress message (verbose table mode only)
    pub fn progress(&self, message: &str) {
        if self.verbose && self.format == OutputFormat::Table {
            eprintln!("... {message}");
        }
    }

    pub fn success(&self, message: &str) {
        if self.format == OutputFormat::Table {
            println!("✓ {message}");
        }
    }

    fn to_json<T: Serialize>(&self, value: &T) -> String {
        serde_json::to_string_pretty(value).unwrap_or_else(|e| format!("{{\"error\": \"{e}\"}}"))
    }

    fn to_json_response<T: Serialize>(&self, value: &T, command: &str) -> String {
        self.to_json(&JsonResponse::success_with_command(value, command))
    }

    fn updates_table(&self, updates: &[UpdateRecord]) -> String {
        if updates.is_empty() {
            return "No updates found.".to_string();
        }

        let mut table = Table::new();
        table.load_preset(UTF8_FULL);
        let mut header = vec!["ID", "Version", "Build Date", "Size", "Status", "Online"];
        if self.verbose {
            header.push("Name");
        }
        table.set_header(header);

        for update in updates {
            let progress = match update.status {
                ota_sync::UpdateStatus::Downloading | ota_sync::UpdateStatus::Paused => {
                    format!("{} ({}%)", update.status, update.download_progress)
                }
                ota_sync::UpdateStatus::Installing => {
                    format!("{} ({}%)", update.status, update.install_progress)
                }
                status => status.to_string(),
            };
            let mut row = vec![
                short_id(&update.id),
                update.version.clone(),
                format_timestamp(update.timestamp),
                format_size(update.file_size),
                progress,
                if update.available_online { "yes" } else { "no" }.to_string(),
            ];
            if self.verbose {
                row.push(update.name.clone());
            }
            table.add_row(row);
        }

        table.to_string()
    }
}

fn short_id(id: &str) -> String {
    id.chars().take(12).collect()
}

fn format_datetime(datetime: DateTime<Utc>) -> String {
    datetime.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

fn format_timestamp(secs: i64) -> String {
    match Utc.timestamp_opt(secs, 0).single() {
        Some(datetime) => datetime.format("%Y-%m-%d").to_string(),
        None => "-".to_string(),
    }
}

fn format_size(bytes: u64) -> String {
    const MIB: f64 = 1024.0 * 1024.0;
    if bytes as f64 >= 1024.0 * MIB {
        format!("{:.1} GiB", bytes as f64 / (1024.0 * MIB))
    } else {
        format!("{:.1} MiB", bytes as f64 / MIB)
    }
}

// JSON output structures

#[derive(Serialize)]
struct UpdateOutput {
    id: String,
    name: String,
    version: String,
    timestamp: i64,
    build_date: String,
    file_size: u64,
    status: String,
    download_progress: u8,
    install_progress: u8,
    available_online: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    local_file: Option<String>,
}

impl From<&UpdateRecord> for UpdateOutput {
    fn from(record: &UpdateRecord) -> Self {
        Self {
            id: record.id.clone(),
            name: record.name.clone(),
            version: record.version.clone(),
            timestamp: record.timestamp,
            build_date: format_timestamp(record.timestamp),
            file_size: record.file_size,
            status: record.status.name().to_string(),
            download_progress: record.download_progress,
            install_progress: record.install_progress,
            available_online: record.available_online,
            local_file: record
                .local_file_path
                .as_ref()
                .map(|p| p.display().to_string()),
        }
    }
}

#[derive(Serialize)]
struct OutcomeOutput {
    any_new: bool,
    update_count: usize,
    deferred: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    newest: Option<String>,
}

impl From<&RefreshOutcome> for OutcomeOutput {
    fn from(outcome: &RefreshOutcome) -> Self {
        Self {
            any_new: outcome.any_new,
            update_count: outcome.update_count,
            deferred: outcome.deferred,
            message: outcome.signal.map(|s| s.message().to_string()),
            newest: outcome.newest.clone(),
        }
    }
}

#[derive(Serialize)]
struct StatusOutput {
    manifest_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_check: Option<String>,
    check_interval: CheckInterval,
    #[serde(skip_serializing_if = "Option::is_none")]
    active_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    active_status: Option<String>,
}

impl From<&StatusReport> for StatusOutput {
    fn from(report: &StatusReport) -> Self {
        Self {
            manifest_url: report.manifest_url.clone(),
            last_check: report.last_check.map(|t| t.to_rfc3339()),
            check_interval: report.check_interval,
            active_id: report.session.active_id.clone(),
            active_status: report.session.active_status_name.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ota_sync::{RefreshSignal, UpdateStatus};

    fn record(id: &str, status: UpdateStatus) -> UpdateRecord {
        let mut record = UpdateRecord::new(id, 1_704_067_200);
        record.version = "14.0".to_string();
        record.file_size = 1_288_490_189;
        record.status = status;
        record.download_progress = 42;
        record.available_online = true;
        record
    }

    #[test]
    fn test_output_format_parse() {
        assert_eq!("JSON".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert_eq!("table".parse::<OutputFormat>().unwrap(), OutputFormat::Table);
        assert!("yaml".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_updates_table_shows_progress() {
        let formatter = OutputFormatter::new(OutputFormat::Table, false);
        let output = formatter.format_updates(&[record("abc", UpdateStatus::Downloading)]);
        assert!(output.contains("DOWNLOADING (42%)"));
        assert!(output.contains("2024-01-01"));
        assert!(output.contains("1.2 GiB"));
    }

    #[test]
    fn test_empty_update_list() {
        let formatter = OutputFormatter::new(OutputFormat::Table, false);
        assert_eq!(formatter.format_updates(&[]), "No updates found.");
    }

    #[test]
    fn test_updates_json_schema() {
        let formatter = OutputFormatter::new(OutputFormat::Json, false);
        let output = formatter.format_updates(&[record("abc", UpdateStatus::Verified)]);
        let value: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(value["success"], true);
        assert_eq!(value["command"], "list");
        assert_eq!(value["data"][0]["status"], "VERIFIED");
        assert_eq!(value["data"][0]["available_online"], true);
    }

    #[test]
    fn test_outcome_messages() {
        let formatter = OutputFormatter::new(OutputFormat::Table, false);
        let outcome = RefreshOutcome {
            any_new: false,
            update_count: 3,
            signal: Some(RefreshSignal::NothingChangedAgain),
            deferred: false,
            newest: None,
        };
        assert_eq!(
            formatter.format_outcome(&outcome),
            RefreshSignal::NothingChangedAgain.message()
        );
    }

    #[test]
    fn test_status_json() {
        let formatter = OutputFormatter::new(OutputFormat::Json, false);
        let report = StatusReport {
            manifest_url: "https://updates.example.org/u.json".to_string(),
            last_check: None,
            check_interval: CheckInterval::Weekly,
            session: SessionState::new("X", UpdateStatus::Installing),
        };
        let value: serde_json::Value = serde_json::from_str(&formatter.format_status(&report)).unwrap();
        assert_eq!(value["data"]["check_interval"], "weekly");
        assert_eq!(value["data"]["active_status"], "INSTALLING");
        assert!(value["data"].get("last_check").is_none());
    }

    #[test]
    fn test_quiet_prints_nothing() {
        let formatter = OutputFormatter::new(OutputFormat::Quiet, true);
        assert!(formatter.format_updates(&[record("a", UpdateStatus::Available)]).is_empty());
        assert!(formatter.format_interval(CheckInterval::Daily).is_empty());
    }

    #[test]
    fn test_error_json_carries_exit_code() {
        let formatter = OutputFormatter::new(OutputFormat::Json, false);
        let err = ota_sync::SyncError::Busy;
        let output = formatter.format_error_with_code(&err, ExitCode::Busy, "check");
        let value: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(value["success"], false);
        assert_eq!(value["exit_code"], 3);
        assert_eq!(value["exit_code_name"], "BUSY");
    }
}
