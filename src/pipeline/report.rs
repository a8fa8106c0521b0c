//! Run summary. Pure aggregation over state the stages already collected.

use crate::pipeline::classify::ClassificationGap;
use crate::pipeline::fetcher::FetchOutcome;
use crate::pipeline::units::{ExcludedMatch, Exclusions};
use crate::pipeline::upload::{RadarFailure, RebuildResponse, UploadOutcome};
use crate::pipeline::RunWindow;
use crate::types::DownloadUnit;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt::Write;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HubFailure {
    pub hub: String,
    pub status: Option<u16>,
    pub reason: String,
}

/// A unit that dropped out at some stage, with the last response recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnitFailure {
    pub hub: String,
    pub match_id: String,
    pub round_index: u32,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileFailure {
    pub directory: String,
    pub file_name: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub window: RunWindow,
    pub cancelled: bool,

    pub total_matches: usize,
    pub new_matches: usize,
    pub already_processed: usize,
    pub demos_downloaded: usize,
    pub failed_downloads: usize,
    pub demos_unzipped: usize,
    pub failed_unzips: usize,
    pub downloaded_bytes: u64,
    pub failed_parses: usize,
    pub files_uploaded: usize,
    pub failed_uploads: usize,

    pub failed_hubs: Vec<HubFailure>,
    pub missing_demo_url: Vec<ExcludedMatch>,
    pub missing_voting: Vec<ExcludedMatch>,
    pub download_failures: Vec<UnitFailure>,
    pub unzip_failures: Vec<UnitFailure>,
    pub parse_failures: Vec<UnitFailure>,
    pub upload_failures: Vec<FileFailure>,
    pub unknown_tag: Vec<ClassificationGap>,
    pub radar_failures: Vec<RadarFailure>,
    pub rebuild_responses: Vec<RebuildResponse>,
}

/// Everything the stages hand over at the end of a run.
pub struct ReportInput<'a> {
    pub run_id: &'a str,
    pub window: RunWindow,
    pub cancelled: bool,
    pub fetches: &'a [FetchOutcome],
    pub exclusions: &'a Exclusions,
    pub units: &'a [DownloadUnit],
    pub gaps: &'a [ClassificationGap],
    pub upload: &'a UploadOutcome,
}

pub struct ReportBuilder;

impl ReportBuilder {
    pub fn build(input: ReportInput<'_>) -> RunReport {
        let units = input.units;
        let active: Vec<&DownloadUnit> = units.iter().filter(|u| !u.skip).collect();

        let new_matches = active
            .iter()
            .map(|u| u.match_id.as_str())
            .collect::<HashSet<_>>()
            .len();

        let failed_hubs = input
            .fetches
            .iter()
            .filter_map(|f| {
                f.failure.as_ref().map(|reason| HubFailure {
                    hub: f.hub.display_name.clone(),
                    status: f.status,
                    reason: reason.clone(),
                })
            })
            .collect();

        let download_failures: Vec<UnitFailure> = active
            .iter()
            .filter(|u| !u.download_success)
            .map(|u| unit_failure(u, &u.download_response))
            .collect();

        let unzip_failures: Vec<UnitFailure> = active
            .iter()
            .filter(|u| u.download_success && !u.unzip_success)
            .map(|u| unit_failure(u, &u.unzip_response))
            .collect();

        let parse_failures: Vec<UnitFailure> = active
            .iter()
            .filter(|u| u.ready_for_parse() && !u.parse_success)
            .map(|u| unit_failure(u, &u.parse_response))
            .collect();

        let uploads = units.iter().flat_map(|u| u.uploads.iter());
        let upload_failures: Vec<FileFailure> = uploads
            .clone()
            .filter(|r| !r.success)
            .map(|r| FileFailure {
                directory: r.directory.clone(),
                file_name: r.file_name.clone(),
                reason: r.response.clone(),
            })
            .collect();

        RunReport {
            run_id: input.run_id.to_string(),
            window: input.window,
            cancelled: input.cancelled,
            total_matches: input.fetches.iter().map(|f| f.records.len()).sum(),
            new_matches,
            already_processed: units.len() - active.len(),
            demos_downloaded: active.iter().filter(|u| u.download_success).count(),
            failed_downloads: download_failures.len(),
            demos_unzipped: active.iter().filter(|u| u.unzip_success).count(),
            failed_unzips: unzip_failures.len(),
            downloaded_bytes: active.iter().map(|u| u.downloaded_bytes).sum(),
            failed_parses: parse_failures.len(),
            files_uploaded: uploads.filter(|r| r.success).count(),
            failed_uploads: upload_failures.len(),
            failed_hubs,
            missing_demo_url: input.exclusions.missing_demo_url.clone(),
            missing_voting: input.exclusions.missing_voting.clone(),
            download_failures,
            unzip_failures,
            parse_failures,
            upload_failures,
            unknown_tag: input.gaps.to_vec(),
            radar_failures: input.upload.radar_failures.clone(),
            rebuild_responses: input.upload.rebuild_responses.clone(),
        }
    }
}

fn unit_failure(unit: &DownloadUnit, reason: &str) -> UnitFailure {
    UnitFailure {
        hub: unit.hub.display_name.clone(),
        match_id: unit.match_id.clone(),
        round_index: unit.round_index,
        reason: reason.to_string(),
    }
}

impl RunReport {
    /// Plain-text form posted to the operators.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "Demo run {} ({} back to {}){}",
            self.run_id,
            self.window.from.format("%Y-%m-%d %H:%M UTC"),
            self.window.until.format("%Y-%m-%d %H:%M UTC"),
            if self.cancelled { " [cancelled]" } else { "" }
        );
        let _ = writeln!(out, "Total Matches: {}", self.total_matches);
        let _ = writeln!(out, "New Matches: {}", self.new_matches);
        let _ = writeln!(out, "Already Processed: {}", self.already_processed);
        let _ = writeln!(out, "Demos Downloaded: {}", self.demos_downloaded);
        let _ = writeln!(out, "Failed Downloads: {}", self.failed_downloads);
        let _ = writeln!(out, "Demos Unzipped: {}", self.demos_unzipped);
        let _ = writeln!(out, "Failed Unzips: {}", self.failed_unzips);
        let _ = writeln!(out, "Downloaded Size: {}", format_bytes(self.downloaded_bytes));
        let _ = writeln!(out, "Failed Parses: {}", self.failed_parses);
        let _ = writeln!(out, "Files Uploaded: {}", self.files_uploaded);
        let _ = writeln!(out, "Failed Uploads: {}", self.failed_uploads);

        section(&mut out, "Failed Hubs", &self.failed_hubs, |h| match h.status {
            Some(status) => format!("{} (status {}): {}", h.hub, status, h.reason),
            None => format!("{}: {}", h.hub, h.reason),
        });
        section(&mut out, "Missing Demo URL", &self.missing_demo_url, |m| {
            format!("{} {}", m.hub, m.match_id)
        });
        section(&mut out, "Missing Voting Data", &self.missing_voting, |m| {
            format!("{} {}", m.hub, m.match_id)
        });
        section(&mut out, "Failed Downloads", &self.download_failures, describe_unit);
        section(&mut out, "Failed Unzips", &self.unzip_failures, describe_unit);
        section(&mut out, "Failed Parses", &self.parse_failures, describe_unit);
        section(&mut out, "Failed Uploads", &self.upload_failures, |f| {
            format!("{}/{}: {}", f.directory, f.file_name, f.reason)
        });
        section(&mut out, "Unknown Tag", &self.unknown_tag, |g| {
            format!("{} {} ({}, started {})", g.hub, g.match_id, g.kind, g.started_at.format("%Y-%m-%d"))
        });
        section(&mut out, "Radar Failures", &self.radar_failures, |r| {
            format!("{} ({}): {}", r.map_name, r.directory, r.error)
        });
        section(&mut out, "Rebuild Responses", &self.rebuild_responses, |r| match r.status {
            Some(status) => format!("{} (status {}): {}", r.directory, status, r.response),
            None => format!("{}: {}", r.directory, r.response),
        });
        out
    }
}

fn describe_unit(u: &UnitFailure) -> String {
    format!("{} {} round {}: {}", u.hub, u.match_id, u.round_index, u.reason)
}

fn section<T>(out: &mut String, title: &str, items: &[T], line: impl Fn(&T) -> String) {
    if items.is_empty() {
        return;
    }
    let _ = writeln!(out, "\n{} ({}):", title, items.len());
    for item in items {
        let _ = writeln!(out, "- {}", line(item));
    }
}

pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.2} {}", value, UNITS[unit])
    }
}
