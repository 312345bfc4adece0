use std::fmt::Write;

use crate::models::job::{Job, JobResult};
use crate::services::api::asset_url;
use crate::view::{ViewSnapshot, ViewState};

pub const NOT_FOUND_MESSAGE: &str = "Job not found";

/// Render a view snapshot as plain text. Result paths are resolved against
/// `base_url`.
pub fn render(snapshot: &ViewSnapshot, base_url: &str) -> String {
    let mut out = String::new();

    match &snapshot.state {
        ViewState::Loading => out.push_str("Loading...\n"),
        ViewState::NotFound => {
            out.push_str(NOT_FOUND_MESSAGE);
            out.push('\n');
        }
        ViewState::Empty => render_upload_prompt(&mut out, snapshot.uploading),
        ViewState::Viewing(job) => render_job(&mut out, job, base_url, snapshot.polling),
    }

    out.push('\n');
    out.push_str(&render_recent(snapshot));
    out
}

fn render_upload_prompt(out: &mut String, uploading: bool) {
    out.push_str("Sheep Counter\n");
    out.push_str("Upload an image to count the number of sheep\n");
    if uploading {
        out.push_str("Uploading...\n");
    }
}

fn render_job(out: &mut String, job: &Job, base_url: &str, polling: bool) {
    out.push_str("Job Details\n");
    let _ = writeln!(out, "Filename: {}", job.filename);
    let _ = writeln!(out, "Status: {}", job.status.message());

    match &job.result {
        Some(JobResult::Detection(detection)) => {
            out.push_str("\nResults\n");
            let _ = writeln!(out, "Sheep Count: {}", detection.sheep_count);
            let _ = writeln!(out, "Duration: {:.2}s", detection.duration);
            let _ = writeln!(out, "Image: {}", asset_url(base_url, &detection.image));
            let _ = writeln!(out, "Report: {}", asset_url(base_url, &detection.report));
        }
        Some(JobResult::Failure { error }) => {
            let _ = writeln!(out, "Error: {error}");
        }
        None if polling => out.push_str("Checking for updates...\n"),
        None => {}
    }
}

/// The recent jobs list with its pager.
pub fn render_recent(snapshot: &ViewSnapshot) -> String {
    let mut out = String::new();
    out.push_str("Recent Jobs\n");
    if snapshot.recent.is_empty() {
        out.push_str("  (none)\n");
    }
    for job in &snapshot.recent {
        let _ = writeln!(out, "  {} - Status: {}", job.filename, job.status.message());
    }
    if snapshot.total_pages > 0 {
        let _ = writeln!(out, "Page {} of {}", snapshot.page, snapshot.total_pages);
    }
    out
}
