use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Receiver;
use human_repr::HumanCount;
use kdam::{term, tqdm, Bar, BarExt};
use tracing::warn;

use crate::job::{JobId, JobStatus};
use crate::probe::MediaMetadata;
use crate::runner::{ProgressReport, RunEvent, RunOutcome, RunSummary};

/// Two stacked bars: the whole queue on top, the current file below.
pub struct ProgressDisplay {
    queue_bar: Bar,
    file_bar: Bar,
    current: Option<(JobId, PathBuf, PathBuf)>,
}

impl ProgressDisplay {
    pub fn new() -> Self {
        term::init(false);
        ProgressDisplay {
            queue_bar: tqdm!(total = 100, desc = "queue", unit = "%", position = 0, force_refresh = true),
            file_bar: tqdm!(total = 100, desc = "waiting", unit = "%", position = 1, force_refresh = true),
            current: None,
        }
    }

    /// Renders events until the run finishes or the runner goes away.
    pub fn run(mut self, events: Receiver<RunEvent>) {
        for event in events {
            self.handle(&event);
            if matches!(event, RunEvent::RunFinished(_)) {
                break;
            }
        }
    }

    pub fn handle(&mut self, event: &RunEvent) {
        match event {
            RunEvent::RunStarted { jobs, total_duration } => {
                self.queue_bar.set_description(format!("queue: {} files, {}", jobs, clock(*total_duration)));
                self.refresh();
            },
            RunEvent::JobStarted { id, path, output, settings } => {
                self.file_bar.reset(Some(100));
                self.file_bar.set_description(format!("{} {}", id, file_name(path)));
                self.write(format!("{} {} -> {} [{}]", id, file_name(path), output.display(), settings));
                self.current = Some((*id, path.clone(), output.clone()));
            },
            RunEvent::JobProgress(report) => {
                self.file_bar.set_postfix(postfix(report));
                if let Err(err) = self.file_bar.update_to(report.job_percent as usize) {
                    warn!("{}", err);
                }
                if let Err(err) = self.queue_bar.update_to(report.queue_percent as usize) {
                    warn!("{}", err);
                }
            },
            RunEvent::EngineLine { line, .. } => self.write(format!("  {}", line)),
            RunEvent::JobFinished { id, status } => {
                let (path, output) = match &self.current {
                    Some((current, path, output)) if current == id => (Some(path.clone()), Some(output.clone())),
                    _ => (None, None),
                };
                let output_size = match (status, &output) {
                    (JobStatus::Done, Some(output)) => fs::metadata(output).map(|m| m.len()).ok(),
                    _ => None,
                };
                let name = path.as_deref().map(file_name).unwrap_or_default();
                self.write(job_line(*id, &name, status, output.as_deref(), output_size));
            },
            RunEvent::RunFinished(summary) => self.finish(summary),
        }
    }

    fn finish(&mut self, summary: &RunSummary) {
        self.refresh();
        eprintln!("\n\n{}", summary_line(summary));
    }

    fn refresh(&mut self) {
        if let Err(err) = self.queue_bar.refresh() {
            warn!("{}", err);
        }
        if let Err(err) = self.file_bar.refresh() {
            warn!("{}", err);
        }
    }

    fn write(&mut self, line: String) {
        if let Err(err) = self.queue_bar.write(line) {
            warn!("{}", err);
        }
    }
}

impl Default for ProgressDisplay {
    fn default() -> Self {
        ProgressDisplay::new()
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// `h:mm:ss`
pub fn clock(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 { seconds as u64 } else { 0 };
    format!("{}:{:02}:{:02}", total / 3600, total / 60 % 60, total % 60)
}

pub fn postfix(report: &ProgressReport) -> String {
    let mut parts = vec![clock(report.elapsed_seconds)];
    if let Some(speed) = report.speed {
        parts.push(format!("{:.2}x", speed));
    }
    if let Some(fps) = report.fps {
        parts.push(format!("{:.1} fps", fps));
    }
    if let Some(wall) = report.wall_seconds {
        parts.push(format!("⏱ {}", clock(wall)));
    }
    parts.join(" ")
}

pub fn job_line(id: JobId, name: &str, status: &JobStatus, output: Option<&Path>, output_size: Option<u64>) -> String {
    match (status, output, output_size) {
        (JobStatus::Done, Some(output), Some(size)) =>
            format!("{} {} {} -> {} ({})", status, id, name, file_name(output), size.human_count_bytes()),
        _ => format!("{} {} {}", id, name, status_word(status)),
    }
}

fn status_word(status: &JobStatus) -> String {
    match status {
        JobStatus::Pending => String::from("pending"),
        JobStatus::Running => String::from("running"),
        JobStatus::Done => String::from("done"),
        JobStatus::Failed(reason) => format!("failed: {}", reason),
        JobStatus::Cancelled => String::from("cancelled"),
        JobStatus::Skipped(reason) => format!("skipped ({})", reason),
    }
}

pub fn summary_line(summary: &RunSummary) -> String {
    let head = match summary.outcome {
        RunOutcome::Completed => "finished",
        RunOutcome::Cancelled => "cancelled",
    };
    format!("{}: {} done, {} failed, {} skipped, {} cancelled, {} not started",
        head, summary.done, summary.failed, summary.skipped, summary.cancelled, summary.not_started)
}

/// One line per audio track, for `--list-tracks`.
pub fn track_listing(path: &Path, metadata: &MediaMetadata) -> String {
    let mut out = format!("{} ({}", path.display(), clock(metadata.duration_seconds));
    if let Some(size) = metadata.file_size {
        out.push_str(&format!(", {}", size.human_count_bytes()));
    }
    if let Some(video) = &metadata.video {
        out.push_str(&format!(", {} {}", video.codec, video.resolution));
        if let Some(pix_fmt) = &video.pix_fmt {
            out.push_str(&format!(" {}", pix_fmt));
        }
        if let Some(color_space) = &video.color_space {
            out.push_str(&format!("/{}", color_space));
        }
        out.push_str(&format!(" {}", video.hdr));
    }
    out.push(')');
    if metadata.audio_tracks.is_empty() {
        out.push_str("\n  no audio tracks");
    }
    for track in &metadata.audio_tracks {
        out.push_str(&format!("\n  {}", track));
    }
    out
}
