use std::fmt::Display;
use std::path::PathBuf;

use crate::probe::MediaMetadata;
use crate::settings::EncodeSettings;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(pub u64);

impl Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SkipReason {
    MissingFile,
    NoAudio,
}

impl Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::MissingFile => write!(f, "no file"),
            SkipReason::NoAudio => write!(f, "no audio"),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum JobStatus {
    Pending,
    Running,
    Done,
    Failed(String),
    Cancelled,
    Skipped(SkipReason),
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Pending | JobStatus::Running)
    }
}

impl Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "☐"),
            JobStatus::Running => write!(f, "🚧"),
            JobStatus::Done => write!(f, "✅"),
            JobStatus::Failed(reason) => write!(f, "🚫 {}", reason),
            JobStatus::Cancelled => write!(f, "⏹"),
            JobStatus::Skipped(reason) => write!(f, "⏩ {}", reason),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Job {
    pub id: JobId,
    pub path: PathBuf,
    pub duration_seconds: f64,
    pub metadata: MediaMetadata,
    pub selected_audio_track: usize,
    pub settings_override: Option<EncodeSettings>,
    pub status: JobStatus,
    pub progress_percent: u8,
    pub output_path: Option<PathBuf>,
}

impl Job {
    pub fn new(id: JobId, path: PathBuf, metadata: MediaMetadata) -> Self {
        Job {
            id,
            path,
            duration_seconds: metadata.progress_duration(),
            metadata,
            selected_audio_track: 0,
            settings_override: None,
            status: JobStatus::Pending,
            progress_percent: 0,
            output_path: None,
        }
    }

    pub fn uses_global_settings(&self) -> bool {
        self.settings_override.is_none()
    }
}

impl Display for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let resolution = match &self.metadata.video {
            None => String::from("----x----"),
            Some(v) => format!("{:<9}", v.resolution.to_string()),
        };
        write!(f, "{} {} {:>3}% {}", self.status, resolution, self.progress_percent, self.path.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_job_is_pending() {
        let job = Job::new(JobId(7), PathBuf::from("/videos/a.mkv"), MediaMetadata::empty());
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.progress_percent, 0);
        assert_eq!(job.duration_seconds, 1.0);
        assert!(job.output_path.is_none());
        assert!(job.uses_global_settings());
    }

    #[test]
    fn test_status_display() {
        assert_eq!(JobStatus::Skipped(SkipReason::NoAudio).to_string(), "⏩ no audio");
        assert_eq!(JobStatus::Failed(String::from("ffmpeg exited with 1")).to_string(), "🚫 ffmpeg exited with 1");
        assert!(JobStatus::Cancelled.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
    }

    #[test]
    fn test_job_display() {
        let mut job = Job::new(JobId(3), PathBuf::from("/videos/a.mkv"), MediaMetadata::empty());
        assert_eq!(job.to_string(), "☐ ----x----   0% /videos/a.mkv");
        job.status = JobStatus::Done;
        job.progress_percent = 100;
        assert_eq!(job.to_string(), "✅ ----x---- 100% /videos/a.mkv");
    }
}
