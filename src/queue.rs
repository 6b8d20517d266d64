use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver};
use std::thread;
use tracing::{info, warn};

use crate::error::{ProbeError, QueueError};
use crate::fstools::{classify_file, DirEntryCategory};
use crate::job::{Job, JobId, JobStatus};
use crate::probe::{MediaMetadata, Prober};
use crate::settings::EncodeSettings;

/// Result of probing one path off the interactive thread.
pub struct ProbedFile {
    pub path: PathBuf,
    pub metadata: Result<MediaMetadata, ProbeError>,
}

/// Ordered list of jobs. Mutations are refused while a run is active.
#[derive(Debug, Default)]
pub struct JobQueue {
    jobs: Vec<Job>,
    next_id: u64,
    running: bool,
}

impl JobQueue {
    pub fn new() -> Self {
        JobQueue::default()
    }

    /// Probes `path` and appends a pending job for it.
    pub fn add(&mut self, path: &Path, prober: &dyn Prober) -> Result<JobId, QueueError> {
        self.ensure_idle()?;
        if !matches!(classify_file(path), DirEntryCategory::RegularFile) {
            return Err(QueueError::NotAFile(path.to_path_buf()));
        }
        let metadata = match prober.probe(path) {
            Ok(metadata) => metadata,
            Err(err) => {
                warn!("{}", err);
                MediaMetadata::empty()
            },
        };
        self.add_probed(path, metadata)
    }

    /// Appends a job for a path that has already been probed.
    pub fn add_probed(&mut self, path: &Path, metadata: MediaMetadata) -> Result<JobId, QueueError> {
        self.ensure_idle()?;
        if !matches!(classify_file(path), DirEntryCategory::RegularFile) {
            return Err(QueueError::NotAFile(path.to_path_buf()));
        }
        self.next_id += 1;
        let id = JobId(self.next_id);
        let path = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
        info!("queued {} {} ({:.1} s, {} audio tracks)", id, path.display(), metadata.duration_seconds, metadata.audio_tracks.len());
        self.jobs.push(Job::new(id, path, metadata));
        Ok(id)
    }

    pub fn remove(&mut self, id: JobId) -> Result<Job, QueueError> {
        self.ensure_idle()?;
        let index = self.index_of(id)?;
        Ok(self.jobs.remove(index))
    }

    pub fn clear(&mut self) -> Result<(), QueueError> {
        self.ensure_idle()?;
        self.jobs.clear();
        Ok(())
    }

    pub fn set_track(&mut self, id: JobId, index: usize) -> Result<(), QueueError> {
        self.ensure_idle()?;
        self.get_mut(id)?.selected_audio_track = index;
        Ok(())
    }

    pub fn set_override(&mut self, id: JobId, settings: Option<EncodeSettings>) -> Result<(), QueueError> {
        self.ensure_idle()?;
        self.get_mut(id)?.settings_override = settings;
        Ok(())
    }

    pub fn jobs(&self) -> &[Job] {
        &self.jobs
    }

    pub fn get(&self, id: JobId) -> Option<&Job> {
        self.jobs.iter().find(|j| j.id == id)
    }

    pub fn ids(&self) -> Vec<JobId> {
        self.jobs.iter().map(|j| j.id).collect()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Marks the queue as running and resets every job for a fresh run.
    pub fn begin_run(&mut self) -> Result<(), QueueError> {
        self.ensure_idle()?;
        self.running = true;
        for job in &mut self.jobs {
            job.status = JobStatus::Pending;
            job.progress_percent = 0;
            job.output_path = None;
        }
        Ok(())
    }

    pub fn end_run(&mut self) {
        self.running = false;
    }

    pub(crate) fn set_status(&mut self, id: JobId, status: JobStatus) {
        if let Ok(job) = self.get_mut(id) {
            job.status = status;
        }
    }

    pub(crate) fn set_progress(&mut self, id: JobId, percent: u8) {
        if let Ok(job) = self.get_mut(id) {
            job.progress_percent = job.progress_percent.max(percent.min(100));
        }
    }

    pub(crate) fn set_output_path(&mut self, id: JobId, path: PathBuf) {
        if let Ok(job) = self.get_mut(id) {
            job.output_path = Some(path);
        }
    }

    pub(crate) fn set_metadata(&mut self, id: JobId, metadata: MediaMetadata) {
        if let Ok(job) = self.get_mut(id) {
            job.metadata = metadata;
        }
    }

    fn ensure_idle(&self) -> Result<(), QueueError> {
        if self.running {
            Err(QueueError::InvalidState)
        } else {
            Ok(())
        }
    }

    fn index_of(&self, id: JobId) -> Result<usize, QueueError> {
        self.jobs.iter().position(|j| j.id == id).ok_or(QueueError::UnknownJob(id))
    }

    fn get_mut(&mut self, id: JobId) -> Result<&mut Job, QueueError> {
        let index = self.index_of(id)?;
        Ok(&mut self.jobs[index])
    }
}

/// Probes `paths` on a worker thread, sending each result as soon as it is
/// available.
pub fn probe_in_background(paths: Vec<PathBuf>, prober: Arc<dyn Prober>) -> Receiver<ProbedFile> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        for path in paths {
            let metadata = prober.probe(&path);
            if tx.send(ProbedFile { path, metadata }).is_err() {
                break;
            }
        }
    });
    rx
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;
    use crate::codecs::Codec;
    use crate::probe::AudioTrack;

    /// Answers every probe with the same metadata.
    pub struct FixedProber(pub MediaMetadata);

    impl Prober for FixedProber {
        fn probe(&self, _path: &Path) -> Result<MediaMetadata, ProbeError> {
            Ok(self.0.clone())
        }
    }

    pub struct FailingProber;

    impl Prober for FailingProber {
        fn probe(&self, path: &Path) -> Result<MediaMetadata, ProbeError> {
            Err(ProbeError::Failed { path: path.to_path_buf(), stderr: String::from("Invalid data found when processing input") })
        }
    }

    pub fn stereo_metadata(duration_seconds: f64) -> MediaMetadata {
        MediaMetadata {
            duration_seconds,
            file_size: Some(1000),
            video: None,
            audio_tracks: vec![AudioTrack {
                stream_index: 1,
                codec: Codec::AC3,
                channels: 2,
                bit_rate: Some(192000),
                language: String::from("eng"),
                title: None,
            }],
        }
    }

    fn touch(dir: &TempDir, name: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, b"not really a video").unwrap();
        path
    }

    #[test]
    fn test_add_items() {
        let dir = TempDir::new().unwrap();
        let mut queue = JobQueue::new();
        let prober = FixedProber(stereo_metadata(42.0));
        let a = queue.add(&touch(&dir, "a.mkv"), &prober).unwrap();
        let b = queue.add(&touch(&dir, "b.mkv"), &prober).unwrap();

        assert_eq!(queue.len(), 2);
        assert!(b > a);
        let job = queue.get(a).unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.progress_percent, 0);
        assert_eq!(job.duration_seconds, 42.0);
        assert!(job.path.is_absolute());
    }

    #[test]
    fn test_add_rejects_non_files() {
        let dir = TempDir::new().unwrap();
        let mut queue = JobQueue::new();
        let prober = FixedProber(stereo_metadata(1.0));
        assert!(matches!(queue.add(dir.path(), &prober), Err(QueueError::NotAFile(_))));
        assert!(matches!(queue.add(&dir.path().join("missing.mkv"), &prober), Err(QueueError::NotAFile(_))));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_add_survives_probe_failure() {
        let dir = TempDir::new().unwrap();
        let mut queue = JobQueue::new();
        let id = queue.add(&touch(&dir, "a.mkv"), &FailingProber).unwrap();
        let job = queue.get(id).unwrap();
        assert_eq!(job.duration_seconds, 1.0);
        assert!(job.metadata.audio_tracks.is_empty());
    }

    #[test]
    fn test_remove_item() {
        let dir = TempDir::new().unwrap();
        let mut queue = JobQueue::new();
        let prober = FixedProber(stereo_metadata(1.0));
        let a = queue.add(&touch(&dir, "a.mkv"), &prober).unwrap();
        let b = queue.add(&touch(&dir, "b.mkv"), &prober).unwrap();
        let c = queue.add(&touch(&dir, "c.mkv"), &prober).unwrap();

        assert_eq!(queue.remove(b).unwrap().id, b);
        assert_eq!(queue.ids(), vec![a, c]);
        assert!(matches!(queue.remove(b), Err(QueueError::UnknownJob(_))));
    }

    #[test]
    fn test_mutations_refused_while_running() {
        let dir = TempDir::new().unwrap();
        let mut queue = JobQueue::new();
        let prober = FixedProber(stereo_metadata(1.0));
        let a = queue.add(&touch(&dir, "a.mkv"), &prober).unwrap();
        let b_path = touch(&dir, "b.mkv");

        queue.begin_run().unwrap();
        assert!(queue.is_running());
        assert!(matches!(queue.begin_run(), Err(QueueError::InvalidState)));
        assert!(matches!(queue.add(&b_path, &prober), Err(QueueError::InvalidState)));
        assert!(matches!(queue.remove(a), Err(QueueError::InvalidState)));
        assert!(matches!(queue.clear(), Err(QueueError::InvalidState)));
        assert!(matches!(queue.set_track(a, 1), Err(QueueError::InvalidState)));
        assert!(matches!(queue.set_override(a, None), Err(QueueError::InvalidState)));

        queue.end_run();
        queue.clear().unwrap();
        assert!(queue.is_empty());
    }

    #[test]
    fn test_set_track_and_override() {
        let dir = TempDir::new().unwrap();
        let mut queue = JobQueue::new();
        let a = queue.add(&touch(&dir, "a.mkv"), &FixedProber(stereo_metadata(1.0))).unwrap();

        queue.set_track(a, 2).unwrap();
        let pinned = EncodeSettings::default().constant_bitrate(5);
        queue.set_override(a, Some(pinned.clone())).unwrap();
        let job = queue.get(a).unwrap();
        assert_eq!(job.selected_audio_track, 2);
        assert_eq!(job.settings_override, Some(pinned));

        queue.set_override(a, None).unwrap();
        assert!(queue.get(a).unwrap().uses_global_settings());
        assert!(matches!(queue.set_track(JobId(99), 0), Err(QueueError::UnknownJob(JobId(99)))));
    }

    #[test]
    fn test_begin_run_resets_progress() {
        let dir = TempDir::new().unwrap();
        let mut queue = JobQueue::new();
        let a = queue.add(&touch(&dir, "a.mkv"), &FixedProber(stereo_metadata(1.0))).unwrap();
        queue.begin_run().unwrap();
        queue.set_progress(a, 70);
        queue.set_progress(a, 40);
        assert_eq!(queue.get(a).unwrap().progress_percent, 70);
        queue.set_status(a, JobStatus::Done);
        queue.set_output_path(a, dir.path().join("a_conv.mp4"));
        queue.end_run();

        queue.begin_run().unwrap();
        let job = queue.get(a).unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.progress_percent, 0);
        assert!(job.output_path.is_none());
    }

    #[test]
    fn test_probe_in_background() {
        let paths = vec![PathBuf::from("a.mkv"), PathBuf::from("b.mkv")];
        let rx = probe_in_background(paths.clone(), Arc::new(FixedProber(stereo_metadata(3.0))));
        let probed: Vec<ProbedFile> = rx.iter().collect();
        assert_eq!(probed.iter().map(|p| p.path.clone()).collect::<Vec<_>>(), paths);
        assert!(probed.iter().all(|p| p.metadata.is_ok()));
    }
}
