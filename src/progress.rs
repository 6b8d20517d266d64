use regex::Regex;

/// One parsed progress line from the engine.
#[derive(Clone, Debug, PartialEq)]
pub struct ProgressUpdate {
    /// Position in the source, in seconds.
    pub elapsed_seconds: f64,
    pub speed: Option<f64>,
    pub fps: Option<f64>,
    /// Wall-clock time the engine has been running, when it reports one.
    pub wall_seconds: Option<f64>,
}

/// Scrapes ffmpeg's `frame=... fps=... time=... speed=...x` status lines.
pub struct ProgressParser {
    time: Regex,
    speed: Regex,
    fps: Regex,
    elapsed: Regex,
}

impl ProgressParser {
    pub fn new() -> Self {
        ProgressParser {
            time: Regex::new(r"time=\s*(\d+):(\d+):(\d+(?:\.\d+)?)").expect("valid regex"),
            speed: Regex::new(r"speed=\s*(\d+(?:\.\d+)?)x").expect("valid regex"),
            fps: Regex::new(r"fps=\s*(\d+(?:\.\d+)?)").expect("valid regex"),
            elapsed: Regex::new(r"elapsed=\s*(\d+):(\d+):(\d+(?:\.\d+)?)").expect("valid regex"),
        }
    }

    /// Lines without a `time=` marker produce nothing.
    pub fn parse(&self, line: &str) -> Option<ProgressUpdate> {
        let elapsed_seconds = hms_seconds(&self.time, line)?;
        Some(ProgressUpdate {
            elapsed_seconds,
            speed: capture_f64(&self.speed, line),
            fps: capture_f64(&self.fps, line),
            wall_seconds: hms_seconds(&self.elapsed, line),
        })
    }
}

impl Default for ProgressParser {
    fn default() -> Self {
        ProgressParser::new()
    }
}

fn hms_seconds(re: &Regex, line: &str) -> Option<f64> {
    let caps = re.captures(line)?;
    let hours: f64 = caps[1].parse().ok()?;
    let minutes: f64 = caps[2].parse().ok()?;
    let seconds: f64 = caps[3].parse().ok()?;
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

fn capture_f64(re: &Regex, line: &str) -> Option<f64> {
    re.captures(line).and_then(|caps| caps[1].parse().ok())
}

fn percent(numerator: f64, denominator: f64) -> u8 {
    if denominator <= 0.0 || !numerator.is_finite() || numerator <= 0.0 {
        return 0;
    }
    (numerator / denominator * 100.0).floor().min(100.0) as u8
}

pub fn job_percent(elapsed_seconds: f64, duration_seconds: f64) -> u8 {
    percent(elapsed_seconds, duration_seconds)
}

pub fn queue_percent(completed_duration: f64, elapsed_seconds: f64, total_queue_duration: f64) -> u8 {
    percent(completed_duration + elapsed_seconds, total_queue_duration)
}

/// Keeps reported percentages from going backwards within one job.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    job: u8,
    queue: u8,
}

impl ProgressTracker {
    pub fn new() -> Self {
        ProgressTracker::default()
    }

    pub fn start_job(&mut self) {
        self.job = 0;
    }

    /// Returns `(job_percent, queue_percent)`.
    pub fn update(&mut self, completed_duration: f64, elapsed_seconds: f64, duration_seconds: f64, total_queue_duration: f64) -> (u8, u8) {
        self.job = self.job.max(job_percent(elapsed_seconds, duration_seconds));
        self.queue = self.queue.max(queue_percent(completed_duration, elapsed_seconds, total_queue_duration));
        (self.job, self.queue)
    }

    pub fn finish_job(&mut self, completed_duration: f64, total_queue_duration: f64) -> u8 {
        self.job = 100;
        self.queue = self.queue.max(queue_percent(completed_duration, 0.0, total_queue_duration));
        self.queue
    }
}
