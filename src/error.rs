use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::job::JobId;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("{0:?} is not a regular file")]
    NotAFile(PathBuf),
    #[error("the queue cannot be changed while it is running")]
    InvalidState,
    #[error("no job with id {0}")]
    UnknownJob(JobId),
}

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("error executing ffprobe for {path:?}: {source}")]
    Spawn { path: PathBuf, source: io::Error },
    #[error("ffprobe did not exit successfully for {path:?}: {stderr}")]
    Failed { path: PathBuf, stderr: String },
    #[error("error parsing ffprobe output for {path:?}: {source}")]
    Parse { path: PathBuf, source: serde_json::Error },
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("there was an error executing {program:?}: {source}")]
    Spawn { program: PathBuf, source: io::Error },
    #[error("there was an error waiting for the engine process: {0}")]
    Wait(io::Error),
    #[error("unable to signal engine process {pid}: {source}")]
    Signal { pid: u32, source: io::Error },
}

#[derive(Debug, Error, PartialEq)]
pub enum SettingsError {
    #[error("quality {0} is outside 14..=30")]
    Quality(u8),
    #[error("bitrate {0} Mbps is outside 2..=25")]
    Bitrate(u8),
    #[error("unknown tonemap mode {0:?}; expected auto, on or off")]
    TonemapMode(String),
}

#[derive(Debug, Error)]
pub enum PreferenceError {
    #[error("{0:?} is not a directory")]
    NotADirectory(PathBuf),
    #[error("unable to write preferences to {path:?}: {source}")]
    Write { path: PathBuf, source: io::Error },
    #[error("unable to serialize preferences: {0}")]
    Serialize(#[from] serde_json::Error),
}
