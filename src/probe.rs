use std::collections::HashMap;
use std::fmt::Display;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use serde::{Deserialize, Serialize};
use serde_json;
use tracing::debug;

use crate::codecs::Codec;
use crate::error::ProbeError;

/// Duration used for progress math when the prober has nothing better.
pub const MIN_DURATION_SECONDS: f64 = 1.0;
pub const DEFAULT_CHANNELS: u32 = 2;

#[derive(Clone, Debug, PartialEq)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum HdrFormat {
    Sdr,
    Hdr10,
    Hlg,
    Hdr10Plus,
    DolbyVision,
    Bt2020Sdr,
}

impl HdrFormat {
    /// Classifies a video stream from its transfer characteristics,
    /// primaries and side data.
    pub fn classify(transfer: Option<&str>, primaries: Option<&str>, side_data: &[String]) -> Self {
        let has_side_data = |needle: &str| side_data.iter().any(|s| s.contains(needle));
        if has_side_data("DOVI configuration record") {
            return HdrFormat::DolbyVision;
        }
        match transfer {
            Some("smpte2084") if has_side_data("SMPTE2094-40") => HdrFormat::Hdr10Plus,
            Some("smpte2084") => HdrFormat::Hdr10,
            Some("arib-std-b67") => HdrFormat::Hlg,
            _ => match primaries {
                Some("bt2020") => HdrFormat::Bt2020Sdr,
                _ => HdrFormat::Sdr,
            },
        }
    }

    pub fn requires_tonemap(&self) -> bool {
        matches!(self, HdrFormat::Hdr10 | HdrFormat::Hlg | HdrFormat::Hdr10Plus | HdrFormat::DolbyVision)
    }
}

impl Display for HdrFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            HdrFormat::Sdr => "SDR",
            HdrFormat::Hdr10 => "HDR10 (PQ)",
            HdrFormat::Hlg => "HLG",
            HdrFormat::Hdr10Plus => "HDR10+",
            HdrFormat::DolbyVision => "Dolby Vision",
            HdrFormat::Bt2020Sdr => "BT.2020 SDR",
        };
        write!(f, "{}", s)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct VideoStream {
    pub codec: Codec,
    pub resolution: Resolution,
    pub pix_fmt: Option<String>,
    pub color_transfer: Option<String>,
    pub color_primaries: Option<String>,
    pub color_space: Option<String>,
    pub hdr: HdrFormat,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AudioTrack {
    /// Index of the stream in the container, for display only.
    pub stream_index: u32,
    pub codec: Codec,
    pub channels: u32,
    pub bit_rate: Option<u64>,
    pub language: String,
    pub title: Option<String>,
}

impl Display for AudioTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kbps = match self.bit_rate {
            Some(br) => format!("{} kbps", br / 1000),
            None => String::from("? kbps"),
        };
        write!(f, "{}: {} ({}ch, {}, {}", self.stream_index, self.codec, self.channels, kbps, self.language)?;
        if let Some(title) = &self.title {
            write!(f, ", «{}»", title)?;
        }
        write!(f, ")")
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct MediaMetadata {
    pub duration_seconds: f64,
    pub file_size: Option<u64>,
    pub video: Option<VideoStream>,
    pub audio_tracks: Vec<AudioTrack>,
}

impl MediaMetadata {
    pub fn empty() -> Self {
        MediaMetadata {
            duration_seconds: 0.0,
            file_size: None,
            video: None,
            audio_tracks: vec![],
        }
    }

    /// Duration safe to divide by.
    pub fn progress_duration(&self) -> f64 {
        if self.duration_seconds.is_finite() && self.duration_seconds >= MIN_DURATION_SECONDS {
            self.duration_seconds
        } else {
            MIN_DURATION_SECONDS
        }
    }

    /// Looks up an audio track by its position among audio streams.
    pub fn audio_track(&self, index: usize) -> Option<&AudioTrack> {
        self.audio_tracks.get(index)
    }
}

pub trait Prober: Send + Sync {
    fn probe(&self, path: &Path) -> Result<MediaMetadata, ProbeError>;
}

#[derive(Clone, Debug)]
pub struct FfprobeProber {
    program: PathBuf,
}

impl FfprobeProber {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        FfprobeProber { program: program.into() }
    }
}

impl Default for FfprobeProber {
    fn default() -> Self {
        FfprobeProber::new("ffprobe")
    }
}

impl Prober for FfprobeProber {
    fn probe(&self, path: &Path) -> Result<MediaMetadata, ProbeError> {
        let output = Command::new(&self.program)
            .args(["-v", "error", "-show_format", "-show_streams", "-of", "json"])
            .arg(path)
            .output()
            .map_err(|source| ProbeError::Spawn { path: path.to_path_buf(), source })?;
        if !output.status.success() {
            return Err(ProbeError::Failed {
                path: path.to_path_buf(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        let mut metadata = parse_ffprobe_json(path, &String::from_utf8_lossy(&output.stdout))?;
        if metadata.file_size.is_none() {
            metadata.file_size = fs::metadata(path).ok().map(|m| m.len());
        }
        debug!(path = %path.display(), duration = metadata.duration_seconds, tracks = metadata.audio_tracks.len(), "probed");
        Ok(metadata)
    }
}

#[derive(Serialize, Deserialize, Debug, Default)]
struct FFProbeJsonOutput {
    #[serde(default)]
    pub streams: Vec<FFProbeJsonStream>,
    pub format: Option<FFProbeJsonFormat>,
}

#[derive(Serialize, Deserialize, Debug, Default)]
struct FFProbeJsonFormat {
    pub duration: Option<String>,
    pub size: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Default)]
struct FFProbeJsonStream {
    pub index: Option<u32>,
    pub codec_name: Option<String>,
    pub codec_type: Option<String>,
    pub channels: Option<u32>,
    pub bit_rate: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub pix_fmt: Option<String>,
    pub color_transfer: Option<String>,
    pub color_primaries: Option<String>,
    pub color_space: Option<String>,
    #[serde(default)]
    pub side_data_list: Vec<FFProbeJsonSideData>,
    #[serde(default)]
    pub tags: HashMap<String, String>,
}

#[derive(Serialize, Deserialize, Debug, Default)]
struct FFProbeJsonSideData {
    pub side_data_type: Option<String>,
}

/// Maps ffprobe's JSON onto `MediaMetadata`, substituting sentinels for
/// anything missing.
pub fn parse_ffprobe_json(path: &Path, json: &str) -> Result<MediaMetadata, ProbeError> {
    let deserialized = serde_json::from_str::<FFProbeJsonOutput>(json)
        .map_err(|source| ProbeError::Parse { path: path.to_path_buf(), source })?;

    let (duration_seconds, file_size) = match &deserialized.format {
        Some(format) => (
            format.duration.as_deref().and_then(|d| d.parse::<f64>().ok()).unwrap_or(0.0),
            format.size.as_deref().and_then(|s| s.parse::<u64>().ok()),
        ),
        None => (0.0, None),
    };

    let video = deserialized.streams.iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .map(video_stream);

    let audio_tracks = deserialized.streams.iter()
        .filter(|s| s.codec_type.as_deref() == Some("audio"))
        .map(audio_track)
        .collect();

    Ok(MediaMetadata {
        duration_seconds,
        file_size,
        video,
        audio_tracks,
    })
}

fn video_stream(stream: &FFProbeJsonStream) -> VideoStream {
    let side_data: Vec<String> = stream.side_data_list.iter()
        .filter_map(|sd| sd.side_data_type.clone())
        .collect();
    VideoStream {
        codec: Codec::from_str(stream.codec_name.as_deref().unwrap_or("")),
        resolution: Resolution {
            width: stream.width.unwrap_or(0),
            height: stream.height.unwrap_or(0),
        },
        pix_fmt: stream.pix_fmt.clone(),
        color_transfer: stream.color_transfer.clone(),
        color_primaries: stream.color_primaries.clone(),
        color_space: stream.color_space.clone(),
        hdr: HdrFormat::classify(stream.color_transfer.as_deref(), stream.color_primaries.as_deref(), &side_data),
    }
}

fn audio_track(stream: &FFProbeJsonStream) -> AudioTrack {
    AudioTrack {
        stream_index: stream.index.unwrap_or(0),
        codec: Codec::from_str(stream.codec_name.as_deref().unwrap_or("")),
        channels: stream.channels.filter(|c| *c > 0).unwrap_or(DEFAULT_CHANNELS),
        bit_rate: stream.bit_rate.as_deref().and_then(|b| b.parse().ok()),
        language: stream.tags.get("language").cloned().unwrap_or_else(|| String::from("und")),
        title: stream.tags.get("title")
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty()),
    }
}
