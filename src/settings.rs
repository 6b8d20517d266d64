use std::fmt::Display;
use std::ops::RangeInclusive;

use crate::error::SettingsError;
use crate::job::Job;

pub const QUALITY_RANGE: RangeInclusive<u8> = 14..=30;
pub const BITRATE_RANGE_MBPS: RangeInclusive<u8> = 2..=25;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum EncodeMode {
    ConstantQuality,
    ConstantBitrate,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TonemapMode {
    Auto,
    ForceOn,
    ForceOff,
}

impl TonemapMode {
    pub fn from_str(s: &str) -> Result<Self, SettingsError> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(TonemapMode::Auto),
            "on" | "force-on" => Ok(TonemapMode::ForceOn),
            "off" | "force-off" => Ok(TonemapMode::ForceOff),
            _ => Err(SettingsError::TonemapMode(String::from(s))),
        }
    }

    /// Applies the user's choice on top of the source's recommendation.
    pub fn decide(&self, recommended: bool) -> bool {
        match self {
            TonemapMode::Auto => recommended,
            TonemapMode::ForceOn => true,
            TonemapMode::ForceOff => false,
        }
    }
}

impl Display for TonemapMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TonemapMode::Auto => write!(f, "auto"),
            TonemapMode::ForceOn => write!(f, "on"),
            TonemapMode::ForceOff => write!(f, "off"),
        }
    }
}

/// Everything needed to build one job's ffmpeg invocation.
///
/// `quality` is a QP (lower is better) and only matters under
/// `ConstantQuality`; `bitrate_mbps` only matters under `ConstantBitrate`.
#[derive(Clone, Debug, PartialEq)]
pub struct EncodeSettings {
    pub skip_video: bool,
    pub skip_audio: bool,
    pub encode_mode: EncodeMode,
    pub quality: u8,
    pub bitrate_mbps: u8,
    pub limit_resolution: bool,
    pub tonemap_mode: TonemapMode,
}

impl Default for EncodeSettings {
    fn default() -> Self {
        EncodeSettings {
            skip_video: false,
            skip_audio: false,
            encode_mode: EncodeMode::ConstantQuality,
            quality: 20,
            bitrate_mbps: 10,
            limit_resolution: false,
            tonemap_mode: TonemapMode::Auto,
        }
    }
}

impl EncodeSettings {
    pub fn skip_video(mut self, skip: bool) -> Self {
        self.skip_video = skip;
        self
    }

    pub fn skip_audio(mut self, skip: bool) -> Self {
        self.skip_audio = skip;
        self
    }

    pub fn constant_quality(mut self, quality: u8) -> Self {
        self.encode_mode = EncodeMode::ConstantQuality;
        self.quality = quality;
        self
    }

    pub fn constant_bitrate(mut self, mbps: u8) -> Self {
        self.encode_mode = EncodeMode::ConstantBitrate;
        self.bitrate_mbps = mbps;
        self
    }

    pub fn limit_resolution(mut self, limit: bool) -> Self {
        self.limit_resolution = limit;
        self
    }

    pub fn tonemap(mut self, mode: TonemapMode) -> Self {
        self.tonemap_mode = mode;
        self
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if !QUALITY_RANGE.contains(&self.quality) {
            return Err(SettingsError::Quality(self.quality));
        }
        if !BITRATE_RANGE_MBPS.contains(&self.bitrate_mbps) {
            return Err(SettingsError::Bitrate(self.bitrate_mbps));
        }
        Ok(())
    }
}

impl Display for EncodeSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let video = if self.skip_video {
            String::from("video copy")
        } else {
            let rate = match self.encode_mode {
                EncodeMode::ConstantQuality => format!("QP {}", self.quality),
                EncodeMode::ConstantBitrate => format!("{} Mbps", self.bitrate_mbps),
            };
            let limit = if self.limit_resolution { ", ≤1080p" } else { "" };
            format!("{}, tonemap {}{}", rate, self.tonemap_mode, limit)
        };
        let audio = if self.skip_audio { "audio copy" } else { "audio aac" };
        write!(f, "{}; {}", video, audio)
    }
}

/// Effective settings for `job`: its own override if it has one, otherwise
/// whatever the globals are right now.
pub fn resolve(job: &Job, globals: &EncodeSettings) -> EncodeSettings {
    match &job.settings_override {
        Some(settings) => settings.clone(),
        None => globals.clone(),
    }
}
