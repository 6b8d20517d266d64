use std::ffi::{OsStr, OsString};
use std::path::Path;

use crate::codecs::Codec;
use crate::job::Job;
use crate::probe::{AudioTrack, MediaMetadata, Resolution};
use crate::settings::{EncodeMode, EncodeSettings};

pub const MAX_WIDTH: u32 = 1920;
pub const MAX_HEIGHT: u32 = 1080;
pub const CBR_BUFFER_SIZE: &str = "20000k";

const TONEMAP_FILTER: &str = "zscale=t=linear:npl=100,format=gbrpf32le,zscale=p=bt709,tonemap=tonemap=hable:desat=0,zscale=t=bt709:m=bt709:r=tv,format=yuv420p";
const PIXEL_FORMAT_FILTER: &str = "format=yuv420p";

/// An ffmpeg argument list. Paths stay `OsString` so non-UTF-8 names survive.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ArgumentList {
    args: Vec<OsString>,
}

impl ArgumentList {
    pub fn new() -> Self {
        ArgumentList::default()
    }

    pub fn push(&mut self, arg: impl AsRef<OsStr>) {
        self.args.push(arg.as_ref().to_os_string());
    }

    pub fn push_pair(&mut self, flag: &str, value: impl AsRef<OsStr>) {
        self.push(flag);
        self.push(value);
    }

    pub fn contains(&self, arg: &str) -> bool {
        self.args.iter().any(|a| a == arg)
    }

    /// Value following the first occurrence of `flag`.
    pub fn value_of(&self, flag: &str) -> Option<&OsStr> {
        let position = self.args.iter().position(|a| a == flag)?;
        self.args.get(position + 1).map(OsString::as_os_str)
    }

    /// Every value following an occurrence of `flag`, in order.
    pub fn values_of(&self, flag: &str) -> Vec<&OsStr> {
        self.args.windows(2)
            .filter(|w| w[0] == flag)
            .map(|w| w[1].as_os_str())
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &OsString> {
        self.args.iter()
    }
}

impl std::fmt::Display for ArgumentList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let joined: Vec<String> = self.args.iter().map(|a| format!("{:?}", a)).collect();
        write!(f, "{}", joined.join(" "))
    }
}

/// Builds the ffmpeg invocation for one job.
pub fn build(job: &Job, metadata: &MediaMetadata, settings: &EncodeSettings, audio: &AudioTrack, output: &Path) -> ArgumentList {
    let mut args = ArgumentList::new();
    args.push("-hide_banner");
    args.push("-nostdin");
    args.push("-y");
    args.push_pair("-i", &job.path);

    // exactly one video and the selected audio stream
    args.push_pair("-map", "0:v:0");
    args.push_pair("-map", format!("0:a:{}", job.selected_audio_track));

    for arg in video_parameters(metadata, settings) {
        args.push(arg);
    }
    for arg in audio_parameters(audio, settings) {
        args.push(arg);
    }

    // subtitles, data streams, container metadata and chapters never carry over
    args.push("-sn");
    args.push("-dn");
    args.push_pair("-map_metadata", "-1");
    args.push_pair("-map_chapters", "-1");

    args.push_pair("-movflags", "+faststart");
    args.push_pair("-f", "mp4");
    args.push(output);
    args
}

pub fn video_parameters(metadata: &MediaMetadata, settings: &EncodeSettings) -> Vec<String> {
    if settings.skip_video {
        return vec![String::from("-c:v"), String::from("copy")];
    }

    let mut params = vec![String::from("-vf"), filter_chain(metadata, settings)];
    params.extend([
        "-c:v", Codec::encoder(&Codec::H264).unwrap_or("h264_nvenc"),
        "-preset", "p4",
        "-profile:v", "high",
        "-tune", "hq",
        "-spatial_aq", "1",
        "-temporal_aq", "1",
        "-a53cc", "0",
    ].map(String::from));
    params.extend(rate_control_parameters(settings));
    params
}

pub fn should_tonemap(metadata: &MediaMetadata, settings: &EncodeSettings) -> bool {
    let recommended = match &metadata.video {
        Some(video) => video.hdr.requires_tonemap(),
        None => false,
    };
    settings.tonemap_mode.decide(recommended)
}

pub fn filter_chain(metadata: &MediaMetadata, settings: &EncodeSettings) -> String {
    let mut chain = String::from(if should_tonemap(metadata, settings) {
        TONEMAP_FILTER
    } else {
        PIXEL_FORMAT_FILTER
    });

    if settings.limit_resolution {
        if let Some(video) = &metadata.video {
            if let Some(target) = scale_target(&video.resolution) {
                chain.push_str(&format!(",scale={}:{}", target.width, target.height));
            }
        }
    }
    chain
}

/// Largest even resolution inside 1920x1080 with the source's aspect
/// ratio, or `None` when the source already fits.
pub fn scale_target(source: &Resolution) -> Option<Resolution> {
    if source.width == 0 || source.height == 0 {
        return None;
    }
    if source.width <= MAX_WIDTH && source.height <= MAX_HEIGHT {
        return None;
    }

    let ratio = f64::min(
        MAX_WIDTH as f64 / source.width as f64,
        MAX_HEIGHT as f64 / source.height as f64);
    let even = |v: f64| -> u32 { (((v.round() as u32) / 2) * 2).max(2) };
    Some(Resolution {
        width: even(source.width as f64 * ratio).min(MAX_WIDTH),
        height: even(source.height as f64 * ratio).min(MAX_HEIGHT),
    })
}

pub fn rate_control_parameters(settings: &EncodeSettings) -> Vec<String> {
    match settings.encode_mode {
        EncodeMode::ConstantQuality => vec![
            String::from("-rc"), String::from("constqp"),
            String::from("-qp"), settings.quality.to_string(),
            String::from("-b:v"), String::from("0"),
            String::from("-maxrate"), String::from("0"),
        ],
        EncodeMode::ConstantBitrate => {
            let kbps = format!("{}k", settings.bitrate_mbps as u32 * 1000);
            vec![
                String::from("-rc"), String::from("cbr"),
                String::from("-b:v"), kbps.clone(),
                String::from("-maxrate"), kbps,
                String::from("-bufsize"), String::from(CBR_BUFFER_SIZE),
            ]
        },
    }
}

pub fn audio_parameters(audio: &AudioTrack, settings: &EncodeSettings) -> Vec<String> {
    if settings.skip_audio || audio.codec.is_aac() {
        return vec![String::from("-c:a"), String::from("copy")];
    }
    vec![
        String::from("-c:a"), String::from(Codec::encoder(&Codec::AAC).unwrap_or("aac")),
        String::from("-ac"), audio.channels.to_string(),
        String::from("-b:a"), format!("{}k", audio_bitrate_kbps(audio.channels)),
    ]
}

/// AAC bitrate for a channel count. A step table, 7 channels falls
/// through to 256.
pub fn audio_bitrate_kbps(channels: u32) -> u32 {
    if channels <= 1 {
        128
    } else if channels == 2 {
        192
    } else if channels <= 6 {
        384
    } else if channels >= 8 {
        512
    } else {
        256
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use crate::job::JobId;
    use crate::probe::{HdrFormat, VideoStream};
    use crate::settings::TonemapMode;

    fn metadata(width: u32, height: u32, hdr: HdrFormat) -> MediaMetadata {
        MediaMetadata {
            duration_seconds: 60.0,
            file_size: None,
            video: Some(VideoStream {
                codec: Codec::HEVC,
                resolution: Resolution { width, height },
                pix_fmt: None,
                color_transfer: None,
                color_primaries: None,
                color_space: None,
                hdr,
            }),
            audio_tracks: vec![track(Codec::AC3, 6), track(Codec::AAC, 2)],
        }
    }

    fn track(codec: Codec, channels: u32) -> AudioTrack {
        AudioTrack {
            stream_index: 1,
            codec,
            channels,
            bit_rate: None,
            language: String::from("eng"),
            title: None,
        }
    }

    fn job(metadata: &MediaMetadata) -> Job {
        Job::new(JobId(1), PathBuf::from("/videos/movie.mkv"), metadata.clone())
    }

    fn value(args: &ArgumentList, flag: &str) -> Option<String> {
        args.value_of(flag).map(|v| v.to_string_lossy().into_owned())
    }

    #[test]
    fn test_audio_bitrate_table() {
        assert_eq!(audio_bitrate_kbps(0), 128);
        assert_eq!(audio_bitrate_kbps(1), 128);
        assert_eq!(audio_bitrate_kbps(2), 192);
        assert_eq!(audio_bitrate_kbps(3), 384);
        assert_eq!(audio_bitrate_kbps(6), 384);
        assert_eq!(audio_bitrate_kbps(7), 256);
        assert_eq!(audio_bitrate_kbps(8), 512);
        assert_eq!(audio_bitrate_kbps(16), 512);
    }

    #[test]
    fn test_build_maps_one_video_and_selected_audio() {
        let md = metadata(1920, 1080, HdrFormat::Sdr);
        let mut job = job(&md);
        job.selected_audio_track = 1;
        let args = build(&job, &md, &EncodeSettings::default(), &md.audio_tracks[1], Path::new("/out/movie_conv.mp4"));

        assert_eq!(args.values_of("-map"), vec![OsStr::new("0:v:0"), OsStr::new("0:a:1")]);
        assert_eq!(value(&args, "-i").as_deref(), Some("/videos/movie.mkv"));
        assert_eq!(value(&args, "-f").as_deref(), Some("mp4"));
        assert_eq!(args.iter().last().map(|a| a.to_string_lossy().into_owned()).as_deref(), Some("/out/movie_conv.mp4"));
        for flag in ["-sn", "-dn"] {
            assert!(args.contains(flag), "missing {flag}");
        }
        assert_eq!(value(&args, "-map_metadata").as_deref(), Some("-1"));
    }

    #[test]
    fn test_audio_passthrough_and_transcode() {
        let settings = EncodeSettings::default();
        assert_eq!(audio_parameters(&track(Codec::AAC, 2), &settings), vec!["-c:a", "copy"]);
        assert_eq!(audio_parameters(&track(Codec::AC3, 6), &settings), vec!["-c:a", "aac", "-ac", "6", "-b:a", "384k"]);
        assert_eq!(audio_parameters(&track(Codec::DTS, 7), &settings), vec!["-c:a", "aac", "-ac", "7", "-b:a", "256k"]);
        assert_eq!(audio_parameters(&track(Codec::AC3, 6), &settings.skip_audio(true)), vec!["-c:a", "copy"]);
    }

    #[test]
    fn test_skip_video_and_skip_audio_are_independent() {
        let md = metadata(3840, 2160, HdrFormat::Hdr10);
        let audio = &md.audio_tracks[0];
        let base = EncodeSettings::default().limit_resolution(true);

        assert_eq!(audio_parameters(audio, &base), audio_parameters(audio, &base.clone().skip_video(true)));
        assert_eq!(video_parameters(&md, &base), video_parameters(&md, &base.clone().skip_audio(true)));

        let args = build(&job(&md), &md, &base.clone().skip_video(true), audio, Path::new("o.mp4"));
        assert_eq!(value(&args, "-c:v").as_deref(), Some("copy"));
        assert!(!args.contains("-vf"));
        assert_eq!(value(&args, "-c:a").as_deref(), Some("aac"));
    }

    #[test]
    fn test_tonemap_decision() {
        let hdr = metadata(1920, 1080, HdrFormat::Hdr10);
        let auto = EncodeSettings::default();
        assert!(should_tonemap(&hdr, &auto));
        assert!(filter_chain(&hdr, &auto).contains("tonemap=tonemap=hable"));

        let off = auto.clone().tonemap(TonemapMode::ForceOff);
        assert!(!should_tonemap(&hdr, &off));
        assert_eq!(filter_chain(&hdr, &off), "format=yuv420p");

        let sdr = metadata(1920, 1080, HdrFormat::Sdr);
        assert!(!should_tonemap(&sdr, &auto));
        assert!(should_tonemap(&sdr, &auto.tonemap(TonemapMode::ForceOn)));
    }

    #[test]
    fn test_resolution_clamp() {
        assert_eq!(scale_target(&Resolution { width: 3840, height: 2160 }), Some(Resolution { width: 1920, height: 1080 }));
        assert_eq!(scale_target(&Resolution { width: 1280, height: 720 }), None);
        assert_eq!(scale_target(&Resolution { width: 1920, height: 1080 }), None);
        assert_eq!(scale_target(&Resolution { width: 4096, height: 1716 }), Some(Resolution { width: 1920, height: 804 }));
        assert_eq!(scale_target(&Resolution { width: 1440, height: 1920 }), Some(Resolution { width: 810, height: 1080 }));

        let settings = EncodeSettings::default().limit_resolution(true);
        assert_eq!(filter_chain(&metadata(3840, 2160, HdrFormat::Sdr), &settings), "format=yuv420p,scale=1920:1080");
        assert_eq!(filter_chain(&metadata(1280, 720, HdrFormat::Sdr), &settings), "format=yuv420p");
        assert_eq!(filter_chain(&metadata(3840, 2160, HdrFormat::Sdr), &EncodeSettings::default()), "format=yuv420p");
    }

    #[test]
    fn test_rate_control() {
        let cq = rate_control_parameters(&EncodeSettings::default().constant_quality(24));
        assert_eq!(cq, vec!["-rc", "constqp", "-qp", "24", "-b:v", "0", "-maxrate", "0"]);

        let cbr = rate_control_parameters(&EncodeSettings::default().constant_bitrate(8));
        assert_eq!(cbr, vec!["-rc", "cbr", "-b:v", "8000k", "-maxrate", "8000k", "-bufsize", "20000k"]);
    }
}
