pub mod codecs;
pub mod command;
pub mod display;
pub mod engine;
pub mod error;
pub mod fstools;
pub mod job;
pub mod preferences;
pub mod probe;
pub mod progress;
pub mod queue;
pub mod runner;
pub mod settings;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::thread;
use parking_lot::{Mutex, RwLock};
use rustop::opts;
use tracing::{info, warn};

use display::{track_listing, ProgressDisplay};
use engine::FFmpegEngine;
use fstools::{classify_file, DirEntryCategory};
use preferences::{clear_save_folder, save_folder, set_save_folder, JsonFilePreferences};
use probe::{FfprobeProber, MediaMetadata, Prober};
use queue::{probe_in_background, JobQueue, ProbedFile};
use runner::{CancelToken, QueueRunner};
use settings::{EncodeSettings, TonemapMode};

fn main() -> ExitCode {
    let (args, _rest) = opts! {
        synopsis "Convert video files to H.264/AAC mp4 with ffmpeg and NVENC.";
        opt quality:Option<u8>, short:'q', desc:"Constant quality level (QP 14-30, lower is better). Default 20.";
        opt bitrate:Option<u8>, short:'b', desc:"Encode at a constant bitrate in Mbps (2-25) instead of constant quality.";
        opt skip_video:bool=false, short:'V', desc:"Copy the video stream unchanged.";
        opt skip_audio:bool=false, short:'A', desc:"Copy the audio stream unchanged.";
        opt limit_resolution:bool=false, short:'l', desc:"Downscale anything larger than 1920x1080.";
        opt tonemap:String=String::from("auto"), short:'t', desc:"HDR to SDR tone mapping. [auto, on, off]";
        opt track:usize=0, short:'a', desc:"Audio track to keep, by position among the audio streams.";
        opt output_dir:Option<String>, short:'o', desc:"Write outputs here and remember the folder for later runs.";
        opt forget_output_dir:bool=false, short:'F', desc:"Forget the remembered output folder; write next to each source.";
        opt list_tracks:bool=false, short:'L', desc:"List each file's audio tracks and exit.";
        opt debug:bool=false, short:'d', desc:"Log debug messages and raw ffmpeg output.";
        opt ffmpeg:String=String::from("ffmpeg"), short:'e', desc:"ffmpeg executable.";
        opt ffprobe:String=String::from("ffprobe"), short:'p', desc:"ffprobe executable.";
        param files:Vec<String>, desc:"Video files to convert.";
    }.parse_or_exit();

    init_logging(args.debug);

    let globals = match encode_settings(args.quality, args.bitrate, &args.tonemap) {
        Ok(settings) => settings
            .skip_video(args.skip_video)
            .skip_audio(args.skip_audio)
            .limit_resolution(args.limit_resolution),
        Err(err) => {
            eprintln!("{}", err);
            return ExitCode::FAILURE;
        },
    };

    let paths = input_files(&args.files);
    if paths.is_empty() {
        eprintln!("No video files given.");
        return ExitCode::FAILURE;
    }

    let prober: Arc<dyn Prober> = Arc::new(FfprobeProber::new(&args.ffprobe));
    let probed = probe_in_background(paths, Arc::clone(&prober));

    if args.list_tracks {
        return list_tracks(probed.into_iter());
    }

    let mut prefs = JsonFilePreferences::open(JsonFilePreferences::default_path());
    if args.forget_output_dir {
        if let Err(err) = clear_save_folder(&mut prefs) {
            warn!("{}", err);
        }
    }
    if let Some(dir) = &args.output_dir {
        match set_save_folder(&mut prefs, Path::new(dir)) {
            Ok(folder) => info!("saving outputs to {}", folder.display()),
            Err(err) => {
                eprintln!("{}", err);
                return ExitCode::FAILURE;
            },
        }
    }
    let save_dir = save_folder(&prefs);

    let engine = FFmpegEngine::new(&args.ffmpeg);
    if !engine.is_installed() {
        eprintln!("{} is not installed.", args.ffmpeg);
        return ExitCode::FAILURE;
    }

    let queue = Arc::new(Mutex::new(JobQueue::new()));
    for ProbedFile { path, metadata } in probed {
        let metadata = metadata.unwrap_or_else(|err| {
            warn!("{}", err);
            MediaMetadata::empty()
        });
        let mut queue = queue.lock();
        let added = queue.add_probed(&path, metadata)
            .and_then(|id| queue.set_track(id, args.track));
        if let Err(err) = added {
            warn!("{}", err);
        }
    }
    if queue.lock().is_empty() {
        eprintln!("Nothing to convert.");
        return ExitCode::FAILURE;
    }

    // ffmpeg runs in its own process group, so ^C only reaches us
    let cancel = CancelToken::new();
    for signal in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
        if let Err(err) = signal_hook::flag::register(signal, cancel.flag()) {
            warn!("unable to handle signal {}: {}", signal, err);
        }
    }

    let mut runner = QueueRunner::new(
        Arc::clone(&queue),
        Arc::new(RwLock::new(globals)),
        Box::new(engine),
        prober,
        cancel)
        .save_dir(save_dir)
        .debug(args.debug);
    let events = runner.subscribe();
    let handle = thread::spawn(move || runner.run());

    ProgressDisplay::new().run(events);
    let result = handle.join();

    for job in queue.lock().jobs() {
        eprintln!("{}", job);
    }

    match result {
        Ok(Ok(summary)) if summary.is_success() => ExitCode::SUCCESS,
        Ok(Ok(_)) => ExitCode::FAILURE,
        Ok(Err(err)) => {
            eprintln!("{}", err);
            ExitCode::FAILURE
        },
        Err(_) => {
            eprintln!("The queue runner stopped unexpectedly.");
            ExitCode::FAILURE
        },
    }
}

fn init_logging(debug: bool) {
    let level = if debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();
}

fn encode_settings(quality: Option<u8>, bitrate: Option<u8>, tonemap: &str) -> Result<EncodeSettings, error::SettingsError> {
    let mut settings = EncodeSettings::default().tonemap(TonemapMode::from_str(tonemap)?);
    if let Some(quality) = quality {
        settings = settings.constant_quality(quality);
    }
    if let Some(mbps) = bitrate {
        settings = settings.constant_bitrate(mbps);
    }
    settings.validate()?;
    Ok(settings)
}

/// Regular files from the command line; anything else is reported and dropped.
fn input_files(args: &[String]) -> Vec<PathBuf> {
    args.iter()
        .map(PathBuf::from)
        .filter(|path| match classify_file(path) {
            DirEntryCategory::RegularFile => true,
            DirEntryCategory::DoesNotExist => {
                warn!("{:?} does not exist.", path);
                false
            },
            DirEntryCategory::Directory => {
                warn!("{:?} is a directory.", path);
                false
            },
            _ => {
                warn!("Unable to classify {:?}.", path);
                false
            },
        })
        .collect()
}

fn list_tracks(probed: impl Iterator<Item = ProbedFile>) -> ExitCode {
    let mut code = ExitCode::SUCCESS;
    for ProbedFile { path, metadata } in probed {
        match metadata {
            Ok(metadata) => println!("{}", track_listing(&path, &metadata)),
            Err(err) => {
                eprintln!("{}", err);
                code = ExitCode::FAILURE;
            },
        }
    }
    code
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use error::SettingsError;
    use settings::EncodeMode;

    #[test]
    fn test_encode_settings_from_options() {
        let settings = encode_settings(None, None, "auto").unwrap();
        assert_eq!(settings, EncodeSettings::default());

        let settings = encode_settings(Some(24), None, "off").unwrap();
        assert_eq!(settings.encode_mode, EncodeMode::ConstantQuality);
        assert_eq!(settings.quality, 24);
        assert_eq!(settings.tonemap_mode, TonemapMode::ForceOff);

        let settings = encode_settings(Some(24), Some(12), "on").unwrap();
        assert_eq!(settings.encode_mode, EncodeMode::ConstantBitrate);
        assert_eq!(settings.bitrate_mbps, 12);
    }

    #[test]
    fn test_encode_settings_rejects_bad_options() {
        assert_eq!(encode_settings(Some(40), None, "auto"), Err(SettingsError::Quality(40)));
        assert_eq!(encode_settings(None, Some(1), "auto"), Err(SettingsError::Bitrate(1)));
        assert!(matches!(encode_settings(None, None, "sometimes"), Err(SettingsError::TonemapMode(_))));
    }

    #[test]
    fn test_input_files_keeps_only_regular_files() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("a.mkv");
        std::fs::write(&file, b"x").unwrap();
        let args = vec![
            file.to_string_lossy().into_owned(),
            dir.path().to_string_lossy().into_owned(),
            dir.path().join("missing.mkv").to_string_lossy().into_owned(),
        ];
        assert_eq!(input_files(&args), vec![file]);
    }
}
