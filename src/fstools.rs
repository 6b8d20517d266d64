use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

pub const OUTPUT_SUFFIX: &str = "_conv";
pub const OUTPUT_EXTENSION: &str = "mp4";

pub enum DirEntryCategory {
    DoesNotExist,
    RegularFile,
    SymbolicLink,
    Directory,
    Unknown,
}

pub fn classify_file(path: &Path) -> DirEntryCategory {
    match fs::symlink_metadata(path) {
        Ok(metadata) => {
            if metadata.is_symlink() {
                match fs::metadata(path) {
                    Ok(target) if target.is_file() => DirEntryCategory::RegularFile,
                    _ => DirEntryCategory::SymbolicLink,
                }
            } else if metadata.is_file() {
                DirEntryCategory::RegularFile
            } else if metadata.is_dir() {
                DirEntryCategory::Directory
            } else {
                DirEntryCategory::Unknown
            }
        },
        Err(_) => DirEntryCategory::DoesNotExist,
    }
}

/// First free name of the form `<stem>_conv.mp4`, `<stem>_conv_1.mp4`, ...
/// in `save_dir`, or next to the source when no folder is given.
pub fn unique_output_path(source: &Path, save_dir: Option<&Path>) -> PathBuf {
    let dir = match save_dir {
        Some(dir) => dir.to_path_buf(),
        None => source.parent().map(Path::to_path_buf).unwrap_or_default(),
    };
    let stem = source.file_stem().map(|s| s.to_os_string()).unwrap_or_else(|| OsString::from("output"));

    let mut n = 0;
    loop {
        let candidate = dir.join(candidate_name(&stem, n));
        if !candidate.exists() {
            return candidate;
        }
        n += 1;
    }
}

fn candidate_name(stem: &OsString, n: usize) -> OsString {
    let mut name = stem.clone();
    name.push(OUTPUT_SUFFIX);
    if n > 0 {
        name.push(format!("_{}", n));
    }
    name.push(".");
    name.push(OUTPUT_EXTENSION);
    name
}
