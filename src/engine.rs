use std::io::{BufRead, BufReader, ErrorKind, Read};
use std::path::PathBuf;
use std::process::{Child, ChildStderr, Command, ExitStatus, Stdio};
use tracing::{debug, warn};

use crate::command::ArgumentList;
use crate::error::EngineError;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EngineExit {
    pub success: bool,
    pub code: Option<i32>,
}

impl From<ExitStatus> for EngineExit {
    fn from(status: ExitStatus) -> Self {
        EngineExit {
            success: status.success(),
            code: status.code(),
        }
    }
}

/// A running transcode. Owned by exactly one runner.
pub trait EngineProcess {
    /// Next line of diagnostic output, `None` once the stream closes.
    fn next_line(&mut self) -> Option<String>;

    fn try_wait(&mut self) -> Result<Option<EngineExit>, EngineError>;

    fn wait(&mut self) -> Result<EngineExit, EngineError>;

    /// Asks the process to stop and finalize.
    fn terminate(&mut self) -> Result<(), EngineError>;

    /// Kills the process and everything it spawned.
    fn kill(&mut self) -> Result<(), EngineError>;
}

pub trait Engine: Send {
    fn launch(&self, args: &ArgumentList) -> Result<Box<dyn EngineProcess>, EngineError>;
}

pub struct FFmpegEngine {
    program: PathBuf,
}

impl FFmpegEngine {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        FFmpegEngine { program: program.into() }
    }

    pub fn is_installed(&self) -> bool {
        let cmd = Command::new(&self.program)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        match cmd {
            Ok(status) => status.success(),
            Err(_) => false,
        }
    }
}

impl Default for FFmpegEngine {
    fn default() -> Self {
        FFmpegEngine::new("ffmpeg")
    }
}

impl Engine for FFmpegEngine {
    fn launch(&self, args: &ArgumentList) -> Result<Box<dyn EngineProcess>, EngineError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(args.iter())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        // own process group, so terminal ^C reaches us and not ffmpeg, and
        // the whole tree can be signalled at once
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        debug!("{:?} {}", self.program, args);
        let mut child = cmd.spawn()
            .map_err(|source| EngineError::Spawn { program: self.program.clone(), source })?;
        let stderr = child.stderr.take();
        Ok(Box::new(FFmpegProcess {
            child,
            lines: stderr.map(ProgressLines::new),
        }))
    }
}

struct FFmpegProcess {
    child: Child,
    lines: Option<ProgressLines<ChildStderr>>,
}

impl EngineProcess for FFmpegProcess {
    fn next_line(&mut self) -> Option<String> {
        self.lines.as_mut().and_then(|l| l.next())
    }

    fn try_wait(&mut self) -> Result<Option<EngineExit>, EngineError> {
        self.child.try_wait()
            .map(|status| status.map(EngineExit::from))
            .map_err(EngineError::Wait)
    }

    fn wait(&mut self) -> Result<EngineExit, EngineError> {
        self.child.wait().map(EngineExit::from).map_err(EngineError::Wait)
    }

    fn terminate(&mut self) -> Result<(), EngineError> {
        let pid = self.child.id();
        signal_tree(pid, false)
    }

    fn kill(&mut self) -> Result<(), EngineError> {
        let pid = self.child.id();
        if let Err(err) = signal_tree(pid, true) {
            warn!("{}", err);
        }
        // the direct child at least, even if the tree signal failed
        match self.child.kill() {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::InvalidInput => Ok(()),
            Err(source) => Err(EngineError::Signal { pid, source }),
        }
    }
}

#[cfg(unix)]
fn signal_tree(pid: u32, force: bool) -> Result<(), EngineError> {
    let signal = if force { "-KILL" } else { "-TERM" };
    let status = Command::new("kill")
        .args([signal, "--", &format!("-{}", pid)])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map_err(|source| EngineError::Signal { pid, source })?;
    if status.success() {
        Ok(())
    } else {
        Err(EngineError::Signal { pid, source: std::io::Error::other(format!("kill {} exited with {}", signal, status)) })
    }
}

#[cfg(windows)]
fn signal_tree(pid: u32, force: bool) -> Result<(), EngineError> {
    let pid_arg = pid.to_string();
    let mut args = vec!["/T", "/PID", pid_arg.as_str()];
    if force {
        args.insert(0, "/F");
    }
    let status = Command::new("taskkill")
        .args(&args)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map_err(|source| EngineError::Signal { pid, source })?;
    if status.success() {
        Ok(())
    } else {
        Err(EngineError::Signal { pid, source: std::io::Error::other(format!("taskkill exited with {}", status)) })
    }
}

/// Splits a stream on `\r` as well as `\n`; ffmpeg rewrites its status
/// line in place with carriage returns.
pub struct ProgressLines<R: Read> {
    reader: BufReader<R>,
    buf: Vec<u8>,
}

impl<R: Read> ProgressLines<R> {
    pub fn new(inner: R) -> Self {
        ProgressLines {
            reader: BufReader::new(inner),
            buf: Vec::new(),
        }
    }

    fn take_line(&mut self) -> String {
        let line = String::from_utf8_lossy(&self.buf).into_owned();
        self.buf.clear();
        line
    }
}

impl<R: Read> Iterator for ProgressLines<R> {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        loop {
            let (found, used) = {
                let available: &[u8] = match self.reader.fill_buf() {
                    Ok(available) => available,
                    Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                    Err(_) => &[],
                };
                if available.is_empty() {
                    return if self.buf.is_empty() { None } else { Some(self.take_line()) };
                }
                match available.iter().position(|b| *b == b'\r' || *b == b'\n') {
                    Some(i) => {
                        self.buf.extend_from_slice(&available[..i]);
                        (true, i + 1)
                    },
                    None => {
                        self.buf.extend_from_slice(available);
                        (false, available.len())
                    },
                }
            };
            self.reader.consume(used);
            if found && !self.buf.is_empty() {
                return Some(self.take_line());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_progress_lines_split_on_cr_and_lf() {
        let input = b"Input #0, matroska\r\nframe=1 time=00:00:01.00\rframe=2 time=00:00:02.00\r\n\nlast";
        let lines: Vec<String> = ProgressLines::new(Cursor::new(&input[..])).collect();
        assert_eq!(lines, vec![
            "Input #0, matroska",
            "frame=1 time=00:00:01.00",
            "frame=2 time=00:00:02.00",
            "last",
        ]);
    }

    #[test]
    fn test_progress_lines_lossy_utf8() {
        let input = b"title=\xff\xfe ok\n";
        let lines: Vec<String> = ProgressLines::new(Cursor::new(&input[..])).collect();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].ends_with(" ok"));
    }

    #[test]
    fn test_progress_lines_small_reads() {
        // BufReader with a tiny capacity exercises lines spanning refills
        let input = b"time=00:00:01.00\rtime=00:00:02.00\r";
        let mut lines = ProgressLines {
            reader: BufReader::with_capacity(3, Cursor::new(&input[..])),
            buf: Vec::new(),
        };
        assert_eq!(lines.next().as_deref(), Some("time=00:00:01.00"));
        assert_eq!(lines.next().as_deref(), Some("time=00:00:02.00"));
        assert_eq!(lines.next(), None);
    }

    /// Process state letter from `/proc/<pid>/stat`; `None` once reaped.
    #[cfg(target_os = "linux")]
    fn proc_state(pid: u32) -> Option<char> {
        let stat = std::fs::read_to_string(format!("/proc/{}/stat", pid)).ok()?;
        stat.rsplit(')').next()?.trim_start().chars().next()
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_kill_takes_down_the_whole_group() {
        use std::thread;
        use std::time::{Duration, Instant};

        // ignored signals are inherited, so the forked sleep shrugs off TERM too
        let mut args = ArgumentList::new();
        args.push("-c");
        args.push("trap '' TERM; sleep 300 & echo \"child=$!\" >&2; wait");
        let mut process = FFmpegEngine::new("sh").launch(&args).unwrap();

        let line = process.next_line().unwrap();
        let child: u32 = line.strip_prefix("child=").unwrap().parse().unwrap();

        process.terminate().unwrap();
        thread::sleep(Duration::from_millis(200));
        assert_eq!(process.try_wait().unwrap(), None);

        process.kill().unwrap();
        let exit = process.wait().unwrap();
        assert!(!exit.success);

        let deadline = Instant::now() + Duration::from_secs(5);
        while !matches!(proc_state(child), None | Some('Z')) {
            assert!(Instant::now() < deadline, "sleep {} survived the kill", child);
            thread::sleep(Duration::from_millis(20));
        }
    }

    #[test]
    fn test_missing_engine_fails_to_launch() {
        let engine = FFmpegEngine::new("/nonexistent/ffmpeg-binary");
        assert!(!engine.is_installed());
        let err = engine.launch(&ArgumentList::new()).err().unwrap();
        assert!(matches!(err, EngineError::Spawn { .. }));
    }
}
