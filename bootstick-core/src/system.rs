//! The boundary between the pipeline and the host.
//!
//! Every stage reaches the machine it runs on through the [`System`] trait:
//! running programs, streaming a program's output, probing paths and the mount
//! table, sleeping and flushing buffers. [`HostSystem`] is the real thing;
//! tests drive the pipeline through a scripted implementation instead.
use std::fs;
use std::io::{self, Read};
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::Duration;

/// What an external program left behind once it exited.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, or `None` if the process was killed by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

pub trait System: Send + Sync {
    /// Runs `program` to completion, capturing both output streams.
    fn run(&self, program: &str, args: &[&str]) -> io::Result<CommandOutput>;

    /// Runs `program`, handing every stdout line to `on_line` as soon as it is
    /// read. Lines are split on both `\n` and `\r`. The returned output carries
    /// the exit status and stderr; its `stdout` is empty.
    fn stream(
        &self,
        program: &str,
        args: &[&str],
        on_line: &mut dyn FnMut(&str),
    ) -> io::Result<CommandOutput>;

    fn path_exists(&self, path: &Path) -> bool;

    /// Whether `program` can be found on `PATH`.
    fn has_program(&self, program: &str) -> bool;

    fn create_dir_all(&self, path: &Path) -> io::Result<()>;

    /// Whether something is currently mounted at `mount_point`.
    fn is_mounted(&self, mount_point: &Path) -> bool;

    fn sleep(&self, duration: Duration);

    /// Flushes all filesystem buffers to disk.
    fn sync(&self);
}

/// The [`System`] of the machine we are running on.
#[derive(Clone, Debug, Default)]
pub struct HostSystem {
    privilege_command: Option<String>,
}

impl HostSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prefixes every invocation with `command` (e.g. `sudo`).
    pub fn with_privilege_command(command: Option<String>) -> Self {
        Self {
            privilege_command: command.filter(|c| !c.trim().is_empty()),
        }
    }

    fn command(&self, program: &str, args: &[&str]) -> Command {
        let mut cmd = match &self.privilege_command {
            Some(prefix) => {
                let mut cmd = Command::new(prefix);
                cmd.arg(program);
                cmd
            }
            None => Command::new(program),
        };
        cmd.args(args).stdin(Stdio::null());
        cmd
    }
}

impl System for HostSystem {
    fn run(&self, program: &str, args: &[&str]) -> io::Result<CommandOutput> {
        let output = self.command(program, args).output()?;
        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    fn stream(
        &self,
        program: &str,
        args: &[&str],
        on_line: &mut dyn FnMut(&str),
    ) -> io::Result<CommandOutput> {
        let mut child = self
            .command(program, args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        // Drain stderr in the background so a chatty child cannot fill the pipe.
        let stderr_handle = child.stderr.take().map(|mut stderr| {
            std::thread::spawn(move || {
                let mut buf = Vec::new();
                let _ = stderr.read_to_end(&mut buf);
                String::from_utf8_lossy(&buf).into_owned()
            })
        });

        if let Some(mut stdout) = child.stdout.take() {
            if let Err(e) = pump_lines(&mut stdout, on_line) {
                // The child must not outlive the stream: it may still be
                // writing into a mount point that is about to be released.
                let _ = child.kill();
                let _ = child.wait();
                return Err(e);
            }
        }

        let status = child.wait()?;
        let stderr = stderr_handle
            .and_then(|h| h.join().ok())
            .unwrap_or_default();

        Ok(CommandOutput {
            code: status.code(),
            stdout: String::new(),
            stderr,
        })
    }

    fn path_exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn has_program(&self, program: &str) -> bool {
        which::which(program).is_ok()
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        fs::create_dir_all(path)
    }

    fn is_mounted(&self, mount_point: &Path) -> bool {
        fs::read_to_string("/proc/self/mounts")
            .map(|table| mount_table_contains(&table, mount_point))
            .unwrap_or(false)
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }

    fn sync(&self) {
        #[cfg(unix)]
        nix::unistd::sync();
    }
}

/// Reads `reader` to the end, handing each line to `on_line` as it completes.
fn pump_lines(reader: &mut dyn Read, on_line: &mut dyn FnMut(&str)) -> io::Result<()> {
    let mut splitter = LineSplitter::default();
    let mut buf = [0u8; 8192];
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        splitter.feed(&buf[..n], on_line);
    }
    splitter.finish(on_line);
    Ok(())
}

/// Reassembles lines from arbitrarily chunked output. Both `\n` and `\r`
/// terminate a line; empty lines are dropped.
#[derive(Default)]
struct LineSplitter {
    pending: Vec<u8>,
}

impl LineSplitter {
    fn feed(&mut self, chunk: &[u8], on_line: &mut dyn FnMut(&str)) {
        for &b in chunk {
            if b == b'\n' || b == b'\r' {
                self.flush(on_line);
            } else {
                self.pending.push(b);
            }
        }
    }

    fn finish(&mut self, on_line: &mut dyn FnMut(&str)) {
        self.flush(on_line);
    }

    fn flush(&mut self, on_line: &mut dyn FnMut(&str)) {
        if !self.pending.is_empty() {
            on_line(&String::from_utf8_lossy(&self.pending));
            self.pending.clear();
        }
    }
}

/// Checks a `/proc/mounts`-formatted table for a mount at `mount_point`.
fn mount_table_contains(table: &str, mount_point: &Path) -> bool {
    let wanted = mount_point.to_string_lossy();
    table
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .any(|target| unescape_mount_field(target) == wanted)
}

/// Undoes the octal escaping the kernel applies to whitespace and backslashes.
fn unescape_mount_field(field: &str) -> String {
    field
        .replace("\\040", " ")
        .replace("\\011", "\t")
        .replace("\\012", "\n")
        .replace("\\134", "\\")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn split(chunks: &[&[u8]]) -> Vec<String> {
        let mut lines = Vec::new();
        let mut splitter = LineSplitter::default();
        let mut push = |l: &str| lines.push(l.to_string());
        for chunk in chunks {
            splitter.feed(chunk, &mut push);
        }
        splitter.finish(&mut push);
        lines
    }

    #[test]
    fn carriage_returns_split_progress_redraws() {
        let lines = split(&[b"  1.00M  10%\r  2.00M  2", b"0%\r  4.00M 40%\n", b"done"]);
        assert_eq!(lines, vec!["  1.00M  10%", "  2.00M  20%", "  4.00M 40%", "done"]);
    }

    #[test]
    fn mount_table_lookup_handles_escaped_spaces() {
        let table = "\
/dev/sda2 / ext4 rw,relatime 0 0
/dev/loop3 /tmp/bootable_iso_mount iso9660 ro,relatime 0 0
/dev/sdb1 /media/my\\040stick vfat rw 0 0
";
        assert!(mount_table_contains(table, Path::new("/tmp/bootable_iso_mount")));
        assert!(mount_table_contains(table, Path::new("/media/my stick")));
        assert!(!mount_table_contains(table, Path::new("/tmp/bootable_usb_mount")));
    }

    /// Yields one chunk, then fails like a broken pipe.
    struct BrokenAfterFirstChunk(bool);

    impl Read for BrokenAfterFirstChunk {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if std::mem::replace(&mut self.0, true) {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed"));
            }
            let chunk = b"  1.00G  20%\r  2.00G  4";
            buf[..chunk.len()].copy_from_slice(chunk);
            Ok(chunk.len())
        }
    }

    #[test]
    fn read_errors_end_the_stream() {
        let mut lines = Vec::new();
        let result = pump_lines(&mut BrokenAfterFirstChunk(false), &mut |l: &str| {
            lines.push(l.to_string())
        });
        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::BrokenPipe);
        assert_eq!(lines, vec!["  1.00G  20%"]);
    }

    #[test]
    fn host_stream_delivers_lines_and_exit_status() {
        let mut lines = Vec::new();
        let output = HostSystem::new()
            .stream(
                "sh",
                &["-c", "printf 'a 10%%\\rb 20%%\\n'; echo oops >&2; exit 3"],
                &mut |l: &str| lines.push(l.to_string()),
            )
            .unwrap();
        assert_eq!(lines, vec!["a 10%", "b 20%"]);
        assert_eq!(output.code, Some(3));
        assert_eq!(output.stderr.trim(), "oops");
    }
}
