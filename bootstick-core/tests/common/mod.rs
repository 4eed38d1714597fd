#![allow(dead_code)]

use bootstick_core::progress::{Reporter, Severity};
use bootstick_core::system::{CommandOutput, System};
use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, mpsc};
use std::time::Duration;

pub const LSBLK_UNMOUNTED: &str =
    r#"{"blockdevices": [{"name": "/dev/sdb", "mountpoint": null}]}"#;

/// A scripted [`System`] that records every invocation.
pub struct FakeSystem {
    calls: Mutex<Vec<Vec<String>>>,
    failing: HashSet<String>,
    failing_mounts: HashSet<PathBuf>,
    panicking: HashSet<String>,
    late_paths: Mutex<HashMap<PathBuf, u32>>,
    absent_paths: HashSet<PathBuf>,
    missing_programs: HashSet<String>,
    mounted: Mutex<HashSet<PathBuf>>,
    lsblk_json: String,
    copy_lines: Vec<String>,
    sleeps: Mutex<Vec<Duration>>,
    synced: AtomicBool,
    copy_blocker: Mutex<Option<mpsc::Receiver<()>>>,
}

impl Default for FakeSystem {
    fn default() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            failing: HashSet::new(),
            failing_mounts: HashSet::new(),
            panicking: HashSet::new(),
            late_paths: Mutex::new(HashMap::new()),
            absent_paths: HashSet::new(),
            missing_programs: HashSet::new(),
            mounted: Mutex::new(HashSet::new()),
            lsblk_json: LSBLK_UNMOUNTED.to_string(),
            copy_lines: [
                "sending incremental file list",
                "        524.29M  10%   95.12MB/s    0:00:05 (xfr#12, to-chk=900/1000)",
                "          2.62G  50%  101.45MB/s    0:00:25 (xfr#400, to-chk=500/1000)",
                "          5.24G 100%  100.02MB/s    0:00:50 (xfr#1000, to-chk=0/1000)",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            sleeps: Mutex::new(Vec::new()),
            synced: AtomicBool::new(false),
            copy_blocker: Mutex::new(None),
        }
    }
}

impl FakeSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every invocation of `program` exit with status 1.
    pub fn failing(mut self, program: &str) -> Self {
        self.failing.insert(program.to_string());
        self
    }

    /// Makes `mount` fail when `mount_point` is its target.
    pub fn failing_mount_at(mut self, mount_point: &str) -> Self {
        self.failing_mounts.insert(PathBuf::from(mount_point));
        self
    }

    /// Makes every invocation of `program` panic.
    pub fn panicking(mut self, program: &str) -> Self {
        self.panicking.insert(program.to_string());
        self
    }

    /// Reports `path` as missing for the first `polls` existence checks.
    pub fn appearing_after(self, path: &str, polls: u32) -> Self {
        self.late_paths
            .lock()
            .unwrap()
            .insert(PathBuf::from(path), polls);
        self
    }

    pub fn without_path(mut self, path: &str) -> Self {
        self.absent_paths.insert(PathBuf::from(path));
        self
    }

    pub fn without_program(mut self, program: &str) -> Self {
        self.missing_programs.insert(program.to_string());
        self
    }

    pub fn with_lsblk(mut self, json: &str) -> Self {
        self.lsblk_json = json.to_string();
        self
    }

    pub fn with_copy_lines(mut self, lines: &[&str]) -> Self {
        self.copy_lines = lines.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Makes the copy wait until the returned sender fires (or is dropped).
    pub fn block_copy(self) -> (Self, mpsc::Sender<()>) {
        let (tx, rx) = mpsc::channel();
        *self.copy_blocker.lock().unwrap() = Some(rx);
        (self, tx)
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }

    /// Invocations of `program`, arguments only.
    pub fn calls_to(&self, program: &str) -> Vec<Vec<String>> {
        self.calls()
            .into_iter()
            .filter(|c| c[0] == program)
            .map(|c| c[1..].to_vec())
            .collect()
    }

    pub fn programs(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c[0].clone()).collect()
    }

    pub fn is_mounted_now(&self, path: &str) -> bool {
        self.mounted.lock().unwrap().contains(Path::new(path))
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }

    pub fn synced(&self) -> bool {
        self.synced.load(Ordering::SeqCst)
    }

    fn record(&self, program: &str, args: &[&str]) {
        let mut call = vec![program.to_string()];
        call.extend(args.iter().map(|a| a.to_string()));
        self.calls.lock().unwrap().push(call);
    }

    fn failure(&self, program: &str) -> CommandOutput {
        CommandOutput {
            code: Some(1),
            stdout: String::new(),
            stderr: format!("{program}: simulated failure"),
        }
    }
}

impl System for FakeSystem {
    fn run(&self, program: &str, args: &[&str]) -> io::Result<CommandOutput> {
        self.record(program, args);
        if self.panicking.contains(program) {
            panic!("{program} exploded");
        }
        if self.failing.contains(program) {
            return Ok(self.failure(program));
        }
        if program == "mount"
            && args
                .last()
                .is_some_and(|target| self.failing_mounts.contains(Path::new(target)))
        {
            return Ok(CommandOutput {
                code: Some(32),
                stdout: String::new(),
                stderr: "mount: target is busy".into(),
            });
        }

        let mut output = CommandOutput {
            code: Some(0),
            ..CommandOutput::default()
        };
        match program {
            "lsblk" => output.stdout = self.lsblk_json.clone(),
            "du" => output.stdout = format!("5627793408\t{}", args[1]),
            "mount" => {
                if let Some(target) = args.last() {
                    self.mounted.lock().unwrap().insert(PathBuf::from(target));
                }
            }
            "umount" => {
                if let Some(target) = args.last() {
                    self.mounted.lock().unwrap().remove(Path::new(target));
                }
            }
            _ => {}
        }
        Ok(output)
    }

    fn stream(
        &self,
        program: &str,
        args: &[&str],
        on_line: &mut dyn FnMut(&str),
    ) -> io::Result<CommandOutput> {
        self.record(program, args);
        if let Some(rx) = self.copy_blocker.lock().unwrap().take() {
            let _ = rx.recv();
        }
        for line in &self.copy_lines {
            on_line(line);
        }
        if self.failing.contains(program) {
            return Ok(CommandOutput {
                code: Some(23),
                stdout: String::new(),
                stderr: "rsync error: some files/attrs were not transferred (code 23)".into(),
            });
        }
        Ok(CommandOutput {
            code: Some(0),
            ..CommandOutput::default()
        })
    }

    fn path_exists(&self, path: &Path) -> bool {
        if let Some(remaining) = self.late_paths.lock().unwrap().get_mut(path) {
            if *remaining > 0 {
                *remaining -= 1;
                return false;
            }
        }
        !self.absent_paths.contains(path)
    }

    fn has_program(&self, program: &str) -> bool {
        !self.missing_programs.contains(program)
    }

    fn create_dir_all(&self, _path: &Path) -> io::Result<()> {
        Ok(())
    }

    fn is_mounted(&self, mount_point: &Path) -> bool {
        self.mounted.lock().unwrap().contains(mount_point)
    }

    fn sleep(&self, duration: Duration) {
        self.sleeps.lock().unwrap().push(duration);
    }

    fn sync(&self) {
        self.synced.store(true, Ordering::SeqCst);
    }
}

/// A [`Reporter`] that keeps everything it is told.
#[derive(Default)]
pub struct RecordingReporter {
    pub reports: Mutex<Vec<(u8, String)>>,
    pub logs: Mutex<Vec<(String, Severity)>>,
}

impl RecordingReporter {
    pub fn percents(&self) -> Vec<u8> {
        self.reports.lock().unwrap().iter().map(|(p, _)| *p).collect()
    }

    pub fn has_report(&self, percent: u8, status: &str) -> bool {
        self.reports
            .lock()
            .unwrap()
            .iter()
            .any(|(p, s)| *p == percent && s == status)
    }

    pub fn logs_with(&self, severity: Severity) -> Vec<String> {
        self.logs
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, s)| *s == severity)
            .map(|(m, _)| m.clone())
            .collect()
    }
}

impl Reporter for RecordingReporter {
    fn report(&self, percent: u8, status: &str) {
        self.reports.lock().unwrap().push((percent, status.to_string()));
    }

    fn log(&self, message: &str, severity: Severity) {
        self.logs.lock().unwrap().push((message.to_string(), severity));
    }
}
