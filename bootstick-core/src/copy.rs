//! Moving the image's file tree onto the new partition.
//!
//! The image is loop-mounted read-only and the partition mounted next to it;
//! `rsync` then copies the tree while its `--info=progress2` output is turned
//! into pipeline progress. Both mounts are held by [`MountGuard`]s, so they
//! are released however the copy ends.
use crate::command::{CommandRunner, command_line};
use crate::config::ProvisionConfig;
use crate::error::{ProvisionError, Result};
use crate::progress::{ProgressEvent, Severity};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Where the copy phase starts on the pipeline's 0-100 scale.
pub const COPY_START_PERCENT: u8 = 30;
/// Where the copy phase ends on the pipeline's 0-100 scale.
pub const COPY_END_PERCENT: u8 = 90;

/// Extracts the completion percentage from a line of copy-tool output, i.e.
/// the first run of digits directly followed by `%`.
pub fn parse_copy_percent(line: &str) -> Option<u8> {
    let bytes = line.as_bytes();
    for (idx, _) in line.match_indices('%') {
        let start = bytes[..idx]
            .iter()
            .rposition(|b| !b.is_ascii_digit())
            .map_or(0, |i| i + 1);
        if start < idx {
            if let Ok(pct) = line[start..idx].parse::<u32>() {
                return Some(pct.min(100) as u8);
            }
        }
    }
    None
}

/// Maps a copy percentage onto the copy phase's share of the run:
/// `30 + floor(pct * 0.6)`.
pub fn rescale_copy_percent(copy_percent: u8) -> u8 {
    let span = u32::from(COPY_END_PERCENT - COPY_START_PERCENT);
    COPY_START_PERCENT + (u32::from(copy_percent.min(100)) * span / 100) as u8
}

/// Turns copy-tool output, line by line, into progress events.
///
/// Every line carrying a percentage becomes a log line. The reporter is only
/// woken once more than `interval` has passed since its last update, so a
/// fast stream does not flood the front end.
#[derive(Debug)]
pub struct CopyProgress {
    interval: Duration,
    last_update: Option<Instant>,
}

impl CopyProgress {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_update: None,
        }
    }

    pub fn next_line(&mut self, line: &str, now: Instant) -> Option<ProgressEvent> {
        let copy_percent = parse_copy_percent(line)?;

        let due = self
            .last_update
            .is_none_or(|last| now.saturating_duration_since(last) > self.interval);
        let status = if due {
            self.last_update = Some(now);
            Some(format!("Copying files: {copy_percent}%"))
        } else {
            None
        };

        Some(ProgressEvent {
            percent: rescale_copy_percent(copy_percent),
            status,
            log: Some(line.trim().to_string()),
            severity: Severity::Info,
        })
    }
}

/// Unmounts `mount_point`, retrying with a pause in between. Returns whether
/// it eventually succeeded; giving up is only a warning.
pub(crate) fn unmount_with_retry(
    runner: &CommandRunner<'_>,
    mount_point: &Path,
    attempts: u32,
    backoff: Duration,
) -> bool {
    let target = mount_point.to_string_lossy();
    for attempt in 1..=attempts {
        match runner.run_tolerant("umount", &[&target], None) {
            Ok(_) => return true,
            Err(e) => {
                tracing::info!(
                    mount_point = %target,
                    attempt,
                    attempts,
                    error = %e,
                    "unmount failed"
                );
                if attempt < attempts {
                    runner.system().sleep(backoff);
                }
            }
        }
    }
    runner.progress().warn(&format!(
        "Could not unmount {target} after {attempts} attempts"
    ));
    false
}

/// A mounted scratch directory, unmounted when dropped.
pub(crate) struct MountGuard<'r, 'a> {
    runner: &'r CommandRunner<'a>,
    mount_point: PathBuf,
    attempts: u32,
    backoff: Duration,
}

impl<'r, 'a> MountGuard<'r, 'a> {
    /// Runs `mount <args> <mount_point>` and guards the result.
    pub(crate) fn mount(
        runner: &'r CommandRunner<'a>,
        config: &ProvisionConfig,
        args: &[&str],
        mount_point: &Path,
        description: &str,
    ) -> Result<Self> {
        let target = mount_point.to_string_lossy().into_owned();
        let mut full = args.to_vec();
        full.push(target.as_str());
        runner.run("mount", &full, Some(description))?;
        Ok(Self {
            runner,
            mount_point: mount_point.to_path_buf(),
            attempts: config.unmount_attempts,
            backoff: config.unmount_backoff(),
        })
    }

    pub(crate) fn path(&self) -> &Path {
        &self.mount_point
    }
}

impl Drop for MountGuard<'_, '_> {
    fn drop(&mut self) {
        self.runner
            .progress()
            .info(&format!("Unmounting {}...", self.mount_point.display()));
        unmount_with_retry(self.runner, &self.mount_point, self.attempts, self.backoff);
    }
}

/// Copies the whole tree of `image` onto `partition`.
pub(crate) fn copy_image(
    runner: &CommandRunner<'_>,
    config: &ProvisionConfig,
    image: &Path,
    partition: &Path,
) -> Result<()> {
    let system = runner.system();
    system.create_dir_all(&config.image_mount)?;
    system.create_dir_all(&config.target_mount)?;

    let image_arg = image.to_string_lossy();
    let source = MountGuard::mount(
        runner,
        config,
        &["-o", "loop,ro", &image_arg],
        &config.image_mount,
        "Mounting ISO file...",
    )?;
    let partition_arg = partition.to_string_lossy();
    let target = MountGuard::mount(
        runner,
        config,
        &[&partition_arg],
        &config.target_mount,
        "Mounting USB partition...",
    )?;

    log_source_size(runner, source.path());
    copy_tree(runner, config, source.path(), target.path())
}

fn log_source_size(runner: &CommandRunner<'_>, source: &Path) {
    let progress = runner.progress();
    progress.info("Calculating total size...");
    let source = source.to_string_lossy();
    let size = runner
        .run_tolerant("du", &["-sb", &source], None)
        .ok()
        .and_then(|out| out.split_whitespace().next()?.parse::<u64>().ok());
    match size {
        Some(bytes) => progress.info(&format!(
            "Total size to copy: {:.2} GB",
            bytes as f64 / (1024.0 * 1024.0 * 1024.0)
        )),
        None => progress.warn("Could not determine the size of the image contents"),
    }
}

fn copy_tree(
    runner: &CommandRunner<'_>,
    config: &ProvisionConfig,
    source: &Path,
    target: &Path,
) -> Result<()> {
    let progress = runner.progress();
    // The trailing slash makes rsync copy the contents, not the directory.
    let source = format!("{}/", source.display());
    let target = target.to_string_lossy().into_owned();
    let args = [
        "-ah",
        "--no-inc-recursive",
        "--info=progress2",
        source.as_str(),
        target.as_str(),
    ];

    progress.info("Copying files (this may take several minutes)...");
    let cmdline = command_line("rsync", &args);
    tracing::info!(command = %cmdline, "streaming");
    progress.info(&format!("Running: {cmdline}"));

    let mut translator = CopyProgress::new(config.progress_interval());
    let output = runner
        .system()
        .stream("rsync", &args, &mut |line: &str| {
            if let Some(event) = translator.next_line(line, Instant::now()) {
                progress.emit(event);
            }
        })
        .map_err(|e| ProvisionError::ToolInvocation {
            program: "rsync".to_string(),
            code: None,
            stderr: e.to_string(),
        })?;

    if !output.success() {
        let stderr = output.stderr.trim().to_string();
        tracing::error!(code = ?output.code, %stderr, "copy failed");
        progress.error(&format!("Copy failed: {stderr}"));
        return Err(ProvisionError::ToolInvocation {
            program: "rsync".to_string(),
            code: output.code,
            stderr,
        });
    }

    progress.report(COPY_END_PERCENT, "File copy complete");
    Ok(())
}
