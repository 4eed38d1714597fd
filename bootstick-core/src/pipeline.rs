//! Sequencing the stages of a provisioning run.
//!
//! A run moves through
//! `Unmounting → Wiping → Partitioning → Formatting → Copying →
//! InstallingBootloader → Finalizing` and ends as either succeeded or failed.
//! The first fatal error ends the run on the spot; nothing already written to
//! the device is rolled back. On failure a final pass releases the scratch
//! mount points in case a stage left something behind.
//!
//! Only one run may be active per [`Provisioner`]. The scratch mount points
//! are fixed paths, so two runs at once would trample each other.
use crate::bootloader;
use crate::command::CommandRunner;
use crate::config::ProvisionConfig;
use crate::copy;
use crate::error::{ProvisionError, Result};
use crate::format;
use crate::inspect;
use crate::partition::Partitioner;
use crate::progress::{LogEntry, ProgressTracker, Reporter};
use crate::request::ProvisionRequest;
use crate::system::System;
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

/// Number of user-visible steps; finalizing is not counted.
const STEP_COUNT: u8 = 6;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Stage {
    Idle,
    Unmounting,
    Wiping,
    Partitioning,
    Formatting,
    Copying,
    InstallingBootloader,
    Finalizing,
}

impl Stage {
    /// Start and end of the stage on the run's 0-100 scale.
    pub fn percent_range(self) -> (u8, u8) {
        match self {
            Stage::Idle => (0, 0),
            Stage::Unmounting => (0, 5),
            Stage::Wiping => (5, 10),
            Stage::Partitioning => (10, 20),
            Stage::Formatting => (20, 30),
            Stage::Copying => (copy::COPY_START_PERCENT, copy::COPY_END_PERCENT),
            Stage::InstallingBootloader => (90, 95),
            Stage::Finalizing => (95, 100),
        }
    }

    fn step(self) -> Option<u8> {
        match self {
            Stage::Unmounting => Some(1),
            Stage::Wiping => Some(2),
            Stage::Partitioning => Some(3),
            Stage::Formatting => Some(4),
            Stage::Copying => Some(5),
            Stage::InstallingBootloader => Some(6),
            Stage::Idle | Stage::Finalizing => None,
        }
    }

    fn title(self) -> &'static str {
        match self {
            Stage::Idle => "Ready",
            Stage::Unmounting => "Unmounting device",
            Stage::Wiping => "Wiping device",
            Stage::Partitioning => "Creating partition table",
            Stage::Formatting => "Formatting partition",
            Stage::Copying => "Copying ISO contents",
            Stage::InstallingBootloader => "Installing bootloader",
            Stage::Finalizing => "Finalizing",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.title())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    InProgress,
    Succeeded,
    Failed(String),
}

/// Everything a caller learns about a finished run.
#[derive(Debug)]
pub struct RunReport {
    /// Never [`Outcome::InProgress`].
    pub outcome: Outcome,
    /// The last stage the run entered.
    pub stage: Stage,
    /// Last percentage reported.
    pub percent: u8,
    /// The fatal error, if the run failed.
    pub error: Option<ProvisionError>,
    /// The complete log of the run, in order.
    pub log: Vec<LogEntry>,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.outcome == Outcome::Succeeded
    }
}

struct RunState {
    stage: Stage,
    outcome: Outcome,
}

/// Releases the single-run gate when the run it guards is over.
struct ActiveRun(Arc<AtomicBool>);

impl Drop for ActiveRun {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Starts provisioning runs, at most one at a time.
pub struct Provisioner {
    system: Arc<dyn System>,
    config: ProvisionConfig,
    active: Arc<AtomicBool>,
}

impl Provisioner {
    pub fn new(system: Arc<dyn System>, config: ProvisionConfig) -> Self {
        Self {
            system,
            config,
            active: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn config(&self) -> &ProvisionConfig {
        &self.config
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Validates `request` and runs it on a dedicated worker thread.
    ///
    /// Fails with [`ProvisionError::Validation`] if another run is still in
    /// progress or the request does not check out; in both cases nothing has
    /// been touched.
    pub fn start(
        &self,
        request: ProvisionRequest,
        reporter: Arc<dyn Reporter>,
    ) -> Result<RunHandle> {
        let gate = self.acquire(&request)?;
        let system = Arc::clone(&self.system);
        let config = self.config.clone();

        let worker = std::thread::Builder::new()
            .name("provision".to_string())
            .spawn(move || {
                let _gate = gate;
                execute(system.as_ref(), &config, &request, reporter.as_ref())
            })?;

        Ok(RunHandle { worker })
    }

    /// Like [`start`](Self::start), but runs on the calling thread.
    pub fn run(&self, request: &ProvisionRequest, reporter: &dyn Reporter) -> Result<RunReport> {
        let _gate = self.acquire(request)?;
        Ok(execute(self.system.as_ref(), &self.config, request, reporter))
    }

    fn acquire(&self, request: &ProvisionRequest) -> Result<ActiveRun> {
        if self
            .active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(ProvisionError::validation(
                "a provisioning run is already in progress",
            ));
        }
        let gate = ActiveRun(Arc::clone(&self.active));
        self.config.validate()?;
        request.validate(self.system.as_ref())?;
        Ok(gate)
    }
}

/// A run in progress. The run cannot be cancelled; dropping the handle
/// detaches from it without stopping it.
pub struct RunHandle {
    worker: JoinHandle<RunReport>,
}

impl RunHandle {
    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }

    /// Waits for the run to end and returns its report.
    pub fn join(self) -> RunReport {
        self.worker.join().unwrap_or_else(|_| RunReport {
            outcome: Outcome::Failed("provisioning worker panicked".to_string()),
            stage: Stage::Idle,
            percent: 0,
            error: None,
            log: Vec::new(),
        })
    }
}

fn execute(
    system: &dyn System,
    config: &ProvisionConfig,
    request: &ProvisionRequest,
    reporter: &dyn Reporter,
) -> RunReport {
    let progress = ProgressTracker::new(reporter);
    let runner = CommandRunner::new(system, &progress);
    let mut state = RunState {
        stage: Stage::Idle,
        outcome: Outcome::InProgress,
    };

    tracing::info!(
        image = %request.image().display(),
        device = %request.device().display(),
        boot_mode = %request.boot_mode(),
        scheme = %request.scheme(),
        file_system = %request.file_system(),
        label = request.label(),
        "provisioning run started"
    );

    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        run_stages(&runner, config, request, &mut state)
    }));
    let error = match result {
        Ok(Ok(())) => {
            state.outcome = Outcome::Succeeded;
            None
        }
        Ok(Err(e)) => {
            tracing::error!(stage = %state.stage, error = %e, "provisioning run failed");
            progress.error(&format!("Failed to create bootable USB: {e}"));
            release_scratch_mounts(&runner, config);
            state.outcome = Outcome::Failed(e.to_string());
            Some(e)
        }
        Err(payload) => {
            let reason = format!("internal error: {}", panic_message(payload.as_ref()));
            tracing::error!(stage = %state.stage, %reason, "provisioning run panicked");
            progress.error(&format!("Failed to create bootable USB: {reason}"));
            release_scratch_mounts(&runner, config);
            state.outcome = Outcome::Failed(reason);
            None
        }
    };

    let percent = progress.percent();
    RunReport {
        outcome: state.outcome,
        stage: state.stage,
        percent,
        error,
        log: progress.into_history(),
    }
}

fn run_stages(
    runner: &CommandRunner<'_>,
    config: &ProvisionConfig,
    request: &ProvisionRequest,
    state: &mut RunState,
) -> Result<()> {
    let progress = runner.progress();
    let device = request.device();
    let banner = "=".repeat(50);
    progress.info(&banner);
    progress.info("Starting bootable USB creation process...");
    progress.info(&banner);

    enter(runner, state, Stage::Unmounting);
    inspect::unmount_device(runner, device);
    complete(runner, state);

    enter(runner, state, Stage::Wiping);
    let partitioner = Partitioner::new(runner, config, device);
    partitioner.wipe()?;
    complete(runner, state);

    enter(runner, state, Stage::Partitioning);
    let partition = partitioner.create_layout(request.scheme())?;
    complete(runner, state);

    enter(runner, state, Stage::Formatting);
    format::format_partition(runner, &partition, request.file_system(), request.label())?;
    complete(runner, state);

    enter(runner, state, Stage::Copying);
    copy::copy_image(runner, config, request.image(), &partition)?;
    complete(runner, state);

    enter(runner, state, Stage::InstallingBootloader);
    bootloader::install(runner, config, request.boot_mode(), device, &partition);
    complete(runner, state);

    enter(runner, state, Stage::Finalizing);
    progress.report(95, "Finalizing: Syncing data to disk...");
    progress.info("Syncing data to disk...");
    runner.system().sync();
    progress.report(100, "Complete!");

    progress.success(&banner);
    progress.success("Bootable USB created successfully!");
    progress.success(&banner);
    progress.info(&format!(
        "You can now safely remove the USB device: {}",
        device.display()
    ));
    Ok(())
}

fn enter(runner: &CommandRunner<'_>, state: &mut RunState, stage: Stage) {
    tracing::info!(from = %state.stage, to = %stage, "stage transition");
    state.stage = stage;
    let Some(step) = stage.step() else {
        return;
    };
    let (start, _) = stage.percent_range();
    let progress = runner.progress();
    progress.report(start, &format!("Step {step}/{STEP_COUNT}: {stage}..."));
    progress.info(&format!("[Step {step}/{STEP_COUNT}] {stage}..."));
}

fn complete(runner: &CommandRunner<'_>, state: &RunState) {
    if let Some(step) = state.stage.step() {
        let (_, end) = state.stage.percent_range();
        runner
            .progress()
            .report(end, &format!("Step {step}/{STEP_COUNT}: Complete"));
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("stage panicked")
}

/// Unmounts any scratch mount point a failed stage may have left mounted.
fn release_scratch_mounts(runner: &CommandRunner<'_>, config: &ProvisionConfig) {
    for mount_point in [&config.target_mount, &config.image_mount] {
        if runner.system().is_mounted(mount_point) {
            runner
                .progress()
                .info(&format!("Cleaning up {}...", mount_point.display()));
            copy::unmount_with_retry(
                runner,
                mount_point,
                config.unmount_attempts,
                config.unmount_backoff(),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_ranges_tile_the_whole_scale() {
        let stages = [
            Stage::Unmounting,
            Stage::Wiping,
            Stage::Partitioning,
            Stage::Formatting,
            Stage::Copying,
            Stage::InstallingBootloader,
            Stage::Finalizing,
        ];
        let mut expected_start = 0;
        for stage in stages {
            let (start, end) = stage.percent_range();
            assert_eq!(start, expected_start, "{stage} starts where the previous ended");
            assert!(end > start);
            expected_start = end;
        }
        assert_eq!(expected_start, 100);
    }
}
