//! Erasing the device and laying down a single-partition table.
//!
//! The partitioner walks a fixed sequence of steps:
//!
//! 1. **Wiping**: `wipefs --all` removes every file system and partition
//!    table signature.
//! 2. **Creating the table**: `parted` writes a GPT or MS-DOS label, one
//!    partition from 1 MiB to the end of the disk, and sets its boot flag.
//! 3. **Waiting for the kernel**: `partprobe` asks for a re-read of the table,
//!    then we sleep for the configured settle interval so udev can create
//!    the node.
//! 4. **Resolving the partition path** from the device name.
//! 5. **Verifying the partition**: the node is polled until it exists or the
//!    retry budget is spent. Only after this is the path trusted.
use crate::command::CommandRunner;
use crate::config::ProvisionConfig;
use crate::error::{ProvisionError, Result};
use crate::request::PartitionScheme;
use std::fmt;
use std::path::{Path, PathBuf};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PartitionStep {
    Wiping,
    CreatingTable,
    WaitingForKernel,
    ResolvingPartitionPath,
    VerifyingPartition,
}

impl fmt::Display for PartitionStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PartitionStep::Wiping => "wiping",
            PartitionStep::CreatingTable => "creating-table",
            PartitionStep::WaitingForKernel => "waiting-for-kernel",
            PartitionStep::ResolvingPartitionPath => "resolving-partition-path",
            PartitionStep::VerifyingPartition => "verifying-partition",
        })
    }
}

/// Returns the node name of partition `number` on `device`.
///
/// This is a naming heuristic, not a query: devices whose name contains
/// `nvme`, `mmcblk` or `loop` put a `p` between the disk name and the number
/// (`/dev/nvme0n1p1`), everything else appends the number directly
/// (`/dev/sdb1`). Multipath, RAID and other naming schemes are not covered.
/// Callers must confirm the node exists before using it.
pub fn partition_path(device: &Path, number: u32) -> PathBuf {
    let name = device
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let infix = if ["nvme", "mmcblk", "loop"].iter().any(|m| name.contains(m)) {
        "p"
    } else {
        ""
    };

    let mut path = device.as_os_str().to_owned();
    path.push(format!("{infix}{number}"));
    PathBuf::from(path)
}

pub(crate) struct Partitioner<'r, 'a> {
    runner: &'r CommandRunner<'a>,
    config: &'r ProvisionConfig,
    device: String,
}

impl<'r, 'a> Partitioner<'r, 'a> {
    pub(crate) fn new(
        runner: &'r CommandRunner<'a>,
        config: &'r ProvisionConfig,
        device: &Path,
    ) -> Self {
        Self {
            runner,
            config,
            device: device.to_string_lossy().into_owned(),
        }
    }

    fn enter(&self, step: PartitionStep) {
        tracing::debug!(device = %self.device, %step, "partitioner step");
    }

    pub(crate) fn wipe(&self) -> Result<()> {
        self.enter(PartitionStep::Wiping);
        self.runner.run(
            "wipefs",
            &["--all", &self.device],
            Some("Removing existing file system signatures..."),
        )?;
        Ok(())
    }

    /// Creates the partition table and its single partition, and returns the
    /// verified path of the new partition node.
    pub(crate) fn create_layout(&self, scheme: PartitionScheme) -> Result<PathBuf> {
        self.enter(PartitionStep::CreatingTable);
        self.parted(
            &["mklabel", scheme.parted_label()],
            &format!("Creating {scheme} partition table..."),
        )?;
        self.parted(
            &["mkpart", "primary", "fat32", "1MiB", "100%"],
            "Creating partition...",
        )?;
        self.parted(&["set", "1", "boot", "on"], "Setting boot flag...")?;

        self.enter(PartitionStep::WaitingForKernel);
        self.wait_for_kernel();

        self.enter(PartitionStep::ResolvingPartitionPath);
        let partition = partition_path(Path::new(&self.device), 1);

        self.enter(PartitionStep::VerifyingPartition);
        self.verify(&partition)?;
        Ok(partition)
    }

    fn parted(&self, args: &[&str], description: &str) -> Result<()> {
        let mut full = vec!["-s", self.device.as_str()];
        full.extend_from_slice(args);
        self.runner.run("parted", &full, Some(description))?;
        Ok(())
    }

    fn wait_for_kernel(&self) {
        let progress = self.runner.progress();
        progress.info("Waiting for partition to be recognized...");
        if let Err(e) = self.runner.run_tolerant("partprobe", &[&self.device], None) {
            progress.warn(&format!("partprobe reported a problem, continuing: {e}"));
        }
        self.runner.system().sleep(self.config.settle_interval());
    }

    fn verify(&self, partition: &Path) -> Result<()> {
        let system = self.runner.system();
        let attempts = self.config.verify_attempts;
        for attempt in 1..=attempts {
            if system.path_exists(partition) {
                tracing::debug!(
                    partition = %partition.display(),
                    attempt,
                    "partition node present"
                );
                self.runner
                    .progress()
                    .info(&format!("Partition {} is ready", partition.display()));
                return Ok(());
            }
            tracing::info!(
                partition = %partition.display(),
                attempt,
                attempts,
                "partition node missing"
            );
            if attempt < attempts {
                self.runner.progress().info(&format!(
                    "Waiting for {} to appear (attempt {attempt}/{attempts})...",
                    partition.display()
                ));
                system.sleep(self.config.verify_interval());
            }
        }

        Err(ProvisionError::DeviceState(format!(
            "Partition {} did not appear after {attempts} attempts; \
             manual intervention may be required",
            partition.display()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scsi_style_devices_get_a_bare_number() {
        assert_eq!(partition_path(Path::new("/dev/sdb"), 1), PathBuf::from("/dev/sdb1"));
        assert_eq!(partition_path(Path::new("/dev/vdc"), 2), PathBuf::from("/dev/vdc2"));
    }

    #[test]
    fn nvme_mmc_and_loop_devices_get_a_p_infix() {
        assert_eq!(
            partition_path(Path::new("/dev/nvme0n1"), 1),
            PathBuf::from("/dev/nvme0n1p1")
        );
        assert_eq!(
            partition_path(Path::new("/dev/mmcblk0"), 1),
            PathBuf::from("/dev/mmcblk0p1")
        );
        assert_eq!(partition_path(Path::new("/dev/loop7"), 1), PathBuf::from("/dev/loop7p1"));
    }
}
