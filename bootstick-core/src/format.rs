//! Creating the file system on the new partition.
use crate::command::CommandRunner;
use crate::error::{ProvisionError, Result};
use crate::request::FileSystem;
use crate::system::System;
use std::path::Path;

/// The two exFAT toolchains found in the wild.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ExFatTool {
    /// `exfatprogs`: `mkfs.exfat -L <label>`.
    ExfatProgs,
    /// The older FUSE-era `exfat-utils`: `mkexfatfs -n <label>`.
    ExfatUtils,
}

impl ExFatTool {
    /// Picks whichever exFAT formatter is installed.
    ///
    /// `exfat-utils` also ships a `mkfs.exfat` alias, so the presence of
    /// `mkexfatfs` is checked first.
    pub(crate) fn probe(system: &dyn System) -> Option<Self> {
        if system.has_program("mkexfatfs") {
            Some(ExFatTool::ExfatUtils)
        } else if system.has_program("mkfs.exfat") {
            Some(ExFatTool::ExfatProgs)
        } else {
            None
        }
    }

    fn program(self) -> &'static str {
        match self {
            ExFatTool::ExfatProgs => "mkfs.exfat",
            ExFatTool::ExfatUtils => "mkexfatfs",
        }
    }

    fn label_flag(self) -> &'static str {
        match self {
            ExFatTool::ExfatProgs => "-L",
            ExFatTool::ExfatUtils => "-n",
        }
    }
}

/// Formats `partition` as `fs` with `label`. Any failure is fatal.
pub(crate) fn format_partition(
    runner: &CommandRunner<'_>,
    partition: &Path,
    fs: FileSystem,
    label: &str,
) -> Result<()> {
    let partition = partition.to_string_lossy();
    let description = format!("Formatting {partition} as {fs}...");

    match fs {
        FileSystem::Fat32 => {
            runner.run(
                "mkfs.vfat",
                &["-F", "32", "-n", label, &partition],
                Some(&description),
            )?;
        }
        FileSystem::Ntfs => {
            // -f: quick format, skip zeroing and bad-sector scan.
            runner.run(
                "mkfs.ntfs",
                &["-f", "-L", label, &partition],
                Some(&description),
            )?;
        }
        FileSystem::ExFat => {
            let tool = ExFatTool::probe(runner.system()).ok_or_else(|| {
                ProvisionError::ToolInvocation {
                    program: "mkfs.exfat".to_string(),
                    code: None,
                    stderr: "no exFAT formatter found (install exfatprogs or exfat-utils)"
                        .to_string(),
                }
            })?;
            tracing::debug!(?tool, "selected exFAT formatter");
            runner.run(
                tool.program(),
                &[tool.label_flag(), label, &partition],
                Some(&description),
            )?;
        }
    }
    Ok(())
}
