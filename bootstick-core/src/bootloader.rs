//! GRUB installation for legacy BIOS media.
use crate::command::CommandRunner;
use crate::config::ProvisionConfig;
use crate::copy::MountGuard;
use crate::error::{ProvisionError, Result};
use crate::request::BootMode;
use std::path::Path;

/// Names GRUB's installer goes by, in order of preference.
const GRUB_INSTALLERS: [&str; 2] = ["grub-install", "grub2-install"];

/// Installs a BIOS boot loader when `mode` is [`BootMode::Legacy`].
///
/// UEFI images boot from their own `EFI/` tree once copied, so there is
/// nothing to do for them. A failed install is downgraded to a warning: most
/// hybrid ISOs still boot through their own loader.
pub(crate) fn install(
    runner: &CommandRunner<'_>,
    config: &ProvisionConfig,
    mode: BootMode,
    device: &Path,
    partition: &Path,
) {
    let progress = runner.progress();
    if mode != BootMode::Legacy {
        progress.info("UEFI mode - bootloader installation not required");
        return;
    }

    if let Err(e) = install_grub(runner, config, device, partition) {
        progress.warn(&format!(
            "GRUB installation failed, but the ISO may still be bootable: {e}"
        ));
    }
}

fn install_grub(
    runner: &CommandRunner<'_>,
    config: &ProvisionConfig,
    device: &Path,
    partition: &Path,
) -> Result<()> {
    let system = runner.system();
    let installer = GRUB_INSTALLERS
        .into_iter()
        .find(|p| system.has_program(p))
        .ok_or_else(|| ProvisionError::ToolInvocation {
            program: GRUB_INSTALLERS[0].to_string(),
            code: None,
            stderr: "no GRUB installer found".to_string(),
        })?;

    system.create_dir_all(&config.target_mount)?;
    let partition_arg = partition.to_string_lossy();
    let mount = MountGuard::mount(
        runner,
        config,
        &[&partition_arg],
        &config.target_mount,
        "Mounting USB partition...",
    )?;

    let boot_dir = format!("--boot-directory={}", mount.path().join("boot").display());
    let device_arg = device.to_string_lossy();
    runner.run_tolerant(
        installer,
        &["--target=i386-pc", &boot_dir, &device_arg],
        Some("Installing GRUB bootloader..."),
    )?;
    Ok(())
}
