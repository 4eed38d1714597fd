use crate::device::{Device, human_size};
use anyhow::{Context, Result, anyhow};
use std::fs;
use std::path::{Path, PathBuf};

/// Reads `/sys/block/<device>/<attr>`, trimmed.
fn read_sys_attr(device_name: &str, attr: &str) -> Option<String> {
    let path = PathBuf::from("/sys/block").join(device_name).join(attr);
    fs::read_to_string(path).ok().map(|s| s.trim().to_string())
}

/// Strips the partition suffix from a partition node, e.g. `/dev/sda2` ->
/// `/dev/sda` and `/dev/nvme0n1p3` -> `/dev/nvme0n1`.
fn parent_disk(path: &Path) -> PathBuf {
    let path_str = path.to_string_lossy();
    let base = path_str.trim_end_matches(|c: char| c.is_ascii_digit());

    let uses_p_infix = ["nvme", "mmcblk", "loop"]
        .iter()
        .any(|marker| path_str.contains(marker));
    if uses_p_infix {
        if let Some(disk) = base.strip_suffix('p') {
            return PathBuf::from(disk);
        }
        return path.to_path_buf();
    }

    PathBuf::from(base)
}

/// Lists the removable disks a bootable medium could be written to.
///
/// A disk qualifies when `/sys/block/<name>/removable` is `1`, it is not a
/// loop device, it reports a non-zero size, and it does not host the root
/// file system.
///
/// # Errors
///
/// Fails when the root file system's disk cannot be identified or
/// `/sys/block` cannot be read.
pub fn get_removable_devices() -> Result<Vec<Device>> {
    let disks = sysinfo::Disks::new_with_refreshed_list();
    let system_disk = disks
        .iter()
        .find(|disk| disk.mount_point() == Path::new("/"))
        .map(|disk| parent_disk(&PathBuf::from("/dev/").join(disk.name())))
        .ok_or_else(|| anyhow!("Could not determine system drive."))?;

    let mut devices = Vec::new();
    let block_dir = fs::read_dir("/sys/block").context("failed to read /sys/block")?;

    for entry in block_dir.filter_map(|e| e.ok()) {
        let name = entry.file_name().to_string_lossy().into_owned();
        let path = PathBuf::from("/dev/").join(&name);

        if name.starts_with("loop") || path == system_disk {
            continue;
        }

        if read_sys_attr(&name, "removable").as_deref() != Some("1") {
            continue;
        }

        // The kernel always counts in 512-byte sectors here.
        let sectors = read_sys_attr(&name, "size")
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(0);
        if sectors == 0 {
            continue;
        }

        let model = read_sys_attr(&name, "device/model")
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| "Unknown".to_string());

        let mount_point = disks
            .iter()
            .filter(|disk| {
                disk.name()
                    .to_string_lossy()
                    .trim_start_matches("/dev/")
                    .starts_with(&name)
            })
            .map(|disk| disk.mount_point().to_string_lossy().into_owned())
            .find(|mp| !mp.is_empty())
            .unwrap_or_default();

        devices.push(Device {
            path,
            name,
            size: human_size(sectors * 512),
            model,
            mount_point,
        });
    }

    devices.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(devices)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parent_disk_strips_partition_suffixes() {
        assert_eq!(parent_disk(Path::new("/dev/sda2")), PathBuf::from("/dev/sda"));
        assert_eq!(parent_disk(Path::new("/dev/nvme0n1p3")), PathBuf::from("/dev/nvme0n1"));
        assert_eq!(parent_disk(Path::new("/dev/mmcblk0p1")), PathBuf::from("/dev/mmcblk0"));
    }
}
