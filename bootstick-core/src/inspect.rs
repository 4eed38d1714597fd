//! Finds and releases whatever is mounted from the target device.
use crate::command::CommandRunner;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Partition (or whole-disk) node mapped to where it is mounted.
pub type MountMap = BTreeMap<PathBuf, PathBuf>;

#[derive(Debug, Deserialize)]
struct LsblkOutput {
    #[serde(default)]
    blockdevices: Vec<LsblkNode>,
}

#[derive(Debug, Deserialize)]
struct LsblkNode {
    name: String,
    #[serde(default)]
    mountpoint: Option<String>,
    #[serde(default)]
    children: Vec<LsblkNode>,
}

/// Parses `lsblk -J -p -o NAME,MOUNTPOINT` output into a [`MountMap`].
pub(crate) fn parse_lsblk_mounts(json: &str) -> serde_json::Result<MountMap> {
    let output: LsblkOutput = serde_json::from_str(json)?;
    let mut mounts = MountMap::new();
    for node in &output.blockdevices {
        collect_mounts(node, &mut mounts);
    }
    Ok(mounts)
}

fn collect_mounts(node: &LsblkNode, mounts: &mut MountMap) {
    if let Some(mp) = node.mountpoint.as_deref().filter(|m| !m.is_empty()) {
        mounts.insert(device_node(&node.name), PathBuf::from(mp));
    }
    for child in &node.children {
        collect_mounts(child, mounts);
    }
}

fn device_node(name: &str) -> PathBuf {
    if name.starts_with('/') {
        PathBuf::from(name)
    } else {
        Path::new("/dev").join(name)
    }
}

/// Lists everything currently mounted from `device`.
///
/// Never fails: if `lsblk` cannot be run or its output is unreadable, the
/// problem is logged and an empty map is returned, since the wipe that follows
/// supersedes any mount we failed to see.
pub(crate) fn mounted_partitions(runner: &CommandRunner<'_>, device: &Path) -> MountMap {
    let device = device.to_string_lossy();
    let args = ["-J", "-p", "-o", "NAME,MOUNTPOINT", &*device];
    let json = match runner.run_tolerant("lsblk", &args, None) {
        Ok(json) => json,
        Err(e) => {
            runner
                .progress()
                .warn(&format!("Could not inspect mounts of {device}: {e}"));
            return MountMap::new();
        }
    };

    parse_lsblk_mounts(&json).unwrap_or_else(|e| {
        runner
            .progress()
            .warn(&format!("Could not parse device information: {e}"));
        MountMap::new()
    })
}

/// Unmounts every mount of `device`. Failures are warnings only.
pub(crate) fn unmount_device(runner: &CommandRunner<'_>, device: &Path) {
    let mounts = mounted_partitions(runner, device);
    if mounts.is_empty() {
        runner.progress().info("No mounted partitions found");
        return;
    }

    for (partition, mount_point) in &mounts {
        let partition = partition.to_string_lossy();
        let description = format!("Unmounting {partition} from {}...", mount_point.display());
        if let Err(e) = runner.run_tolerant("umount", &[&partition], Some(&description)) {
            runner
                .progress()
                .warn(&format!("Could not unmount {partition}, continuing: {e}"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collects_mounted_children_only() {
        let json = r#"{
           "blockdevices": [
              {"name": "/dev/sdb", "mountpoint": null,
                 "children": [
                    {"name": "/dev/sdb1", "mountpoint": "/media/user/CCCOMA_X64"},
                    {"name": "/dev/sdb2", "mountpoint": null}
                 ]
              }
           ]
        }"#;
        let mounts = parse_lsblk_mounts(json).unwrap();
        assert_eq!(mounts.len(), 1);
        assert_eq!(
            mounts.get(Path::new("/dev/sdb1")),
            Some(&PathBuf::from("/media/user/CCCOMA_X64"))
        );
    }

    #[test]
    fn whole_disk_mounts_and_bare_names_are_handled() {
        let json = r#"{"blockdevices": [{"name": "sdc", "mountpoint": "/mnt/floppy"}]}"#;
        let mounts = parse_lsblk_mounts(json).unwrap();
        assert_eq!(
            mounts.get(Path::new("/dev/sdc")),
            Some(&PathBuf::from("/mnt/floppy"))
        );
    }

    #[test]
    fn garbage_is_an_error() {
        assert!(parse_lsblk_mounts("lsblk: /dev/sdz: not a block device").is_err());
    }
}
