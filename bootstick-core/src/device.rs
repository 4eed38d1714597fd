use std::fmt;
use std::path::PathBuf;

/// A removable block device that can be turned into bootable media.
///
/// Produced by [`crate::platform::get_removable_devices`]. The pipeline itself
/// only ever uses [`Device::path`]; the rest is for showing the device to a
/// person before they agree to erase it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Device {
    /// The device node (e.g. `/dev/sdb`).
    pub path: PathBuf,
    /// The kernel name of the device (e.g. "sdb").
    pub name: String,
    /// Human-readable capacity (e.g. "14.9G").
    pub size: String,
    /// Vendor model string, or "Unknown".
    pub model: String,
    /// Where one of its partitions is mounted, if anywhere.
    pub mount_point: String,
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mount_info = if !self.mount_point.is_empty() {
            format!("[Mounted at {}]", self.mount_point)
        } else {
            "[Not mounted]".to_string()
        };

        write!(
            f,
            "{:<15} {:<24} {:>7} {}",
            self.path.display(),
            self.model,
            self.size,
            mount_info
        )
    }
}

/// Formats a byte count the way `lsblk` does: binary units, one decimal.
pub fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 6] = ["B", "K", "M", "G", "T", "P"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes}B")
    } else {
        format!("{value:.1}{}", UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_use_binary_units() {
        assert_eq!(human_size(512), "512B");
        assert_eq!(human_size(16_008_609_792), "14.9G");
        assert_eq!(human_size(1024 * 1024), "1.0M");
    }
}
