//! Checks that the programs the pipeline shells out to are installed.
use crate::system::System;

/// Needed for every run.
pub const REQUIRED_TOOLS: [&str; 8] = [
    "lsblk", "parted", "partprobe", "wipefs", "mkfs.vfat", "rsync", "mount", "umount",
];

/// Optional tools, each given as alternatives: any one of them will do.
pub const OPTIONAL_TOOLS: [&[&str]; 3] = [
    &["mkfs.ntfs"],
    &["mkfs.exfat", "mkexfatfs"],
    &["grub-install", "grub2-install"],
];

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ToolReport {
    pub missing_required: Vec<String>,
    /// Each entry names the alternatives that were all missing, e.g. `mkfs.exfat/mkexfatfs`.
    pub missing_optional: Vec<String>,
}

impl ToolReport {
    pub fn is_ready(&self) -> bool {
        self.missing_required.is_empty()
    }

    /// Per-distribution package hints for whatever is missing.
    pub fn install_hints(&self) -> Vec<&'static str> {
        let mut hints = Vec::new();
        if !self.missing_required.is_empty() {
            hints.extend([
                "Ubuntu/Debian: sudo apt install parted dosfstools rsync util-linux",
                "Fedora: sudo dnf install parted dosfstools rsync util-linux",
                "Arch: sudo pacman -S parted dosfstools rsync util-linux",
            ]);
        }
        if !self.missing_optional.is_empty() {
            hints.extend([
                "Ubuntu/Debian: sudo apt install ntfs-3g exfatprogs grub-pc-bin",
                "Fedora: sudo dnf install ntfs-3g exfatprogs grub2-tools",
                "Arch: sudo pacman -S ntfs-3g exfatprogs grub",
            ]);
        }
        hints
    }
}

pub fn check_tools(system: &dyn System) -> ToolReport {
    let missing_required = REQUIRED_TOOLS
        .iter()
        .filter(|tool| !system.has_program(tool))
        .map(|tool| tool.to_string())
        .collect();

    let missing_optional = OPTIONAL_TOOLS
        .iter()
        .filter(|alternatives| !alternatives.iter().any(|tool| system.has_program(tool)))
        .map(|alternatives| alternatives.join("/"))
        .collect();

    ToolReport {
        missing_required,
        missing_optional,
    }
}
