//! What to provision, and the rules tying its options together.
use crate::error::{ProvisionError, Result};
use crate::system::System;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Longest label every supported file system accepts.
pub const MAX_LABEL_LEN: usize = 11;

/// Used when nothing usable can be derived from the image name.
pub const DEFAULT_LABEL: &str = "BOOTABLE";

/// Characters FAT refuses in a volume label.
const FORBIDDEN_LABEL_CHARS: &str = "\"*+,./:;<=>?[\\]|";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum BootMode {
    #[default]
    Uefi,
    Legacy,
}

impl BootMode {
    /// The only partition scheme each boot mode is provisioned with.
    pub fn partition_scheme(self) -> PartitionScheme {
        match self {
            BootMode::Uefi => PartitionScheme::Gpt,
            BootMode::Legacy => PartitionScheme::Mbr,
        }
    }
}

impl fmt::Display for BootMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BootMode::Uefi => "UEFI",
            BootMode::Legacy => "Legacy BIOS",
        })
    }
}

impl FromStr for BootMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "uefi" | "efi" => Ok(BootMode::Uefi),
            "legacy" | "bios" => Ok(BootMode::Legacy),
            other => Err(format!("unknown boot mode '{other}' (expected uefi or legacy)")),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PartitionScheme {
    Gpt,
    Mbr,
}

impl PartitionScheme {
    /// Label name understood by `parted mklabel`.
    pub fn parted_label(self) -> &'static str {
        match self {
            PartitionScheme::Gpt => "gpt",
            PartitionScheme::Mbr => "msdos",
        }
    }
}

impl fmt::Display for PartitionScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PartitionScheme::Gpt => "GPT",
            PartitionScheme::Mbr => "MBR",
        })
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum FileSystem {
    #[default]
    Fat32,
    Ntfs,
    ExFat,
}

impl fmt::Display for FileSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FileSystem::Fat32 => "FAT32",
            FileSystem::Ntfs => "NTFS",
            FileSystem::ExFat => "exFAT",
        })
    }
}

impl FromStr for FileSystem {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fat32" | "vfat" => Ok(FileSystem::Fat32),
            "ntfs" => Ok(FileSystem::Ntfs),
            "exfat" => Ok(FileSystem::ExFat),
            other => Err(format!(
                "unknown file system '{other}' (expected fat32, ntfs or exfat)"
            )),
        }
    }
}

/// A fully-checked description of one provisioning run.
///
/// The partition scheme is always derived from the boot mode; there is no
/// way to construct a request where the two disagree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProvisionRequest {
    image: PathBuf,
    device: PathBuf,
    boot_mode: BootMode,
    scheme: PartitionScheme,
    file_system: FileSystem,
    label: String,
}

impl ProvisionRequest {
    pub fn builder(image: impl Into<PathBuf>, device: impl Into<PathBuf>) -> RequestBuilder {
        RequestBuilder {
            image: image.into(),
            device: device.into(),
            boot_mode: BootMode::default(),
            scheme: None,
            file_system: FileSystem::default(),
            label: None,
        }
    }

    pub fn image(&self) -> &Path {
        &self.image
    }

    pub fn device(&self) -> &Path {
        &self.device
    }

    pub fn boot_mode(&self) -> BootMode {
        self.boot_mode
    }

    pub fn scheme(&self) -> PartitionScheme {
        self.scheme
    }

    pub fn file_system(&self) -> FileSystem {
        self.file_system
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Checks the request against the machine: the image must exist and the
    /// device node must resolve. Nothing is modified.
    pub fn validate(&self, system: &dyn System) -> Result<()> {
        if !system.path_exists(&self.image) {
            return Err(ProvisionError::validation(format!(
                "image {} does not exist",
                self.image.display()
            )));
        }
        if !system.path_exists(&self.device) {
            return Err(ProvisionError::validation(format!(
                "device {} does not exist",
                self.device.display()
            )));
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct RequestBuilder {
    image: PathBuf,
    device: PathBuf,
    boot_mode: BootMode,
    scheme: Option<PartitionScheme>,
    file_system: FileSystem,
    label: Option<String>,
}

impl RequestBuilder {
    pub fn boot_mode(mut self, boot_mode: BootMode) -> Self {
        self.boot_mode = boot_mode;
        self
    }

    /// Accepted for front ends that expose a scheme selector, but the boot
    /// mode always wins.
    pub fn scheme(mut self, scheme: PartitionScheme) -> Self {
        self.scheme = Some(scheme);
        self
    }

    pub fn file_system(mut self, file_system: FileSystem) -> Self {
        self.file_system = file_system;
        self
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn build(self) -> Result<ProvisionRequest> {
        if self.image.as_os_str().is_empty() {
            return Err(ProvisionError::validation("no image selected"));
        }
        if self.device.as_os_str().is_empty() {
            return Err(ProvisionError::validation("no target device selected"));
        }

        let scheme = self.boot_mode.partition_scheme();
        if let Some(requested) = self.scheme.filter(|s| *s != scheme) {
            tracing::warn!(
                %requested,
                boot_mode = %self.boot_mode,
                "ignoring partition scheme, {} boot requires {}",
                self.boot_mode,
                scheme
            );
        }

        let label = match self.label {
            Some(label) => {
                check_label(&label)?;
                label
            }
            None => derive_label(&self.image),
        };

        Ok(ProvisionRequest {
            image: self.image,
            device: self.device,
            boot_mode: self.boot_mode,
            scheme,
            file_system: self.file_system,
            label,
        })
    }
}

/// Derives a volume label from the image file name: ASCII letters and digits
/// are upper-cased, everything else becomes `_`, and the result is cut to
/// [`MAX_LABEL_LEN`] characters.
pub fn derive_label(image: &Path) -> String {
    let stem = image
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    let label: String = stem
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .take(MAX_LABEL_LEN)
        .collect();

    if label.is_empty() {
        DEFAULT_LABEL.to_string()
    } else {
        label
    }
}

fn check_label(label: &str) -> Result<()> {
    if label.is_empty() {
        return Err(ProvisionError::validation("volume label is empty"));
    }
    if label.chars().count() > MAX_LABEL_LEN {
        return Err(ProvisionError::validation(format!(
            "volume label '{label}' is longer than {MAX_LABEL_LEN} characters"
        )));
    }
    if let Some(bad) = label
        .chars()
        .find(|c| !c.is_ascii() || c.is_ascii_control() || FORBIDDEN_LABEL_CHARS.contains(*c))
    {
        return Err(ProvisionError::validation(format!(
            "volume label '{label}' contains unsupported character '{bad}'"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_is_folded_uppercased_and_truncated() {
        assert_eq!(derive_label(Path::new("/isos/My Windows 11.iso")), "MY_WINDOWS_");
        assert_eq!(derive_label(Path::new("ubuntu-24.04.iso")), "UBUNTU_24_0");
        assert_eq!(derive_label(Path::new("arch.iso")), "ARCH");
        assert_eq!(derive_label(Path::new("/")), DEFAULT_LABEL);
    }

    #[test]
    fn boot_mode_dictates_the_scheme() {
        let uefi = ProvisionRequest::builder("a.iso", "/dev/sdb")
            .boot_mode(BootMode::Uefi)
            .scheme(PartitionScheme::Mbr)
            .build()
            .unwrap();
        assert_eq!(uefi.scheme(), PartitionScheme::Gpt);

        let legacy = ProvisionRequest::builder("a.iso", "/dev/sdb")
            .boot_mode(BootMode::Legacy)
            .scheme(PartitionScheme::Gpt)
            .build()
            .unwrap();
        assert_eq!(legacy.scheme(), PartitionScheme::Mbr);
    }

    #[test]
    fn explicit_labels_are_checked() {
        let build = |label: &str| {
            ProvisionRequest::builder("a.iso", "/dev/sdb")
                .label(label)
                .build()
        };
        assert_eq!(build("WIN11").unwrap().label(), "WIN11");
        assert!(matches!(build("TWELVE_CHARS"), Err(ProvisionError::Validation(_))));
        assert!(matches!(build("A/B"), Err(ProvisionError::Validation(_))));
        assert!(matches!(build(""), Err(ProvisionError::Validation(_))));
    }

    #[test]
    fn empty_device_is_rejected() {
        assert!(matches!(
            ProvisionRequest::builder("a.iso", "").build(),
            Err(ProvisionError::Validation(_))
        ));
    }

    #[test]
    fn options_parse_case_insensitively() {
        assert_eq!("UEFI".parse::<BootMode>().unwrap(), BootMode::Uefi);
        assert_eq!("bios".parse::<BootMode>().unwrap(), BootMode::Legacy);
        assert_eq!("exFAT".parse::<FileSystem>().unwrap(), FileSystem::ExFat);
        assert!("ext4".parse::<FileSystem>().is_err());
    }
}
