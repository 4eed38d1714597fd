//! Discovery of candidate target devices.
//!
//! This sits outside the provisioning pipeline: it only produces the list a
//! front end lets the user choose from. Provisioning itself relies on the
//! external tools of a Linux system, so discovery is Linux-only as well.

#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "linux")]
pub use self::linux::*;

#[cfg(not(target_os = "linux"))]
pub fn get_removable_devices() -> anyhow::Result<Vec<crate::device::Device>> {
    Err(anyhow::anyhow!("Device discovery is only supported on Linux."))
}
