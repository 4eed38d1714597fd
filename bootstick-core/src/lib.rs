//! The core, UI-agnostic library for the `bootstick` utility.
//!
//! `bootstick-core` turns a removable drive into bootable installation media
//! from an ISO image. It is meant to sit behind any front end, whether it is
//! the `bootstick` command-line tool or a graphical application: every stage
//! reports through the [`progress::Reporter`] trait and the library never
//! prints anything itself.
//!
//! A run is a fixed sequence of destructive steps:
//! 1. unmount everything mounted from the device,
//! 2. wipe its signatures and write a fresh one-partition table ([`partition`]),
//! 3. format the partition,
//! 4. copy the image's file tree onto it ([`copy`]),
//! 5. install GRUB for legacy BIOS boot,
//! 6. sync.
//!
//! The [`pipeline`] module sequences these and enforces that only one run is
//! active at a time. All contact with the host goes through
//! [`system::System`], so the whole pipeline can be exercised against a
//! scripted fake.
//!
//! ## Example: Provisioning a Drive with Progress Reporting
//!
//! ```rust,no_run
//! use bootstick_core::config::ProvisionConfig;
//! use bootstick_core::pipeline::Provisioner;
//! use bootstick_core::progress::{Reporter, Severity};
//! use bootstick_core::request::{BootMode, FileSystem, ProvisionRequest};
//! use bootstick_core::system::HostSystem;
//! use std::sync::Arc;
//!
//! struct Print;
//!
//! impl Reporter for Print {
//!     fn report(&self, percent: u8, status: &str) {
//!         println!("{percent:>3}% {status}");
//!     }
//!     fn log(&self, message: &str, severity: Severity) {
//!         println!("[{severity}] {message}");
//!     }
//! }
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = ProvisionConfig::load(None)?;
//!     let system = HostSystem::with_privilege_command(config.privilege_command.clone());
//!     let provisioner = Provisioner::new(Arc::new(system), config);
//!
//!     let request = ProvisionRequest::builder("/isos/Win11_24H2.iso", "/dev/sdb")
//!         .boot_mode(BootMode::Uefi)
//!         .file_system(FileSystem::Fat32)
//!         .build()?;
//!
//!     let report = provisioner.start(request, Arc::new(Print))?.join();
//!     if !report.succeeded() {
//!         eprintln!("{:?}", report.outcome);
//!     }
//!     Ok(())
//! }
//! ```

mod bootloader;
mod command;
pub mod config;
pub mod copy;
pub mod device;
pub mod error;
mod format;
mod inspect;
pub mod partition;
pub mod pipeline;
pub mod platform;
pub mod progress;
pub mod request;
pub mod system;
pub mod tools;

pub use error::{ProvisionError, Result};
