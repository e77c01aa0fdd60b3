// SPDX-License-Identifier: MIT OR Apache-2.0

//! Measured boot of the Linux boot chain into TPM PCR 8.
//!
//! Before control passes to the OS loader, this agent folds SHA-1 digests
//! of the boot configuration, kernel, and initrd into PCR 8 through the
//! firmware's [TCG] protocol (TPM family 1.1/1.2), appending one event-log
//! entry per measurement. A verifier that knows the artifacts and their
//! measurement order can recompute the expected PCR value and detect any
//! later tampering with those files.
//!
//! The sequence is fail-stop: a PCR extend is irreversible, so any failure
//! anywhere aborts the whole boot attempt rather than letting a partially
//! measured chain proceed.
//!
//! # Crate organisation
//!
//! - [`tcg`] holds the wire-level protocol binding: the capability block,
//!   algorithm and event-type tags, and the `EFI_TCG_PROTOCOL` function
//!   table with safe wrappers.
//! - [`event`] builds the `TCG_PCR_EVENT` records appended to the log.
//! - [`measure`] drives the measurement sequence over two boundary traits,
//!   one for the measurement interface and one for the boot volume, so the
//!   pipeline runs unchanged against a software TPM in unit tests.
//! - [`error`] is the failure taxonomy, each variant with its own exit
//!   status.
//!
//! [TCG]: https://trustedcomputinggroup.org/resource/tcg-efi-protocol-specification/

#![no_std]
#![warn(clippy::ptr_as_ptr, missing_docs, unused)]
#![deny(clippy::all)]

extern crate alloc;

#[cfg(test)]
extern crate std;

pub mod error;
pub mod event;
pub mod measure;
pub mod tcg;

pub use error::MeasureError;
pub use measure::{BootMeasurement, BootState};
