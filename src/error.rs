// SPDX-License-Identifier: MIT OR Apache-2.0

//! Failure taxonomy for the boot measurement sequence.

use crate::measure::Artifact;
use core::fmt::{self, Display, Formatter};
use uefi::Status;

/// Failure of the boot measurement sequence.
///
/// Every variant is fatal to the current boot attempt: measurements are
/// never retried, skipped, or downgraded to warnings, because a missing
/// measurement would leave PCR 8 unverifiable while the boot "succeeds".
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MeasureError {
    /// The platform does not expose a TCG measurement protocol.
    InterfaceNotFound,

    /// The capability/status query itself failed.
    StatusQueryFailed(Status),

    /// The TPM reports itself deactivated; measuring into it is refused.
    TpmDeactivated,

    /// An artifact could not be read from the boot volume.
    ArtifactReadFailed {
        /// Artifact whose read failed.
        artifact: Artifact,
    },

    /// A record or artifact buffer could not be allocated.
    OutOfResources,

    /// The hash/extend/log call failed for an artifact.
    ExtendFailed {
        /// Artifact whose measurement failed.
        artifact: Artifact,
        /// Status reported by the firmware.
        status: Status,
    },

    /// The boot volume handle could not be closed cleanly.
    ResourceCloseFailed(Status),
}

impl MeasureError {
    /// Exit status reported to the hosting firmware for this failure.
    #[must_use]
    pub fn status(&self) -> Status {
        match self {
            Self::InterfaceNotFound => Status::NOT_FOUND,
            Self::StatusQueryFailed(_) => Status::PROTOCOL_ERROR,
            Self::TpmDeactivated => Status::SECURITY_VIOLATION,
            Self::ArtifactReadFailed { .. } => Status::LOAD_ERROR,
            Self::OutOfResources => Status::OUT_OF_RESOURCES,
            Self::ExtendFailed { .. } => Status::DEVICE_ERROR,
            Self::ResourceCloseFailed(_) => Status::VOLUME_CORRUPTED,
        }
    }
}

impl Display for MeasureError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::InterfaceNotFound => {
                write!(f, "no TCG measurement protocol installed")
            }
            Self::StatusQueryFailed(status) => {
                write!(f, "TCG status check failed: {status:?}")
            }
            Self::TpmDeactivated => {
                write!(f, "TPM device is deactivated, refusing to measure")
            }
            Self::ArtifactReadFailed { artifact } => {
                write!(f, "reading {} ({}) failed", artifact, artifact.path())
            }
            Self::OutOfResources => {
                write!(f, "out of resources while building a measurement record")
            }
            Self::ExtendFailed { artifact, status } => {
                write!(
                    f,
                    "hash/extend/log failed for {} ({}): {status:?}",
                    artifact,
                    artifact.path()
                )
            }
            Self::ResourceCloseFailed(status) => {
                write!(f, "closing the boot volume failed: {status:?}")
            }
        }
    }
}

impl core::error::Error for MeasureError {}
