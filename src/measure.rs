// SPDX-License-Identifier: MIT OR Apache-2.0

//! The measurement pipeline: capability negotiation, the fixed artifact
//! table, and the boot sequence orchestrator.
//!
//! The pipeline runs over two boundary traits, [`MeasurementInterface`]
//! and [`ArtifactSource`], so the same code drives the real TCG protocol
//! on firmware and a software TPM in unit tests.

use crate::error::MeasureError;
use crate::event::PcrEvent;
use crate::tcg::{AlgorithmId, EventType, ExtendOutcome, InterfaceStatus, PcrIndex};
use alloc::vec::Vec;
use core::fmt::{self, Display, Formatter};
use log::info;
use uefi::fs::FileSystem;
use uefi::{CStr16, cstr16};

/// PCR into which every boot artifact is measured.
///
/// A single register receives the config, kernel, and initrd digests, so
/// its final value is an order-dependent composite of all three; a
/// verifier must fold the digests in exactly the order of
/// [`Artifact::MEASURE_ORDER`] to recompute it.
pub const BOOT_MEASUREMENT_PCR: PcrIndex = PcrIndex(8);

/// Event type applied to every measured artifact.
pub const BOOT_MEASUREMENT_EVENT: EventType = EventType::EFI_PLATFORM_FIRMWARE_BLOB;

/// The boot artifacts this agent measures.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Artifact {
    /// Boot loader configuration. Its bytes are embedded in the log
    /// entry so the log stays auditable by humans and tools.
    BootConfig,
    /// Kernel image.
    Kernel,
    /// Initial ramdisk image.
    Initrd,
}

impl Artifact {
    /// Fixed measurement order. Changing it changes the composite PCR
    /// value and breaks every existing verifier.
    pub const MEASURE_ORDER: [Self; 3] = [Self::BootConfig, Self::Kernel, Self::Initrd];

    /// Absolute path of the artifact on the boot volume.
    #[must_use]
    pub fn path(self) -> &'static CStr16 {
        match self {
            Self::BootConfig => cstr16!(r"\EFI\linux\grub.cfg"),
            Self::Kernel => cstr16!(r"\EFI\linux\vmlinuz"),
            Self::Initrd => cstr16!(r"\EFI\linux\initrd"),
        }
    }

    /// Whether the artifact bytes are embedded in the log entry. Only
    /// the configuration is small enough to be worth carrying in the
    /// log.
    #[must_use]
    pub fn embed_event_data(self) -> bool {
        matches!(self, Self::BootConfig)
    }
}

impl Display for Artifact {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::BootConfig => "boot configuration",
            Self::Kernel => "kernel image",
            Self::Initrd => "initrd image",
        })
    }
}

/// Firmware measurement service: one capability query plus the combined
/// hash/extend/log primitive.
///
/// [`Tcg`] implements this over the real protocol; tests substitute a
/// software TPM.
///
/// [`Tcg`]: crate::tcg::Tcg
pub trait MeasurementInterface {
    /// Query the capability block, feature flags, and event-log bounds.
    fn status_check(&mut self) -> uefi::Result<InterfaceStatus>;

    /// Hash `data` with `algorithm`, extend the digest into the PCR
    /// named by `event`, and append `event` to the log. The three steps
    /// are one atomic call: no artifact is ever hashed but not logged,
    /// or logged but not extended.
    fn hash_log_extend(
        &mut self,
        data: &[u8],
        algorithm: AlgorithmId,
        event: &PcrEvent,
    ) -> uefi::Result<ExtendOutcome>;
}

/// Read access to the volume holding the boot artifacts.
///
/// A read must return the complete artifact before measurement starts:
/// the extend primitive hashes a byte range, not a stream, so partial
/// reads cannot be measured.
pub trait ArtifactSource {
    /// Read the full contents of `artifact` from its fixed path.
    fn read(&mut self, artifact: Artifact) -> Result<Vec<u8>, MeasureError>;

    /// Release the underlying volume handle. Called once, after the last
    /// measurement; an unclean close fails the whole sequence.
    fn close(&mut self) -> Result<(), MeasureError>;
}

/// [`ArtifactSource`] over the volume the agent's image was loaded from.
pub struct BootVolume {
    fs: Option<FileSystem>,
}

impl BootVolume {
    /// Wrap an open boot-volume file system.
    #[must_use]
    pub fn new(fs: FileSystem) -> Self {
        Self { fs: Some(fs) }
    }
}

impl ArtifactSource for BootVolume {
    fn read(&mut self, artifact: Artifact) -> Result<Vec<u8>, MeasureError> {
        let Some(fs) = self.fs.as_mut() else {
            return Err(MeasureError::ArtifactReadFailed { artifact });
        };

        fs.read(artifact.path()).map_err(|err| {
            log::error!("reading {} failed: {err:?}", artifact.path());
            MeasureError::ArtifactReadFailed { artifact }
        })
    }

    fn close(&mut self) -> Result<(), MeasureError> {
        // Dropping the wrapped protocol closes the volume; the close
        // itself cannot report failure.
        self.fs = None;
        Ok(())
    }
}

/// Validate the measurement interface before any extend is attempted.
///
/// Fails closed on a deactivated TPM: extending into a deactivated
/// device would present verifiers with PCRs that never held real
/// measurements.
pub fn negotiate<I: MeasurementInterface>(
    interface: &mut I,
) -> Result<InterfaceStatus, MeasureError> {
    let status = interface
        .status_check()
        .map_err(|err| MeasureError::StatusQueryFailed(err.status()))?;

    let capability = &status.capability;
    if capability.tpm_deactivated() {
        return Err(MeasureError::TpmDeactivated);
    }

    info!(
        "TCG interface: spec {}.{}, structure {}.{}, algorithms {:?}, TPM present: {}",
        capability.protocol_spec_version().major,
        capability.protocol_spec_version().minor,
        capability.structure_version().major,
        capability.structure_version().minor,
        capability.hash_algorithm(),
        capability.tpm_present(),
    );

    Ok(status)
}

/// States of the boot measurement sequence.
///
/// [`Done`] is the only state in which handing control to the OS loader
/// is permitted. [`Failed`] absorbs every error: an extend cannot be
/// undone, so a failed stage cannot be retried in isolation and the
/// whole boot attempt is abandoned instead.
///
/// [`Done`]: BootState::Done
/// [`Failed`]: BootState::Failed
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BootState {
    /// Nothing has run yet.
    Start,
    /// The interface was negotiated and the TPM is active.
    CapabilityChecked,
    /// The boot configuration was measured, with its bytes in the log.
    ConfigMeasured,
    /// The kernel image was measured.
    KernelMeasured,
    /// The initrd image was measured.
    InitrdMeasured,
    /// All measurements landed and the volume closed cleanly.
    Done,
    /// A stage failed; the boot attempt must be abandoned.
    Failed,
}

/// Drives the fixed measurement sequence over a measurement interface
/// and an artifact source.
pub struct BootMeasurement<'a, I: MeasurementInterface, S: ArtifactSource> {
    interface: &'a mut I,
    source: &'a mut S,
    state: BootState,
}

impl<'a, I: MeasurementInterface, S: ArtifactSource> BootMeasurement<'a, I, S> {
    /// Set up a sequence; nothing is measured until [`run`] is called.
    ///
    /// [`run`]: Self::run
    pub fn new(interface: &'a mut I, source: &'a mut S) -> Self {
        Self {
            interface,
            source,
            state: BootState::Start,
        }
    }

    /// Current state of the sequence.
    #[must_use]
    pub fn state(&self) -> BootState {
        self.state
    }

    /// Run the sequence to completion or first failure.
    ///
    /// # Errors
    ///
    /// Returns the first stage failure; the sequence stops there and the
    /// state becomes [`BootState::Failed`].
    pub fn run(&mut self) -> Result<(), MeasureError> {
        let result = self.run_to_done();
        if result.is_err() {
            self.state = BootState::Failed;
        }
        result
    }

    fn run_to_done(&mut self) -> Result<(), MeasureError> {
        negotiate(&mut *self.interface)?;
        self.state = BootState::CapabilityChecked;

        for artifact in Artifact::MEASURE_ORDER {
            self.measure(artifact)?;
            self.state = match artifact {
                Artifact::BootConfig => BootState::ConfigMeasured,
                Artifact::Kernel => BootState::KernelMeasured,
                Artifact::Initrd => BootState::InitrdMeasured,
            };
        }

        self.source.close()?;
        self.state = BootState::Done;
        Ok(())
    }

    fn measure(&mut self, artifact: Artifact) -> Result<(), MeasureError> {
        let bytes = self.source.read(artifact)?;
        info!("{}: {} bytes read from {}", artifact, bytes.len(), artifact.path());

        let event = if artifact.embed_event_data() {
            PcrEvent::new(BOOT_MEASUREMENT_PCR, BOOT_MEASUREMENT_EVENT, &bytes)
                .map_err(|_| MeasureError::OutOfResources)?
        } else {
            PcrEvent::without_data(BOOT_MEASUREMENT_PCR, BOOT_MEASUREMENT_EVENT)
        };

        let outcome = self
            .interface
            .hash_log_extend(&bytes, AlgorithmId::SHA1, &event)
            .map_err(|err| MeasureError::ExtendFailed {
                artifact,
                status: err.status(),
            })?;

        info!(
            "{}: measured into PCR {} as event {}",
            artifact, BOOT_MEASUREMENT_PCR.0, outcome.event_number
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tcg::{BootServiceCapability, Sha1Digest};
    use alloc::vec;
    use alloc::vec::Vec;
    use sha1::{Digest, Sha1};
    use uefi::Status;

    fn sha1(data: &[u8]) -> Sha1Digest {
        Sha1::digest(data).into()
    }

    fn fold(pcr: &Sha1Digest, digest: &Sha1Digest) -> Sha1Digest {
        let mut hasher = Sha1::new();
        hasher.update(pcr);
        hasher.update(digest);
        hasher.finalize().into()
    }

    struct LoggedEvent {
        pcr_index: PcrIndex,
        event_type: EventType,
        event_data: Vec<u8>,
    }

    /// Software TPM: real SHA-1 extends into PCR 8 plus an append-only
    /// log, with injectable failures.
    #[derive(Default)]
    struct SimTpm {
        deactivated: bool,
        status_error: Option<Status>,
        extend_error: Option<Status>,
        pcr8: Sha1Digest,
        log: Vec<LoggedEvent>,
        extend_calls: u32,
    }

    impl MeasurementInterface for SimTpm {
        fn status_check(&mut self) -> uefi::Result<InterfaceStatus> {
            if let Some(status) = self.status_error {
                return Err(status.into());
            }
            Ok(InterfaceStatus {
                capability: BootServiceCapability::simulated(self.deactivated),
                feature_flags: 0,
                event_log_location: 0,
                event_log_last_entry: 0,
            })
        }

        fn hash_log_extend(
            &mut self,
            data: &[u8],
            algorithm: AlgorithmId,
            event: &PcrEvent,
        ) -> uefi::Result<ExtendOutcome> {
            self.extend_calls += 1;
            if let Some(status) = self.extend_error {
                return Err(status.into());
            }
            assert_eq!(algorithm, AlgorithmId::SHA1);

            self.pcr8 = fold(&self.pcr8, &sha1(data));
            self.log.push(LoggedEvent {
                pcr_index: event.pcr_index(),
                event_type: event.event_type(),
                event_data: event.event_data().to_vec(),
            });
            Ok(ExtendOutcome {
                event_number: self.log.len() as u32,
                event_log_last_entry: 0,
            })
        }
    }

    /// In-memory boot volume with a read recorder and injectable
    /// failures.
    #[derive(Default)]
    struct MemorySource {
        files: Vec<(Artifact, Vec<u8>)>,
        fail_read: Option<Artifact>,
        fail_close: bool,
        reads: Vec<Artifact>,
        closed: bool,
    }

    impl MemorySource {
        fn with_all(config: &[u8], kernel: &[u8], initrd: &[u8]) -> Self {
            Self {
                files: vec![
                    (Artifact::BootConfig, config.to_vec()),
                    (Artifact::Kernel, kernel.to_vec()),
                    (Artifact::Initrd, initrd.to_vec()),
                ],
                ..Self::default()
            }
        }
    }

    impl ArtifactSource for MemorySource {
        fn read(&mut self, artifact: Artifact) -> Result<Vec<u8>, MeasureError> {
            self.reads.push(artifact);
            if self.fail_read == Some(artifact) {
                return Err(MeasureError::ArtifactReadFailed { artifact });
            }
            self.files
                .iter()
                .find(|(candidate, _)| *candidate == artifact)
                .map(|(_, bytes)| bytes.clone())
                .ok_or(MeasureError::ArtifactReadFailed { artifact })
        }

        fn close(&mut self) -> Result<(), MeasureError> {
            self.closed = true;
            if self.fail_close {
                return Err(MeasureError::ResourceCloseFailed(Status::DEVICE_ERROR));
            }
            Ok(())
        }
    }

    const CONFIG: &[u8] = b"timeout=5\nlinux /EFI/linux/vmlinuz\ninitrd /EFI/linux/initrd\n";
    const KERNEL: &[u8] = &[0x4d, 0x5a, 0x2e, 0x00, 0x52, 0x55, 0x53, 0x54];
    const INITRD: &[u8] = &[0x1f, 0x8b, 0x08, 0x00, 0x01, 0x02, 0x03, 0x04];

    #[test]
    fn full_run_measures_all_artifacts_in_order() {
        let mut tpm = SimTpm::default();
        let mut source = MemorySource::with_all(CONFIG, KERNEL, INITRD);

        let mut boot = BootMeasurement::new(&mut tpm, &mut source);
        boot.run().unwrap();
        assert_eq!(boot.state(), BootState::Done);

        assert_eq!(tpm.extend_calls, 3);
        assert!(source.closed);
        assert_eq!(
            source.reads,
            [Artifact::BootConfig, Artifact::Kernel, Artifact::Initrd]
        );

        // Every record targets PCR 8 with the platform-firmware-blob tag.
        for entry in &tpm.log {
            assert_eq!(entry.pcr_index, BOOT_MEASUREMENT_PCR);
            assert_eq!(entry.event_type, EventType::EFI_PLATFORM_FIRMWARE_BLOB);
        }

        // Only the configuration is carried in the log.
        assert_eq!(tpm.log[0].event_data, CONFIG);
        assert!(tpm.log[1].event_data.is_empty());
        assert!(tpm.log[2].event_data.is_empty());

        // A verifier folding the three digests in order recomputes PCR 8.
        let mut expected = [0u8; 20];
        for data in [CONFIG, KERNEL, INITRD] {
            expected = fold(&expected, &sha1(data));
        }
        assert_eq!(tpm.pcr8, expected);
    }

    #[test]
    fn extending_twice_is_not_idempotent() {
        let event = PcrEvent::without_data(BOOT_MEASUREMENT_PCR, BOOT_MEASUREMENT_EVENT);

        let mut once = SimTpm::default();
        once.hash_log_extend(KERNEL, AlgorithmId::SHA1, &event)
            .unwrap();

        let mut twice = SimTpm::default();
        twice
            .hash_log_extend(KERNEL, AlgorithmId::SHA1, &event)
            .unwrap();
        twice
            .hash_log_extend(KERNEL, AlgorithmId::SHA1, &event)
            .unwrap();

        // Extend is composition, not assignment: re-measuring moves the
        // PCR again, which is why no stage is ever retried.
        assert_ne!(once.pcr8, [0u8; 20]);
        assert_ne!(once.pcr8, twice.pcr8);
    }

    #[test]
    fn deactivated_tpm_fails_closed_before_any_read() {
        let mut tpm = SimTpm {
            deactivated: true,
            ..SimTpm::default()
        };
        let mut source = MemorySource::with_all(CONFIG, KERNEL, INITRD);

        let mut boot = BootMeasurement::new(&mut tpm, &mut source);
        assert_eq!(boot.run(), Err(MeasureError::TpmDeactivated));
        assert_eq!(boot.state(), BootState::Failed);

        assert_eq!(tpm.extend_calls, 0);
        assert!(source.reads.is_empty());
        assert!(!source.closed);
    }

    #[test]
    fn status_query_failure_fails_closed() {
        let mut tpm = SimTpm {
            status_error: Some(Status::DEVICE_ERROR),
            ..SimTpm::default()
        };
        let mut source = MemorySource::with_all(CONFIG, KERNEL, INITRD);

        let mut boot = BootMeasurement::new(&mut tpm, &mut source);
        assert_eq!(
            boot.run(),
            Err(MeasureError::StatusQueryFailed(Status::DEVICE_ERROR))
        );
        assert_eq!(tpm.extend_calls, 0);
    }

    #[test]
    fn kernel_read_failure_stops_before_initrd() {
        let mut tpm = SimTpm::default();
        let mut source = MemorySource {
            fail_read: Some(Artifact::Kernel),
            ..MemorySource::with_all(CONFIG, KERNEL, INITRD)
        };

        let mut boot = BootMeasurement::new(&mut tpm, &mut source);
        assert_eq!(
            boot.run(),
            Err(MeasureError::ArtifactReadFailed {
                artifact: Artifact::Kernel
            })
        );
        assert_eq!(boot.state(), BootState::Failed);

        // Config made it in; the initrd was never touched.
        assert_eq!(tpm.extend_calls, 1);
        assert_eq!(source.reads, [Artifact::BootConfig, Artifact::Kernel]);
    }

    #[test]
    fn initrd_read_failure_leaves_two_measurements() {
        let mut tpm = SimTpm::default();
        let mut source = MemorySource {
            fail_read: Some(Artifact::Initrd),
            ..MemorySource::with_all(CONFIG, KERNEL, INITRD)
        };

        let mut boot = BootMeasurement::new(&mut tpm, &mut source);
        let err = boot.run().unwrap_err();
        assert_eq!(
            err,
            MeasureError::ArtifactReadFailed {
                artifact: Artifact::Initrd
            }
        );
        assert_eq!(boot.state(), BootState::Failed);
        assert_eq!(tpm.extend_calls, 2);
    }

    #[test]
    fn extend_failure_aborts_the_sequence() {
        let mut tpm = SimTpm {
            extend_error: Some(Status::DEVICE_ERROR),
            ..SimTpm::default()
        };
        let mut source = MemorySource::with_all(CONFIG, KERNEL, INITRD);

        let mut boot = BootMeasurement::new(&mut tpm, &mut source);
        assert_eq!(
            boot.run(),
            Err(MeasureError::ExtendFailed {
                artifact: Artifact::BootConfig,
                status: Status::DEVICE_ERROR,
            })
        );
        assert_eq!(boot.state(), BootState::Failed);
        assert_eq!(source.reads, [Artifact::BootConfig]);
    }

    #[test]
    fn unclean_close_fails_the_sequence() {
        let mut tpm = SimTpm::default();
        let mut source = MemorySource {
            fail_close: true,
            ..MemorySource::with_all(CONFIG, KERNEL, INITRD)
        };

        let mut boot = BootMeasurement::new(&mut tpm, &mut source);
        assert_eq!(
            boot.run(),
            Err(MeasureError::ResourceCloseFailed(Status::DEVICE_ERROR))
        );
        assert_eq!(boot.state(), BootState::Failed);

        // All three measurements landed; only the close was unclean.
        assert_eq!(tpm.extend_calls, 3);
    }

    #[test]
    fn negotiate_accepts_an_active_tpm() {
        let mut tpm = SimTpm::default();
        let status = negotiate(&mut tpm).unwrap();
        assert!(status.capability.tpm_present());
        assert!(!status.capability.tpm_deactivated());
    }
}
