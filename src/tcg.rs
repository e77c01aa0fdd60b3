// SPDX-License-Identifier: MIT OR Apache-2.0

//! Wire-level binding for the [TCG] protocol for TPM family 1.1/1.2
//! (`EFI_TCG_PROTOCOL`).
//!
//! Only the two members the measurement pipeline needs are wrapped: the
//! capability/status query and the combined hash/extend/log primitive.
//! Unlike other bindings, [`Tcg::hash_log_extend_event`] surfaces the
//! event number and log-tail address the firmware reports, so callers can
//! relate each measurement to its log entry.
//!
//! [TCG]: https://trustedcomputinggroup.org/resource/tcg-efi-protocol-specification/

use crate::event::PcrEvent;
use bitflags::bitflags;
use uefi::data_types::PhysicalAddress;
use uefi::proto::unsafe_protocol;
use uefi::{Result, Status, StatusExt};

/// 20-byte SHA-1 digest.
pub type Sha1Digest = [u8; 20];

/// Platform Configuration Register (PCR) index.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd)]
#[repr(transparent)]
pub struct PcrIndex(pub u32);

/// Hash algorithm identifier from the TCG algorithm registry.
///
/// The v1 protocol carries this as a `u32`. Only SHA-1 is defined for
/// TPM 1.1/1.2 and only SHA-1 is ever passed by this crate.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(transparent)]
pub struct AlgorithmId(pub u32);

impl AlgorithmId {
    /// The SHA-1 algorithm (`TCG_ALG_SHA`).
    pub const SHA1: Self = Self(0x0000_0004);
}

bitflags! {
    /// Hash algorithms reported in the capability bitmap.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
    #[repr(transparent)]
    pub struct HashAlgorithm: u8 {
        /// SHA-1, the only algorithm a v1 interface can report.
        const SHA1 = 0x01;
    }
}

/// Type tag of an event-log entry, defining what the trailing event data
/// contains.
///
/// Standard values come from the TCG PC specification; the `0x8000_0000`
/// range holds the EFI-specific types from the TCG EFI Platform spec.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(transparent)]
pub struct EventType(pub u32);

#[allow(missing_docs)]
impl EventType {
    pub const NO_ACTION: Self = Self(3);
    pub const SEPARATOR: Self = Self(4);
    pub const ACTION: Self = Self(5);
    pub const EVENT_TAG: Self = Self(6);
    pub const CPU_MICROCODE: Self = Self(9);
    pub const PLATFORM_CONFIG_FLAGS: Self = Self(10);
    pub const IPL: Self = Self(13);
    pub const IPL_PARTITION_DATA: Self = Self(14);
    pub const NONHOST_CODE: Self = Self(15);
    pub const NONHOST_CONFIG: Self = Self(16);

    const EFI_EVENT_BASE: u32 = 0x8000_0000;
    pub const EFI_VARIABLE_DRIVER_CONFIG: Self = Self(Self::EFI_EVENT_BASE + 1);
    pub const EFI_VARIABLE_BOOT: Self = Self(Self::EFI_EVENT_BASE + 2);
    pub const EFI_BOOT_SERVICES_APPLICATION: Self = Self(Self::EFI_EVENT_BASE + 3);
    pub const EFI_BOOT_SERVICES_DRIVER: Self = Self(Self::EFI_EVENT_BASE + 4);
    pub const EFI_RUNTIME_SERVICES_DRIVER: Self = Self(Self::EFI_EVENT_BASE + 5);
    pub const EFI_GPT_EVENT: Self = Self(Self::EFI_EVENT_BASE + 6);
    pub const EFI_ACTION: Self = Self(Self::EFI_EVENT_BASE + 7);
    pub const EFI_PLATFORM_FIRMWARE_BLOB: Self = Self(Self::EFI_EVENT_BASE + 8);
    pub const EFI_HANDOFF_TABLES: Self = Self(Self::EFI_EVENT_BASE + 9);
}

/// Version tuple reported in the capability block.
///
/// Layout compatible with the C type `TCG_VERSION`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd)]
pub struct Version {
    /// Major version.
    pub major: u8,
    /// Minor version.
    pub minor: u8,

    // The TCG spec does not say what these revision fields mean, and
    // they were dropped from the v2 protocol.
    #[allow(missing_docs)]
    pub rev_major: u8,
    #[allow(missing_docs)]
    pub rev_minor: u8,
}

/// Capability and status block reported by the interface.
///
/// Layout compatible with the C type `TCG_BOOT_SERVICE_CAPABILITY`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct BootServiceCapability {
    size: u8,
    structure_version: Version,
    protocol_spec_version: Version,
    hash_algorithm_bitmap: u8,
    tpm_present_flag: u8,
    tpm_deactivated_flag: u8,
}

impl BootServiceCapability {
    /// Version of the capability structure itself.
    #[must_use]
    pub fn structure_version(&self) -> Version {
        self.structure_version
    }

    /// Version of the protocol specification the interface implements.
    #[must_use]
    pub fn protocol_spec_version(&self) -> Version {
        self.protocol_spec_version
    }

    /// Hash algorithms the interface supports.
    #[must_use]
    pub fn hash_algorithm(&self) -> HashAlgorithm {
        HashAlgorithm::from_bits_retain(self.hash_algorithm_bitmap)
    }

    /// Whether a TPM device is present.
    #[must_use]
    pub fn tpm_present(&self) -> bool {
        self.tpm_present_flag != 0
    }

    /// Whether the TPM device is deactivated. A deactivated TPM must not
    /// receive extend calls.
    #[must_use]
    pub fn tpm_deactivated(&self) -> bool {
        self.tpm_deactivated_flag != 0
    }
}

#[cfg(test)]
impl BootServiceCapability {
    /// Capability block the way a present TPM 1.2 would report it.
    pub(crate) fn simulated(deactivated: bool) -> Self {
        Self {
            size: core::mem::size_of::<Self>() as u8,
            structure_version: Version {
                major: 1,
                minor: 2,
                ..Version::default()
            },
            protocol_spec_version: Version {
                major: 1,
                minor: 2,
                ..Version::default()
            },
            hash_algorithm_bitmap: HashAlgorithm::SHA1.bits(),
            tpm_present_flag: 1,
            tpm_deactivated_flag: u8::from(deactivated),
        }
    }
}

/// Successful result of the capability/status query.
#[derive(Clone, Copy, Debug)]
pub struct InterfaceStatus {
    /// Capability block for the interface and the TPM device behind it.
    pub capability: BootServiceCapability,

    /// Feature flags. The spec defines none, so this is expected to be
    /// zero.
    pub feature_flags: u32,

    /// Physical address of the first event-log entry.
    pub event_log_location: PhysicalAddress,

    /// Physical address of the last event-log entry.
    pub event_log_last_entry: PhysicalAddress,
}

/// Log coordinates assigned by a successful hash/extend/log call.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ExtendOutcome {
    /// Event number the firmware assigned to the new log entry.
    pub event_number: u32,

    /// Physical address of the new last event-log entry.
    pub event_log_last_entry: PhysicalAddress,
}

/// Protocol for measuring into TPM 1.1/1.2 PCRs.
///
/// The corresponding C type is `EFI_TCG_PROTOCOL`.
#[repr(C)]
#[unsafe_protocol("f541796d-a62e-4954-a775-9584f61b9cdd")]
pub struct Tcg {
    status_check: unsafe extern "efiapi" fn(
        this: *mut Tcg,
        protocol_capability: *mut BootServiceCapability,
        feature_flags: *mut u32,
        event_log_location: *mut PhysicalAddress,
        event_log_last_entry: *mut PhysicalAddress,
    ) -> Status,

    // HashAll, LogEvent, and PassThroughToTpm are not used by the
    // measurement pipeline; they are declared with dummy signatures and
    // exist only to keep the function-table layout correct.
    hash_all: unsafe extern "efiapi" fn() -> Status,
    log_event: unsafe extern "efiapi" fn() -> Status,
    pass_through_to_tpm: unsafe extern "efiapi" fn() -> Status,

    hash_log_extend_event: unsafe extern "efiapi" fn(
        this: *mut Tcg,
        hash_data: PhysicalAddress,
        hash_data_len: u64,
        algorithm_id: u32,
        event: *mut u8,
        event_number: *mut u32,
        event_log_last_entry: *mut PhysicalAddress,
    ) -> Status,
}

impl Tcg {
    /// Query the capability block, feature flags, and event-log bounds.
    pub fn status_check(&mut self) -> Result<InterfaceStatus> {
        let mut capability = BootServiceCapability::default();
        let mut feature_flags = 0;
        let mut event_log_location = 0;
        let mut event_log_last_entry = 0;

        unsafe {
            (self.status_check)(
                self,
                &mut capability,
                &mut feature_flags,
                &mut event_log_location,
                &mut event_log_last_entry,
            )
        }
        .to_result_with_val(|| InterfaceStatus {
            capability,
            feature_flags,
            event_log_location,
            event_log_last_entry,
        })
    }

    /// Hash `data` with `algorithm`, extend the digest into the PCR named
    /// by `event`, and append `event` to the log, in one firmware call.
    ///
    /// The in/out event number is seeded with 1; the firmware writes back
    /// the number it actually assigned, which is returned along with the
    /// new log-tail address. The record's digest field is filled by the
    /// firmware, never by the caller.
    pub fn hash_log_extend_event(
        &mut self,
        data: &[u8],
        algorithm: AlgorithmId,
        event: &PcrEvent,
    ) -> Result<ExtendOutcome> {
        let mut encoded = event
            .encode()
            .map_err(|_| uefi::Error::from(Status::OUT_OF_RESOURCES))?;

        let mut event_number = 1;
        let mut event_log_last_entry = 0;

        unsafe {
            (self.hash_log_extend_event)(
                self,
                data.as_ptr() as PhysicalAddress,
                data.len() as u64,
                algorithm.0,
                encoded.as_mut_ptr(),
                &mut event_number,
                &mut event_log_last_entry,
            )
        }
        .to_result_with_val(|| ExtendOutcome {
            event_number,
            event_log_last_entry,
        })
    }
}

impl crate::measure::MeasurementInterface for Tcg {
    fn status_check(&mut self) -> Result<InterfaceStatus> {
        Tcg::status_check(self)
    }

    fn hash_log_extend(
        &mut self,
        data: &[u8],
        algorithm: AlgorithmId,
        event: &PcrEvent,
    ) -> Result<ExtendOutcome> {
        self.hash_log_extend_event(data, algorithm, event)
    }
}
