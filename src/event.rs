// SPDX-License-Identifier: MIT OR Apache-2.0

//! Event records for the TPM event log.

use crate::tcg::{EventType, PcrIndex, Sha1Digest};
use alloc::collections::TryReserveError;
use alloc::vec::Vec;
use core::mem;

/// Serialized size of the record header: PCR index, event type, digest,
/// and declared event-data size.
pub const ENCODED_HEADER_LEN: usize =
    mem::size_of::<u32>() * 2 + mem::size_of::<Sha1Digest>() + mem::size_of::<u32>();

/// One measurement, shaped for the event log.
///
/// The C type `TCG_PCR_EVENT` is a fixed header followed by inline
/// variable-length event data. Here the header fields and the data are
/// kept apart and only joined by [`encode`], so the declared-size field
/// of the serialized form is always derived from the data length and the
/// two cannot disagree.
///
/// The digest field is zero-filled on construction: the firmware computes
/// and fills it when the record is submitted for extension.
///
/// [`encode`]: PcrEvent::encode
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PcrEvent {
    pcr_index: PcrIndex,
    event_type: EventType,
    digest: Sha1Digest,
    event_data: Vec<u8>,
}

impl PcrEvent {
    /// Build a record that embeds a copy of `event_data`, so the log
    /// entry itself carries the measured bytes.
    ///
    /// # Errors
    ///
    /// Fails if the copy of `event_data` cannot be allocated; the
    /// artifact must then not be measured.
    pub fn new(
        pcr_index: PcrIndex,
        event_type: EventType,
        event_data: &[u8],
    ) -> Result<Self, TryReserveError> {
        let mut owned = Vec::new();
        owned.try_reserve_exact(event_data.len())?;
        owned.extend_from_slice(event_data);

        Ok(Self {
            pcr_index,
            event_type,
            digest: [0; 20],
            event_data: owned,
        })
    }

    /// Build a record with no trailing event data, for artifacts too
    /// large to be worth embedding in the log.
    #[must_use]
    pub fn without_data(pcr_index: PcrIndex, event_type: EventType) -> Self {
        Self {
            pcr_index,
            event_type,
            digest: [0; 20],
            event_data: Vec::new(),
        }
    }

    /// PCR index the record extends into.
    #[must_use]
    pub fn pcr_index(&self) -> PcrIndex {
        self.pcr_index
    }

    /// Type tag of the record.
    #[must_use]
    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    /// Digest field, zero-filled until the firmware fills it.
    #[must_use]
    pub fn digest(&self) -> Sha1Digest {
        self.digest
    }

    /// Trailing event data; empty unless the record embeds its artifact.
    #[must_use]
    pub fn event_data(&self) -> &[u8] {
        &self.event_data
    }

    /// Declared size of the trailing event data.
    #[must_use]
    pub fn event_data_size(&self) -> u32 {
        // Artifacts come from FAT volumes, whose file sizes cap below
        // 4 GiB, so the length always fits the wire field.
        debug_assert!(u32::try_from(self.event_data.len()).is_ok());
        self.event_data.len() as u32
    }

    /// Serialize to the packed `TCG_PCR_EVENT` wire layout, all integers
    /// little endian.
    ///
    /// # Errors
    ///
    /// Fails if the output buffer cannot be allocated.
    pub fn encode(&self) -> Result<Vec<u8>, TryReserveError> {
        let mut out = Vec::new();
        out.try_reserve_exact(ENCODED_HEADER_LEN + self.event_data.len())?;

        out.extend_from_slice(&self.pcr_index.0.to_le_bytes());
        out.extend_from_slice(&self.event_type.0.to_le_bytes());
        out.extend_from_slice(&self.digest);
        out.extend_from_slice(&self.event_data_size().to_le_bytes());
        out.extend_from_slice(&self.event_data);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoded_layout_matches_packed_c_struct() {
        let data = [0x14, 0x15, 0x16, 0x17];
        let event = PcrEvent::new(
            PcrIndex(8),
            EventType::EFI_PLATFORM_FIRMWARE_BLOB,
            &data,
        )
        .unwrap();

        #[rustfmt::skip]
        assert_eq!(event.encode().unwrap(), [
            // PCR index
            0x08, 0x00, 0x00, 0x00,
            // Event type
            0x08, 0x00, 0x00, 0x80,
            // Digest, zero until the firmware fills it
            0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            // Event data size
            0x04, 0x00, 0x00, 0x00,
            // Event data
            0x14, 0x15, 0x16, 0x17,
        ]);
    }

    #[test]
    fn embedded_record_declares_exact_data_size() {
        let data = [0xaau8; 37];
        let event = PcrEvent::new(PcrIndex(8), EventType::EFI_PLATFORM_FIRMWARE_BLOB, &data)
            .unwrap();

        assert_eq!(event.event_data_size(), 37);
        assert_eq!(event.event_data(), &data);
        assert_eq!(event.digest(), [0; 20]);

        let encoded = event.encode().unwrap();
        assert_eq!(encoded.len(), ENCODED_HEADER_LEN + 37);
    }

    #[test]
    fn bare_record_declares_zero_data_size() {
        let event = PcrEvent::without_data(PcrIndex(8), EventType::EFI_PLATFORM_FIRMWARE_BLOB);

        assert_eq!(event.event_data_size(), 0);
        assert!(event.event_data().is_empty());

        let encoded = event.encode().unwrap();
        assert_eq!(encoded.len(), ENCODED_HEADER_LEN);
        assert_eq!(&encoded[ENCODED_HEADER_LEN - 4..], [0, 0, 0, 0]);
    }
}
