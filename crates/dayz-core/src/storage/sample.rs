//! Player-count sample record
//!
//! Binary format (little-endian), shared by the NVS mirror and the binary
//! snapshot file:
//! - timestamp: 4 bytes (u32, unix seconds)
//! - player_count: 2 bytes (i16, -1 when unknown)

/// One observed player count
///
/// Samples are immutable once created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Sample {
    timestamp: u32,
    player_count: i16,
}

impl Sample {
    /// Size of one encoded sample in bytes
    pub const ENCODED_LEN: usize = 6;

    /// Sentinel for "server did not report a count"
    pub const UNKNOWN_PLAYERS: i16 = -1;

    pub const fn new(timestamp: u32, player_count: i16) -> Self {
        Self {
            timestamp,
            player_count,
        }
    }

    pub const fn timestamp(&self) -> u32 {
        self.timestamp
    }

    pub const fn player_count(&self) -> i16 {
        self.player_count
    }

    pub const fn is_known(&self) -> bool {
        self.player_count >= 0
    }

    pub fn to_bytes(&self) -> [u8; Self::ENCODED_LEN] {
        let mut bytes = [0u8; Self::ENCODED_LEN];
        bytes[0..4].copy_from_slice(&self.timestamp.to_le_bytes());
        bytes[4..6].copy_from_slice(&self.player_count.to_le_bytes());
        bytes
    }

    pub fn from_bytes(bytes: &[u8; Self::ENCODED_LEN]) -> Self {
        Self {
            timestamp: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            player_count: i16::from_le_bytes([bytes[4], bytes[5]]),
        }
    }
}

/// Encode samples back to back
pub fn encode_samples(samples: impl IntoIterator<Item = Sample>, out: &mut alloc::vec::Vec<u8>) {
    for sample in samples {
        out.extend_from_slice(&sample.to_bytes());
    }
}

/// Decode back-to-back samples, ignoring a trailing partial record
pub fn decode_samples(bytes: &[u8]) -> impl Iterator<Item = Sample> + '_ {
    bytes.chunks_exact(Sample::ENCODED_LEN).map(|chunk| {
        let mut record = [0u8; Sample::ENCODED_LEN];
        record.copy_from_slice(chunk);
        Sample::from_bytes(&record)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;

    #[test]
    fn test_sample_layout() {
        let sample = Sample::new(0x0403_0201, -1);
        assert_eq!(
            sample.to_bytes(),
            [0x01, 0x02, 0x03, 0x04, 0xFF, 0xFF],
            "Sample must encode as u32 LE timestamp followed by i16 LE count"
        );
    }

    #[test]
    fn test_decode_ignores_partial_tail() {
        let mut bytes = Vec::new();
        encode_samples([Sample::new(10, 1), Sample::new(20, 2)], &mut bytes);
        bytes.extend_from_slice(&[0xAA, 0xBB, 0xCC]);

        let decoded: Vec<Sample> = decode_samples(&bytes).collect();
        assert_eq!(decoded, [Sample::new(10, 1), Sample::new(20, 2)]);
    }

    #[test]
    fn test_unknown_count() {
        assert!(!Sample::new(1, Sample::UNKNOWN_PLAYERS).is_known());
        assert!(Sample::new(1, 0).is_known());
    }
}
