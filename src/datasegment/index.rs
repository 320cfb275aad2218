use sha2::{Digest, Sha256};

use super::merkle::{Node, NODE_SIZE};

/// Serialized size of one index entry.
pub const ENTRY_SIZE: usize = 64;
const CHECKSUM_SIZE: usize = 16;

/// One entry of the data segment index trailing an aggregate: the segment
/// commitment, its padded offset and size within the deal, and a truncated
/// checksum over the preceding fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentDesc {
    pub comm_ds: Node,
    pub offset: u64,
    pub size: u64,
    pub checksum: [u8; CHECKSUM_SIZE],
}

impl SegmentDesc {
    pub fn new(comm_ds: Node, offset: u64, size: u64) -> Self {
        let mut desc = Self {
            comm_ds,
            offset,
            size,
            checksum: [0u8; CHECKSUM_SIZE],
        };
        desc.checksum = desc.compute_checksum();
        desc
    }

    fn compute_checksum(&self) -> [u8; CHECKSUM_SIZE] {
        let mut hasher = Sha256::new();
        hasher.update(self.comm_ds);
        hasher.update(self.offset.to_le_bytes());
        hasher.update(self.size.to_le_bytes());
        let digest = hasher.finalize();
        let mut out = [0u8; CHECKSUM_SIZE];
        out.copy_from_slice(&digest[..CHECKSUM_SIZE]);
        // checksum is truncated to 126 bits
        out[CHECKSUM_SIZE - 1] &= 0x7f;
        out
    }

    pub fn to_bytes(&self) -> [u8; ENTRY_SIZE] {
        let mut out = [0u8; ENTRY_SIZE];
        out[..NODE_SIZE].copy_from_slice(&self.comm_ds);
        out[NODE_SIZE..NODE_SIZE + 8].copy_from_slice(&self.offset.to_le_bytes());
        out[NODE_SIZE + 8..NODE_SIZE + 16].copy_from_slice(&self.size.to_le_bytes());
        out[NODE_SIZE + 16..].copy_from_slice(&self.checksum);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_serializes_to_64_bytes() {
        let desc = SegmentDesc::new([3u8; NODE_SIZE], 256, 1024);
        let bytes = desc.to_bytes();
        assert_eq!(bytes.len(), ENTRY_SIZE);
        assert_eq!(&bytes[..NODE_SIZE], &[3u8; NODE_SIZE]);
        assert_eq!(u64::from_le_bytes(bytes[32..40].try_into().unwrap()), 256);
        assert_eq!(u64::from_le_bytes(bytes[40..48].try_into().unwrap()), 1024);
    }

    #[test]
    fn checksum_top_bit_cleared() {
        let desc = SegmentDesc::new([0xffu8; NODE_SIZE], 0, 128);
        assert_eq!(desc.checksum[CHECKSUM_SIZE - 1] & 0x80, 0);
    }

    #[test]
    fn checksum_depends_on_fields() {
        let a = SegmentDesc::new([1u8; NODE_SIZE], 0, 128);
        let b = SegmentDesc::new([1u8; NODE_SIZE], 128, 128);
        assert_ne!(a.checksum, b.checksum);
    }
}
