// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! The 80-byte Bitcoin-compatible block header and its wire serialization.

use byteorder::{LittleEndian, WriteBytesExt};

use crate::hash::DHash;

pub const HEADER_LEN: usize = 80;

/// A candidate block header, reconstructed from a job and a miner's submission.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Header {
    pub version: u32,
    pub prev_hash: DHash,
    pub merkle_root: DHash,
    pub time: u32,
    pub bits: u32,
    pub nonce: u32,
}

impl Header {
    /// Serializes the header in Bitcoin wire order: all fields little-endian, `prev_hash` and
    /// `merkle_root` emitted in their internal (already little-endian-as-bytes) byte order.
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut buf = Vec::with_capacity(HEADER_LEN);
        buf.write_u32::<LittleEndian>(self.version)
            .expect("write to Vec never fails");
        buf.extend_from_slice(self.prev_hash.as_bytes());
        buf.extend_from_slice(self.merkle_root.as_bytes());
        buf.write_u32::<LittleEndian>(self.time)
            .expect("write to Vec never fails");
        buf.write_u32::<LittleEndian>(self.bits)
            .expect("write to Vec never fails");
        buf.write_u32::<LittleEndian>(self.nonce)
            .expect("write to Vec never fails");

        buf.try_into().expect("header serializes to exactly 80 bytes")
    }

    /// Double-SHA256 of the serialized header.
    pub fn block_hash(&self) -> DHash {
        DHash::hash(&self.to_bytes())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn serializes_to_eighty_bytes() {
        let header = Header {
            version: 1,
            prev_hash: DHash::hash(b"prev"),
            merkle_root: DHash::hash(b"merkle"),
            time: 0x5f000000,
            bits: 0x1d00ffff,
            nonce: 42,
        };
        assert_eq!(header.to_bytes().len(), HEADER_LEN);
    }

    #[test]
    fn version_is_encoded_little_endian_at_offset_zero() {
        let header = Header {
            version: 0x2000_0000,
            prev_hash: DHash::zero(),
            merkle_root: DHash::zero(),
            time: 0,
            bits: 0,
            nonce: 0,
        };
        let bytes = header.to_bytes();
        assert_eq!(&bytes[0..4], &[0x00, 0x00, 0x00, 0x20]);
    }

    #[test]
    fn nonce_is_the_last_four_bytes() {
        let header = Header {
            version: 0,
            prev_hash: DHash::zero(),
            merkle_root: DHash::zero(),
            time: 0,
            bits: 0,
            nonce: 0x1234_5678,
        };
        let bytes = header.to_bytes();
        assert_eq!(&bytes[76..80], &[0x78, 0x56, 0x34, 0x12]);
    }
}
