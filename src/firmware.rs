//! Firmware images as a fixed-length sequence of possibly-missing chunks.

use serde::{Deserialize, Serialize};

use crate::message::{ChunkId, FwType, Version};

/// An opaque stand-in for a chunk's payload bytes. Real firmware bytes and
/// their integrity are out of scope here - only identity and presence
/// matter to the protocol.
pub type ChunkPayload = u64;

/// A firmware image of a given type and version, represented as a fixed
/// number of chunk slots that start out empty (`None`) until filled in by
/// the protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Firmware {
    pub fw_type: FwType,
    pub version: Version,
    pub data: Vec<Option<ChunkPayload>>,
}

impl Firmware {
    pub fn new(fw_type: FwType, version: Version, data: Vec<Option<ChunkPayload>>) -> Self {
        Self {
            fw_type,
            version,
            data,
        }
    }

    /// A complete firmware image of `chunks` slots, all present, filled
    /// with a deterministic placeholder payload per chunk index.
    pub fn complete(fw_type: FwType, version: Version, chunks: usize) -> Self {
        Self::new(
            fw_type,
            version,
            (0..chunks).map(|i| Some(i as ChunkPayload)).collect(),
        )
    }

    /// An empty candidate image with `chunks` slots, all missing.
    pub fn empty(fw_type: FwType, version: Version, chunks: usize) -> Self {
        Self::new(fw_type, version, vec![None; chunks])
    }

    pub fn data_size(&self) -> usize {
        self.data.len()
    }

    pub fn is_complete(&self) -> bool {
        self.data.iter().all(Option::is_some)
    }

    pub fn is_valid_chunk_id(&self, chunk_id: ChunkId) -> bool {
        chunk_id < self.data_size()
    }

    pub fn is_chunk_present(&self, chunk_id: ChunkId) -> bool {
        self.is_valid_chunk_id(chunk_id) && self.data[chunk_id].is_some()
    }

    pub fn get_missing_chunks(&self) -> Vec<ChunkId> {
        self.data
            .iter()
            .enumerate()
            .filter(|(_, d)| d.is_none())
            .map(|(i, _)| i)
            .collect()
    }

    pub fn get_first_missing_chunk(&self) -> Option<ChunkId> {
        self.data.iter().position(Option::is_none)
    }

    /// The lowest chunk id strictly greater than `chunk_id` that is
    /// present, if any - not necessarily the immediately following one.
    pub fn get_next_chunk_present(&self, chunk_id: ChunkId) -> Option<ChunkId> {
        ((chunk_id + 1)..self.data_size()).find(|&i| self.data[i].is_some())
    }

    pub fn set_chunk(&mut self, chunk_id: ChunkId, payload: ChunkPayload) {
        self.data[chunk_id] = Some(payload);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complete_image_reports_no_missing_chunks() {
        let fw = Firmware::complete(1, 1, 4);
        assert!(fw.is_complete());
        assert!(fw.get_missing_chunks().is_empty());
        assert_eq!(fw.get_first_missing_chunk(), None);
    }

    #[test]
    fn empty_image_tracks_missing_chunks_in_order() {
        let fw = Firmware::empty(1, 1, 3);
        assert!(!fw.is_complete());
        assert_eq!(fw.get_missing_chunks(), vec![0, 1, 2]);
        assert_eq!(fw.get_first_missing_chunk(), Some(0));
    }

    #[test]
    fn next_chunk_present_skips_gaps() {
        let mut fw = Firmware::empty(1, 1, 5);
        fw.set_chunk(1, 10);
        fw.set_chunk(4, 40);
        assert_eq!(fw.get_next_chunk_present(0), Some(1));
        assert_eq!(fw.get_next_chunk_present(1), Some(4));
        assert_eq!(fw.get_next_chunk_present(4), None);
    }

    #[test]
    fn invalid_chunk_id_is_never_present() {
        let fw = Firmware::empty(1, 1, 2);
        assert!(!fw.is_chunk_present(5));
        assert!(!fw.is_valid_chunk_id(5));
    }
}
