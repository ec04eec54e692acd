//! Deterministic piece content.

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use streamify_core::engine::InfoHash;

const PIECE_SEED_STRIDE: u64 = 0x9E37_79B9_7F4A_7C15;

/// Byte source for one simulated torrent.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PieceContent {
    seed: u64,
    pub piece_length: u64,
    pub total_length: u64,
}

impl PieceContent {
    pub fn new(seed: u64, info_hash: InfoHash, piece_length: u64, total_length: u64) -> Self {
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&info_hash.as_bytes()[..8]);
        Self {
            seed: seed ^ u64::from_le_bytes(prefix),
            piece_length: piece_length.max(1),
            total_length,
        }
    }

    pub fn piece_of(&self, offset: u64) -> u32 {
        u32::try_from(offset / self.piece_length).unwrap_or(u32::MAX)
    }

    pub fn piece_start(&self, piece: u32) -> u64 {
        u64::from(piece) * self.piece_length
    }

    /// Full bytes of `piece`; the last piece may be short.
    pub fn piece(&self, piece: u32) -> Vec<u8> {
        let start = self.piece_start(piece);
        let length = self
            .piece_length
            .min(self.total_length.saturating_sub(start));

        let piece_seed = self
            .seed
            .wrapping_add(u64::from(piece).wrapping_mul(PIECE_SEED_STRIDE));
        let mut rng = ChaCha8Rng::seed_from_u64(piece_seed);
        let mut data = vec![0u8; length as usize];
        rng.fill_bytes(&mut data);
        data
    }

    /// Bytes at absolute offsets `[start, end]`, regardless of completion.
    pub fn range(&self, start: u64, end: u64) -> Vec<u8> {
        let mut out = Vec::with_capacity((end - start + 1) as usize);
        let mut position = start;
        while position <= end {
            let piece = self.piece_of(position);
            let piece_start = self.piece_start(piece);
            let segment_end = (piece_start + self.piece_length - 1).min(end);
            let data = self.piece(piece);
            out.extend_from_slice(
                &data[(position - piece_start) as usize..=(segment_end - piece_start) as usize],
            );
            position = segment_end + 1;
        }
        out
    }
}
