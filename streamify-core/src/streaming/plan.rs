//! Translation of a byte window into piece priorities.

use std::ops::RangeInclusive;

use super::RangeWindow;
use crate::config::StreamingConfig;
use crate::engine::{PiecePriority, TorrentFile, TorrentHandle};

/// Priority band for lookahead pieces, nearest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriorityTier {
    High,
    Normal,
    Low,
}

impl PriorityTier {
    const ORDER: [PriorityTier; 3] = [PriorityTier::High, PriorityTier::Normal, PriorityTier::Low];

    pub fn priority(self) -> PiecePriority {
        match self {
            PriorityTier::High => PiecePriority::High,
            PriorityTier::Normal => PiecePriority::Normal,
            PriorityTier::Low => PiecePriority::Low,
        }
    }
}

/// Piece priorities for one range request.
///
/// Pieces `[start_piece, end_piece]` cover the requested bytes and are
/// critical. Pieces after `end_piece` up to `lookahead_end_piece` are split
/// into tiers of decreasing priority. Everything else keeps whatever
/// priority it already had.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriorityPlan {
    pub start_piece: u32,
    pub end_piece: u32,
    pub lookahead_end_piece: u32,
    pub tiers: Vec<(PriorityTier, RangeInclusive<u32>)>,
}

impl PriorityPlan {
    /// Computes the plan for `window` inside `file`.
    pub fn compute(
        file: &TorrentFile,
        window: RangeWindow,
        piece_length: u64,
        piece_count: u32,
        config: &StreamingConfig,
    ) -> Self {
        let piece_length = piece_length.max(1);
        let last_piece = piece_count.saturating_sub(1);
        let piece_of = |byte: u64| {
            let index = (file.offset + byte) / piece_length;
            u32::try_from(index).unwrap_or(u32::MAX).min(last_piece)
        };

        let start_piece = piece_of(window.start);
        let end_piece = piece_of(window.end);

        let lookahead = lookahead_pieces(piece_count, config);
        let lookahead_end_piece = end_piece.saturating_add(lookahead).min(last_piece);

        Self {
            start_piece,
            end_piece,
            lookahead_end_piece,
            tiers: split_tiers(end_piece, lookahead_end_piece),
        }
    }

    /// Pieces covering the requested bytes.
    pub fn critical_pieces(&self) -> RangeInclusive<u32> {
        self.start_piece..=self.end_piece
    }

    /// Applies the plan to a handle.
    pub fn apply(&self, handle: &dyn TorrentHandle) {
        handle.mark_critical(self.start_piece, self.end_piece);
        handle.select(self.critical_pieces(), PiecePriority::Critical);

        for (tier, pieces) in &self.tiers {
            handle.select(pieces.clone(), tier.priority());
        }

        tracing::debug!(
            info_hash = %handle.info_hash(),
            start_piece = self.start_piece,
            end_piece = self.end_piece,
            lookahead_end_piece = self.lookahead_end_piece,
            "Applied priority plan"
        );
    }
}

/// Lookahead length: `min(max(base, piece_count * ratio), max)`.
fn lookahead_pieces(piece_count: u32, config: &StreamingConfig) -> u32 {
    let proportional = (f64::from(piece_count) * config.lookahead_ratio).max(0.0) as u32;
    proportional
        .max(config.base_lookahead_pieces)
        .min(config.max_lookahead_pieces)
}

/// Splits `(end_piece, lookahead_end]` into up to three equal bands.
fn split_tiers(end_piece: u32, lookahead_end: u32) -> Vec<(PriorityTier, RangeInclusive<u32>)> {
    let count = lookahead_end.saturating_sub(end_piece);
    if count == 0 {
        return Vec::new();
    }

    let band = count.div_ceil(3);
    let mut tiers = Vec::with_capacity(3);
    let mut next = end_piece + 1;
    for tier in PriorityTier::ORDER {
        if next > lookahead_end {
            break;
        }
        let last = next.saturating_add(band - 1).min(lookahead_end);
        tiers.push((tier, next..=last));
        next = last + 1;
    }
    tiers
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn config() -> StreamingConfig {
        StreamingConfig::default()
    }

    fn plan(offset: u64, start: u64, end: u64, piece_length: u64, piece_count: u32) -> PriorityPlan {
        let file = TorrentFile::new("movie.mp4", 1 << 40, offset);
        PriorityPlan::compute(&file, RangeWindow { start, end }, piece_length, piece_count, &config())
    }

    #[test]
    fn test_pieces_follow_file_offset() {
        let plan = plan(250, 0, 99, 100, 1000);
        assert_eq!(plan.critical_pieces(), 2..=3);
    }

    #[test]
    fn test_lookahead_uses_base_for_small_torrents() {
        // 100 pieces * 0.02 = 2, below the base of 5
        let plan = plan(0, 0, 99, 100, 100);
        assert_eq!(plan.end_piece, 0);
        assert_eq!(plan.lookahead_end_piece, 5);
    }

    #[test]
    fn test_lookahead_scales_and_caps() {
        // 1000 pieces * 0.02 = 20
        assert_eq!(plan(0, 0, 0, 100, 1000).lookahead_end_piece, 20);
        // 10000 pieces * 0.02 = 200, capped at 40
        assert_eq!(plan(0, 0, 0, 100, 10_000).lookahead_end_piece, 40);
    }

    #[test]
    fn test_lookahead_clipped_to_last_piece() {
        let plan = plan(0, 9_800, 9_899, 100, 100);
        assert_eq!(plan.end_piece, 98);
        assert_eq!(plan.lookahead_end_piece, 99);
        assert_eq!(plan.tiers, vec![(PriorityTier::High, 99..=99)]);
    }

    #[test]
    fn test_range_at_last_piece_has_no_lookahead() {
        let plan = plan(0, 9_950, 9_999, 100, 100);
        assert_eq!(plan.critical_pieces(), 99..=99);
        assert!(plan.tiers.is_empty());
    }

    #[test]
    fn test_tiers_split_in_equal_bands() {
        assert_eq!(
            split_tiers(10, 16),
            vec![
                (PriorityTier::High, 11..=12),
                (PriorityTier::Normal, 13..=14),
                (PriorityTier::Low, 15..=16),
            ]
        );
        assert_eq!(
            split_tiers(0, 2),
            vec![(PriorityTier::High, 1..=1), (PriorityTier::Normal, 2..=2)]
        );
    }

    #[tokio::test]
    async fn test_apply_sets_critical_and_tiers() {
        use crate::engine::{AddOptions, DownloadEngine, InfoHash, MockEngine, mock_locator};

        let engine = MockEngine::new();
        let hash = InfoHash::new([3; 20]);
        let handle = engine
            .add(&mock_locator(hash, "movie.mp4", 5000), &AddOptions::default())
            .await
            .unwrap();
        let mock = engine.handle(hash).unwrap();
        handle.select(0..=49, PiecePriority::Background);

        let plan = PriorityPlan::compute(
            &handle.files()[0],
            RangeWindow { start: 200, end: 499 },
            handle.piece_length(),
            handle.piece_count(),
            &config(),
        );
        plan.apply(handle.as_ref());

        let priorities = mock.priorities();
        assert_eq!(mock.critical_ranges(), vec![(2, 4)]);
        assert!(priorities[2..=4].iter().all(|p| *p == PiecePriority::Critical));
        assert_eq!(priorities[5], PiecePriority::High);
        assert_eq!(priorities[9], PiecePriority::Low);
        assert_eq!(priorities[1], PiecePriority::Background);
        assert_eq!(priorities[10], PiecePriority::Background);
    }

    proptest! {
        #[test]
        fn tiers_are_contiguous_and_decreasing(end in 0u32..1000, count in 0u32..100) {
            let tiers = split_tiers(end, end + count);
            let mut next = end + 1;
            let mut previous: Option<PiecePriority> = None;
            for (tier, pieces) in &tiers {
                prop_assert_eq!(*pieces.start(), next);
                next = pieces.end() + 1;
                if let Some(previous) = previous {
                    prop_assert!(tier.priority() < previous);
                }
                previous = Some(tier.priority());
            }
            prop_assert_eq!(next, end + count + 1);
        }

        #[test]
        fn plan_stays_inside_torrent(
            offset in 0u64..100_000,
            start in 0u64..100_000,
            span in 0u64..100_000,
            piece_length in 1u64..5_000,
        ) {
            let total = offset + start + span + 1;
            let piece_count = total.div_ceil(piece_length) as u32;
            let plan = plan(offset, start, start + span, piece_length, piece_count);
            prop_assert!(plan.start_piece <= plan.end_piece);
            prop_assert!(plan.end_piece <= plan.lookahead_end_piece);
            prop_assert!(plan.lookahead_end_piece < piece_count);
        }
    }
}
