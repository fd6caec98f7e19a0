//! Scan cursor: the dispatcher's in-memory position in the chain.

use serde::{Deserialize, Serialize};

use crate::checkpoint::Checkpoint;

/// Where the dispatcher will look next.
///
/// `Uninitialized` is kept apart from any block number so that a scan can
/// start at (and resume from) block 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ScanCursor {
    /// No checkpoint has been loaded yet.
    #[default]
    Uninitialized,
    /// Next transaction to deliver is `tx_index` of block `block`.
    At { block: u64, tx_index: u32 },
}

impl ScanCursor {
    /// Start a fresh scan at the first transaction of `head`.
    pub fn at_head(head: u64) -> Self {
        Self::At {
            block: head,
            tx_index: 0,
        }
    }

    /// Resume after a stored checkpoint: delivery restarts at the
    /// transaction following the stored index.
    pub fn resume(checkpoint: &Checkpoint) -> Self {
        Self::At {
            block: checkpoint.block_number,
            tx_index: checkpoint.tx_index.saturating_add(1),
        }
    }

    /// Returns `(block, tx_index)` once initialized.
    pub fn position(&self) -> Option<(u64, u32)> {
        match *self {
            Self::Uninitialized => None,
            Self::At { block, tx_index } => Some((block, tx_index)),
        }
    }

    pub fn is_initialized(&self) -> bool {
        matches!(self, Self::At { .. })
    }

    /// Move past the current position in a block of `tx_count` transactions.
    ///
    /// `delivered` is `true` when a transaction was handed to the handler in
    /// this iteration. Once the index reaches the end of the block the cursor
    /// rolls over to index 0 of the next block.
    pub fn advance(&mut self, delivered: bool, tx_count: u32) {
        if let Self::At { block, tx_index } = self {
            if delivered {
                *tx_index += 1;
            }
            if *tx_index >= tx_count {
                *tx_index = 0;
                *block += 1;
            }
        }
    }

    /// The checkpoint to persist for this position.
    pub fn checkpoint(&self) -> Option<Checkpoint> {
        self.position()
            .map(|(block_number, tx_index)| Checkpoint::new(block_number, tx_index))
    }

    /// A checkpoint that [`resume`](Self::resume) maps back onto this exact
    /// position, so the current transaction is delivered again on restart.
    ///
    /// At index 0 it points past the end of the previous block
    /// (`tx_index == u32::MAX`). Index 0 of block 0 has no such checkpoint.
    pub fn rewind_checkpoint(&self) -> Option<Checkpoint> {
        match self.position()? {
            (block, tx_index) if tx_index > 0 => Some(Checkpoint::new(block, tx_index - 1)),
            (0, _) => None,
            (block, _) => Some(Checkpoint::new(block - 1, u32::MAX)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resume_skips_stored_index() {
        let cursor = ScanCursor::resume(&Checkpoint::new(100, 1));
        assert_eq!(cursor.position(), Some((100, 2)));
    }

    #[test]
    fn advance_within_block() {
        let mut cursor = ScanCursor::at_head(100);
        cursor.advance(true, 3);
        assert_eq!(cursor.position(), Some((100, 1)));
    }

    #[test]
    fn advance_rolls_over_block() {
        let mut cursor = ScanCursor::At { block: 100, tx_index: 2 };
        cursor.advance(true, 3);
        assert_eq!(cursor.position(), Some((101, 0)));
    }

    #[test]
    fn empty_block_still_advances() {
        let mut cursor = ScanCursor::at_head(7);
        cursor.advance(false, 0);
        assert_eq!(cursor.position(), Some((8, 0)));
    }

    #[test]
    fn resume_past_end_of_block_moves_on() {
        // (100, 2) stored for a 3-tx block: index 3 is out of range.
        let mut cursor = ScanCursor::resume(&Checkpoint::new(100, 2));
        cursor.advance(false, 3);
        assert_eq!(cursor.position(), Some((101, 0)));
    }

    #[test]
    fn genesis_is_a_real_position() {
        let cursor = ScanCursor::at_head(0);
        assert!(cursor.is_initialized());
        assert_eq!(cursor.checkpoint(), Some(Checkpoint::new(0, 0)));
        assert_eq!(ScanCursor::Uninitialized.checkpoint(), None);
    }

    #[test]
    fn rewind_resumes_on_same_position() {
        let cursor = ScanCursor::At { block: 50, tx_index: 1 };
        let rewound = cursor.rewind_checkpoint().unwrap();
        assert_eq!(rewound, Checkpoint::new(50, 0));
        assert_eq!(ScanCursor::resume(&rewound), cursor);
    }

    #[test]
    fn rewind_at_block_start_points_past_previous_block() {
        let cursor = ScanCursor::at_head(51);
        let rewound = cursor.rewind_checkpoint().unwrap();
        assert_eq!(rewound, Checkpoint::new(50, u32::MAX));

        // Block 50 has 3 transactions: nothing left there, so move on to 51.
        let mut resumed = ScanCursor::resume(&rewound);
        resumed.advance(false, 3);
        assert_eq!(resumed, cursor);

        assert_eq!(ScanCursor::at_head(0).rewind_checkpoint(), None);
        assert_eq!(ScanCursor::Uninitialized.rewind_checkpoint(), None);
    }

    #[test]
    fn uninitialized_does_not_advance() {
        let mut cursor = ScanCursor::Uninitialized;
        cursor.advance(true, 5);
        assert_eq!(cursor, ScanCursor::Uninitialized);
    }
}
