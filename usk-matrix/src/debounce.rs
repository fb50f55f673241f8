//! Per-key debounce logic.
//!
//! Each key has a counter that must reach the configured threshold of
//! consecutive readings that disagree with the debounced state before that
//! state changes. The threshold counts scan cycles, not time, so the
//! effective debounce window is threshold × poll period.

use crate::config::{MAX_COLS, MAX_ROWS};
use crate::matrix::RowBits;

pub struct Debouncer {
    threshold: u8,
    rows: usize,
    cols: usize,
    /// Debounced key states, bit set = pressed.
    stable: [RowBits; MAX_ROWS],
    /// Per-key counters tracking consecutive raw readings that differ from debounced state.
    counters: [[u8; MAX_COLS]; MAX_ROWS],
}

impl Debouncer {
    pub const fn new(rows: usize, cols: usize, threshold: u8) -> Self {
        Self {
            threshold,
            rows: if rows < MAX_ROWS { rows } else { MAX_ROWS },
            cols: if cols < MAX_COLS { cols } else { MAX_COLS },
            stable: [0; MAX_ROWS],
            counters: [[0; MAX_COLS]; MAX_ROWS],
        }
    }

    /// Feed one raw sample for `row`. Returns the bits whose debounced
    /// state flipped.
    pub fn update_row(&mut self, row: usize, raw: RowBits) -> RowBits {
        if row >= self.rows {
            return 0;
        }

        let mut flipped = 0;
        for col in 0..self.cols {
            let bit = 1 << col;
            let counter = &mut self.counters[row][col];

            if raw & bit == self.stable[row] & bit {
                // Raw matches debounced state, reset counter
                *counter = 0;
            } else {
                *counter = counter.saturating_add(1);
                if *counter >= self.threshold {
                    self.stable[row] ^= bit;
                    *counter = 0;
                    flipped |= bit;
                }
            }
        }

        flipped
    }

    /// Debounced state of `row`, bit set = pressed.
    pub fn stable_row(&self, row: usize) -> RowBits {
        if row < self.rows {
            self.stable[row]
        } else {
            0
        }
    }

    pub fn stable(&self) -> &[RowBits] {
        &self.stable[..self.rows]
    }

    #[cfg(test)]
    fn counter(&self, row: usize, col: usize) -> u8 {
        self.counters[row][col]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_press_needs_threshold_samples() {
        let mut debouncer = Debouncer::new(4, 5, 5);
        for _ in 0..4 {
            assert_eq!(debouncer.update_row(0, 0b1), 0);
        }
        assert_eq!(debouncer.stable_row(0), 0);
        assert_eq!(debouncer.update_row(0, 0b1), 0b1);
        assert_eq!(debouncer.stable_row(0), 0b1);
        assert_eq!(debouncer.counter(0, 0), 0);
    }

    #[test]
    fn test_chatter_resets_counter() {
        let mut debouncer = Debouncer::new(1, 1, 3);
        debouncer.update_row(0, 1);
        debouncer.update_row(0, 1);
        assert_eq!(debouncer.counter(0, 0), 2);

        // One agreeing sample throws the progress away
        debouncer.update_row(0, 0);
        assert_eq!(debouncer.counter(0, 0), 0);

        debouncer.update_row(0, 1);
        debouncer.update_row(0, 1);
        assert_eq!(debouncer.stable_row(0), 0);
        assert_eq!(debouncer.update_row(0, 1), 1);
    }

    #[test]
    fn test_keys_are_independent() {
        let mut debouncer = Debouncer::new(2, 3, 2);
        // Column 0 held steadily, column 2 chatters
        debouncer.update_row(1, 0b101);
        let flipped = debouncer.update_row(1, 0b001);
        assert_eq!(flipped, 0b001);
        assert_eq!(debouncer.stable_row(1), 0b001);
        assert_eq!(debouncer.stable_row(0), 0);
    }

    #[test]
    fn test_release_is_debounced_too() {
        let mut debouncer = Debouncer::new(1, 2, 2);
        debouncer.update_row(0, 0b10);
        debouncer.update_row(0, 0b10);
        assert_eq!(debouncer.stable_row(0), 0b10);

        assert_eq!(debouncer.update_row(0, 0), 0);
        assert_eq!(debouncer.update_row(0, 0), 0b10);
        assert_eq!(debouncer.stable_row(0), 0);
    }

    #[test]
    fn test_threshold_one_flips_immediately() {
        let mut debouncer = Debouncer::new(1, 4, 1);
        assert_eq!(debouncer.update_row(0, 0b1010), 0b1010);
        assert_eq!(debouncer.stable(), &[0b1010]);
    }

    #[test]
    fn test_bits_beyond_columns_are_ignored() {
        let mut debouncer = Debouncer::new(1, 2, 1);
        assert_eq!(debouncer.update_row(0, 0b1111), 0b11);
        assert_eq!(debouncer.update_row(5, 0b1), 0);
    }
}
