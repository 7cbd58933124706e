//! Progress reporting for long-running flash operations

use super::FlashReport;

/// Progress callback for flash operations
pub trait FlashProgress {
    /// Called when starting to read back or dump words
    fn reading(&mut self, total_words: usize);

    /// Called to update read progress
    fn read_progress(&mut self, words_read: usize);

    /// Called when starting erase operations (rows, or 1 for a bulk erase)
    fn erasing(&mut self, blocks_to_erase: usize);

    /// Called after each erase
    fn erase_progress(&mut self, blocks_erased: usize);

    /// Called when starting write operations
    fn writing(&mut self, words_to_write: usize);

    /// Called to update write progress
    fn write_progress(&mut self, words_written: usize);

    /// Called before a word is rewritten after a verify mismatch
    fn retry(&mut self, address: u32, attempt: u32);

    /// Called when the operation is complete
    fn complete(&mut self, report: &FlashReport);
}

/// A no-op progress reporter
pub struct NoProgress;

impl FlashProgress for NoProgress {
    fn reading(&mut self, _total_words: usize) {}
    fn read_progress(&mut self, _words_read: usize) {}
    fn erasing(&mut self, _blocks_to_erase: usize) {}
    fn erase_progress(&mut self, _blocks_erased: usize) {}
    fn writing(&mut self, _words_to_write: usize) {}
    fn write_progress(&mut self, _words_written: usize) {}
    fn retry(&mut self, _address: u32, _attempt: u32) {}
    fn complete(&mut self, _report: &FlashReport) {}
}
