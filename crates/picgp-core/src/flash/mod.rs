//! High-level flash operations
//!
//! Everything here drives a [`ProgrammingSession`](crate::session::ProgrammingSession)
//! through whole cycles: enter programming mode, do the work, leave
//! programming mode. Retry and abort decisions are made here and nowhere
//! else.

mod operations;
mod plan;
mod progress;

pub use operations::{
    erase, program, read_memory, verify, FlashReport, ProgramOptions, DEFAULT_RETRIES,
};
pub use plan::{ErasePlan, WordRun, WritePlan};
pub use progress::{FlashProgress, NoProgress};
