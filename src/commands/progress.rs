//! Progress reporting with indicatif

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use picgp_core::flash::{FlashProgress, FlashReport};
use std::time::Duration;

/// Create a progress bar with custom phase message
fn create_progress_bar_with_phase(
    total: u64,
    phase: &str,
) -> Result<ProgressBar, Box<dyn std::error::Error>> {
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(&format!(
                "{{spinner:.green}} [{{elapsed_precise}}] [{{bar:40.cyan/blue}}] {{pos}}/{{len}} words ({{per_sec}}, {{eta}}) {}",
                phase
            ))?
            .progress_chars("#>-"),
    );
    Ok(pb)
}

/// Create a standard spinner style
fn create_spinner_style() -> Result<ProgressStyle, Box<dyn std::error::Error>> {
    Ok(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?)
}

/// Progress reporter using indicatif progress bars
pub struct IndicatifProgress {
    multi: MultiProgress,
    current_bar: Option<ProgressBar>,
    phase: &'static str,
}

impl IndicatifProgress {
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            current_bar: None,
            phase: "",
        }
    }

    fn create_bar(&mut self, total: u64, phase: &'static str) {
        self.finish_current();
        self.phase = phase;
        let pb = self.multi.add(
            create_progress_bar_with_phase(total, phase)
                .unwrap_or_else(|_| ProgressBar::new(total)),
        );
        self.current_bar = Some(pb);
    }

    fn create_spinner(&mut self, message: String) {
        self.finish_current();
        let pb = self.multi.add(ProgressBar::new_spinner());
        pb.set_style(create_spinner_style().unwrap_or_else(|_| ProgressStyle::default_spinner()));
        pb.set_message(message);
        pb.enable_steady_tick(Duration::from_millis(100));
        self.current_bar = Some(pb);
    }

    fn finish_current(&mut self) {
        if let Some(pb) = self.current_bar.take() {
            pb.finish_with_message(format!("{} complete", self.phase));
        }
    }

    /// Stop the current bar after a failure
    pub fn abandon(&mut self) {
        if let Some(pb) = self.current_bar.take() {
            pb.abandon_with_message(format!("{} failed", self.phase));
        }
    }
}

impl Default for IndicatifProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl FlashProgress for IndicatifProgress {
    fn reading(&mut self, total_words: usize) {
        self.create_bar(total_words as u64, "Reading");
    }

    fn read_progress(&mut self, words_read: usize) {
        if let Some(pb) = &self.current_bar {
            pb.set_position(words_read as u64);
        }
    }

    fn erasing(&mut self, blocks_to_erase: usize) {
        self.create_spinner(format!("Erasing {} block(s)...", blocks_to_erase));
        self.phase = "Erase";
    }

    fn erase_progress(&mut self, blocks_erased: usize) {
        if let Some(pb) = &self.current_bar {
            pb.set_message(format!("Erased {} block(s)...", blocks_erased));
        }
    }

    fn writing(&mut self, words_to_write: usize) {
        self.create_bar(words_to_write as u64, "Writing");
    }

    fn write_progress(&mut self, words_written: usize) {
        if let Some(pb) = &self.current_bar {
            pb.set_position(words_written as u64);
        }
    }

    fn retry(&mut self, address: u32, attempt: u32) {
        let message = format!("Rewriting 0x{:04X} (attempt {})", address, attempt + 1);
        match &self.current_bar {
            Some(pb) => pb.println(message),
            None => println!("{}", message),
        }
    }

    fn complete(&mut self, _report: &FlashReport) {
        self.finish_current();
    }
}
