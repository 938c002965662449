//! Progress rendering for imports
//!
//! Starts as a spinner and turns into a bar once the provider reports a
//! total.

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

use crate::types::ProgressEvent;

fn spinner_style() -> Result<ProgressStyle> {
    Ok(ProgressStyle::default_spinner()
        .template("{spinner:.green} {msg} [{elapsed_precise}] {pos} records")?)
}

fn bar_style() -> Result<ProgressStyle> {
    Ok(ProgressStyle::default_bar()
        .template("{msg}\n{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} ({eta})")?
        .progress_chars("#>-"))
}

/// Terminal view of one import job
pub struct ImportProgress {
    bar: ProgressBar,
    message: String,
    sized: bool,
}

impl ImportProgress {
    pub fn new(message: &str) -> Result<Self> {
        let bar = ProgressBar::new_spinner();
        bar.set_style(spinner_style()?);
        bar.set_message(message.to_string());
        bar.enable_steady_tick(Duration::from_millis(100));
        Ok(Self {
            bar,
            message: message.to_string(),
            sized: false,
        })
    }

    /// Apply a progress event
    pub fn update(&mut self, event: &ProgressEvent) -> Result<()> {
        if let (false, Some(total)) = (self.sized, event.estimated_total) {
            self.bar.set_length(total);
            self.bar.set_style(bar_style()?);
            self.sized = true;
        }
        self.bar.set_position(event.processed_count);

        match &event.last_error {
            Some(error) => self
                .bar
                .set_message(format!("{} [{}] last error: {}", self.message, event.status, error)),
            None => self
                .bar
                .set_message(format!("{} [{}]", self.message, event.status)),
        }
        Ok(())
    }

    pub fn set_message(&mut self, message: &str) {
        self.message = message.to_string();
        self.bar.set_message(message.to_string());
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }

    pub fn position(&self) -> u64 {
        self.bar.position()
    }

    pub fn length(&self) -> Option<u64> {
        self.bar.length()
    }
}

/// Format a record count with thousands separators
pub fn format_count(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}
