// Terminal output: per-upload progress bars and the optional confirmation
// prompt shown before anything is sent.
//
// Bars are drawn on stderr through one shared `MultiProgress`, so result lines
// printed on stdout are written with the bars suspended.

use crate::job::JobSummary;
use anyhow::{Context, Result};
use dialoguer::Confirm;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};

const UPLOAD_TEMPLATE: &str = "{msg} [{bar:30.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec})";

/// Shared handle for drawing upload bars; cheap to clone across workers.
#[derive(Clone)]
pub struct ProgressDisplay {
    bars: MultiProgress,
}

impl ProgressDisplay {
    /// Bars on stderr (hidden automatically when stderr is not a terminal).
    pub fn stderr() -> Self {
        Self {
            bars: MultiProgress::with_draw_target(ProgressDrawTarget::stderr()),
        }
    }

    /// Never draws anything; result lines are still printed.
    pub fn hidden() -> Self {
        Self {
            bars: MultiProgress::with_draw_target(ProgressDrawTarget::hidden()),
        }
    }

    /// Byte counter for one upload of `length` bytes.
    pub fn upload_bar(&self, length: u64, label: &str) -> ProgressBar {
        let style = ProgressStyle::with_template(UPLOAD_TEMPLATE)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> ");
        let bar = self.bars.add(ProgressBar::new(length));
        bar.set_style(style);
        bar.set_message(format!("Uploading {label}"));
        bar
    }

    pub fn finish(&self, bar: &ProgressBar) {
        bar.finish_and_clear();
        self.bars.remove(bar);
    }

    /// Print a result line on stdout without tearing the bars.
    pub fn println(&self, line: &str) {
        self.bars.suspend(|| println!("{line}"));
    }
}

/// Show every planned request and ask whether to go ahead.
pub fn confirm_jobs(summaries: &[JobSummary]) -> Result<bool> {
    for summary in summaries {
        let rendered =
            serde_json::to_string_pretty(summary).context("Failed to render request summary")?;
        eprintln!("{rendered}");
    }
    Confirm::new()
        .with_prompt(format!("Send {} request(s)?", summaries.len()))
        .default(false)
        .interact()
        .context("Failed to read confirmation")
}
