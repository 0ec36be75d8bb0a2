//! Progress display for bucket-backup
//!
//! With the `progress` feature disabled every method is a no-op, so callers
//! never need their own `cfg` checks.

#[cfg(feature = "progress")]
use indicatif::{ProgressBar, ProgressStyle};

#[derive(Clone)]
pub struct Progress {
    #[cfg(feature = "progress")]
    bar: ProgressBar,
}

impl Progress {
    /// Spinner counting scanned entries while the tree is walked.
    #[cfg(feature = "progress")]
    pub fn scan() -> Self {
        let bar = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("[Scanning {elapsed_precise}] {pos} entries {msg}") {
            bar.set_style(style);
        }
        Progress { bar }
    }

    /// Bar over `len` upload/delete actions.
    #[cfg(feature = "progress")]
    pub fn transfer(len: u64) -> Self {
        let bar = ProgressBar::new(len);
        if let Ok(style) = ProgressStyle::with_template(
            "[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {percent}% ETA:{eta} {msg}",
        ) {
            bar.set_style(style.progress_chars("=> "));
        }
        Progress { bar }
    }

    /// Silent progress, for tests and `--quiet` runs.
    #[cfg(feature = "progress")]
    pub fn hidden() -> Self {
        Progress {
            bar: ProgressBar::hidden(),
        }
    }

    #[cfg(feature = "progress")]
    pub fn inc(&self, msg: &str) {
        self.bar.inc(1);
        self.bar.set_message(msg.to_string());
    }

    #[cfg(feature = "progress")]
    pub fn position(&self) -> u64 {
        self.bar.position()
    }

    #[cfg(feature = "progress")]
    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }

    #[cfg(not(feature = "progress"))]
    pub fn scan() -> Self {
        Progress {}
    }

    #[cfg(not(feature = "progress"))]
    pub fn transfer(_len: u64) -> Self {
        Progress {}
    }

    #[cfg(not(feature = "progress"))]
    pub fn hidden() -> Self {
        Progress {}
    }

    #[cfg(not(feature = "progress"))]
    pub fn inc(&self, _msg: &str) {}

    #[cfg(not(feature = "progress"))]
    pub fn position(&self) -> u64 {
        0
    }

    #[cfg(not(feature = "progress"))]
    pub fn finish(&self) {}

    /// Tick once per record pulled from `records`, without buffering them.
    pub fn track<I>(self, records: I) -> impl Iterator<Item = I::Item>
    where
        I: Iterator<Item = crate::walk::FileRecord>,
    {
        let mut records = records;
        let mut done = false;
        std::iter::from_fn(move || {
            if done {
                return None;
            }
            match records.next() {
                Some(record) => {
                    self.inc(&record.key());
                    Some(record)
                }
                None => {
                    done = true;
                    self.finish();
                    None
                }
            }
        })
    }
}
