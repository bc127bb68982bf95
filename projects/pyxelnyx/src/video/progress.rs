use indicatif::{ProgressBar, ProgressStyle};

/// Receives per-frame progress from the video pipeline.
pub trait ProgressObserver {
    fn on_start(&self, _total: u64) {}
    fn on_progress(&self, current: u64, total: u64);
    fn on_finish(&self) {}
}

/// Blanket implementation so any `Fn(current, total)` closure can observe.
impl<F> ProgressObserver for F
where
    F: Fn(u64, u64),
{
    fn on_progress(&self, current: u64, total: u64) {
        self(current, total)
    }
}

pub struct NoopProgress;

impl ProgressObserver for NoopProgress {
    fn on_progress(&self, _current: u64, _total: u64) {}
}

/// Terminal progress bar.
pub struct IndicatifProgress {
    pb: ProgressBar,
}

impl IndicatifProgress {
    pub fn new() -> Self {
        let pb = ProgressBar::new(0);
        if let Ok(style) = ProgressStyle::default_bar().template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec:.1.yellow} fps, {eta})",
        ) {
            pb.set_style(style.progress_chars("#>-"));
        }
        Self { pb }
    }
}

impl Default for IndicatifProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressObserver for IndicatifProgress {
    fn on_start(&self, total: u64) {
        self.pb.reset();
        self.pb.set_length(total);
    }

    fn on_progress(&self, current: u64, total: u64) {
        if total > self.pb.length().unwrap_or(0) {
            self.pb.set_length(total);
        }
        self.pb.set_position(current);
    }

    fn on_finish(&self) {
        self.pb.finish_with_message("Done");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn test_closure_observer() {
        let seen = RefCell::new(Vec::new());
        let observer = |current: u64, total: u64| seen.borrow_mut().push((current, total));
        observer.on_start(2);
        observer.on_progress(1, 2);
        observer.on_progress(2, 2);
        observer.on_finish();
        assert_eq!(*seen.borrow(), vec![(1, 2), (2, 2)]);
    }

    #[test]
    fn test_indicatif_tracks_position() {
        let progress = IndicatifProgress::new();
        progress.on_start(10);
        progress.on_progress(4, 10);
        assert_eq!(progress.pb.position(), 4);
        progress.on_progress(12, 12);
        assert_eq!(progress.pb.length(), Some(12));
        progress.on_finish();
    }
}
