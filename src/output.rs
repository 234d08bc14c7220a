use colored::Colorize;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use snapwire::streaming::SessionEvent;
use snapwire::upload::FileSnapshot;

struct FileBar {
    name: String,
    bar: ProgressBar,
    done: bool,
}

/// One progress bar per staged file, driven by session events.
pub struct UploadProgress {
    _multi: MultiProgress,
    bars: Vec<FileBar>,
    completed: usize,
    failed: usize,
}

impl UploadProgress {
    pub fn new(files: &[FileSnapshot]) -> Self {
        let multi = MultiProgress::new();
        let style = ProgressStyle::default_bar()
            .template("{prefix:>24.bold} [{bar:30.cyan/blue}] {pos:>3}% {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> ");

        let bars = files
            .iter()
            .map(|f| {
                let bar = multi.add(ProgressBar::new(100));
                bar.set_style(style.clone());
                bar.set_prefix(f.name.clone());
                bar.set_message(format_size(f.size));
                FileBar {
                    name: f.name.clone(),
                    bar,
                    done: false,
                }
            })
            .collect();

        Self {
            _multi: multi,
            bars,
            completed: 0,
            failed: 0,
        }
    }

    fn open_bar(&mut self, name: &str) -> Option<&mut FileBar> {
        self.bars.iter_mut().find(|b| b.name == name && !b.done)
    }

    pub fn apply(&mut self, event: &SessionEvent) {
        match event {
            SessionEvent::FileProgress { name, progress } => {
                if let Some(b) = self.open_bar(name) {
                    b.bar.set_position(*progress as u64);
                }
            }
            SessionEvent::FileCompleted { name } => {
                if let Some(b) = self.open_bar(name) {
                    b.done = true;
                    b.bar.set_position(100);
                    b.bar.finish_with_message("done".green().to_string());
                    self.completed += 1;
                }
            }
            SessionEvent::FileFailed { name, error } => {
                if let Some(b) = self.open_bar(name) {
                    b.done = true;
                    b.bar.abandon_with_message(error.red().to_string());
                    self.failed += 1;
                }
            }
            SessionEvent::BatchFinished { .. } => {}
        }
    }

    /// Every bar is finished but at least one file failed, so the batch
    /// cannot complete.
    pub fn stuck(&self) -> bool {
        self.failed > 0 && self.completed + self.failed == self.bars.len()
    }

    pub fn failed(&self) -> usize {
        self.failed
    }

    pub fn abandon(&self) {
        for b in self.bars.iter().filter(|b| !b.done) {
            b.bar.abandon_with_message("interrupted".yellow().to_string());
        }
    }
}

fn format_size(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    let b = bytes as f64;
    if b >= KB * KB * KB {
        format!("{:.1} GB", b / (KB * KB * KB))
    } else if b >= KB * KB {
        format!("{:.1} MB", b / (KB * KB))
    } else if b >= KB {
        format!("{:.1} KB", b / KB)
    } else {
        format!("{} B", bytes)
    }
}
