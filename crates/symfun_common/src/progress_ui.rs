use std::{borrow::Cow, time::Duration};

use crate::util::progress_logger::{ProgressLogger, ProgressSession};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum ProgressMode {
    #[default]
    Hidden,
    Visible,
}

/// A progress bar on stderr for one rewrite stage.
#[derive(Clone, Debug)]
pub struct StageBar {
    stage: String,
}

/// `None` in hidden mode, so callers drive an inactive session instead of a bar.
pub fn bar(mode: ProgressMode, stage: impl ToString) -> Option<StageBar> {
    match mode {
        ProgressMode::Hidden => None,
        ProgressMode::Visible => Some(StageBar {
            stage: stage.to_string(),
        }),
    }
}

#[derive(Clone, Debug)]
pub struct StageBarSession {
    bar: indicatif::ProgressBar,
}

impl ProgressLogger for StageBar {
    type Session = StageBarSession;

    fn start_session(self, iterations: Option<usize>) -> Self::Session {
        let bar = match iterations {
            Some(iterations) => indicatif::ProgressBar::new(iterations as u64),
            None => indicatif::ProgressBar::new_spinner(),
        };
        let template = match iterations {
            Some(_) => "{spinner:.green} [{elapsed_precise}] [{bar:.green/white}] {pos}/{len} {msg}",
            None => "{spinner:.green} [{elapsed_precise}] {pos} {msg}",
        };
        if let Ok(style) = indicatif::ProgressStyle::default_bar().template(template) {
            bar.set_style(style.progress_chars("=> "));
        }
        bar.set_message(Cow::Owned(self.stage));
        bar.enable_steady_tick(Duration::from_millis(100));
        StageBarSession { bar }
    }
}

impl ProgressSession for StageBarSession {
    fn update(&mut self, iterations: usize) {
        self.bar.inc(iterations as u64);
    }

    fn finish(self) {
        self.bar.finish_and_clear();
    }
}
