use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::{Duration, Instant};

use crate::session::{CaptureReport, CaptureState, CaptureStatus};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UiMode {
    Auto,
    Plain,
    Pretty,
}

#[derive(Clone, Debug)]
pub struct Ui {
    mode: UiMode,
    is_tty: bool,
    disable_pretty: bool,
}

impl Ui {
    pub fn new(mode: UiMode, is_tty: bool, disable_pretty: bool) -> Self {
        Self {
            mode,
            is_tty,
            disable_pretty,
        }
    }

    pub fn from_args(ui_flag: Option<&str>, is_tty: bool, disable_pretty: bool) -> Self {
        let mode = match ui_flag {
            Some("plain") => UiMode::Plain,
            Some("pretty") => UiMode::Pretty,
            _ => UiMode::Auto,
        };
        Self::new(mode, is_tty, disable_pretty)
    }

    fn use_pretty(&self) -> bool {
        self.is_tty
            && match self.mode {
                UiMode::Pretty => true,
                UiMode::Auto => !self.disable_pretty,
                UiMode::Plain => false,
            }
    }

    pub fn stage(&self, name: &str) -> StageGuard {
        if self.use_pretty() {
            let spinner = ProgressBar::new_spinner();
            spinner.set_draw_target(ProgressDrawTarget::stderr());
            spinner.enable_steady_tick(Duration::from_millis(120));
            let style = ProgressStyle::with_template("{spinner} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner());
            spinner.set_style(style);
            spinner.set_message(format!("{name}…"));
            StageGuard::new(name.to_string(), Some(spinner))
        } else {
            eprintln!("==> {}", name);
            StageGuard::new(name.to_string(), None)
        }
    }

    /// One-line result for a finished capture.
    pub fn report(&self, report: &CaptureReport) {
        let ts = report
            .timestamp
            .map(|t| t.to_string())
            .unwrap_or_else(|| "-".to_string());
        let status = report.status();
        let mark = match status {
            CaptureStatus::Published => "✔",
            CaptureStatus::Degraded => "⚠",
            CaptureStatus::Errored | CaptureStatus::Rejected => "✘",
        };
        eprintln!(
            "{} capture {} #{}: {} (storage: {}, registration: {})",
            mark,
            ts,
            report.sequence_number,
            status,
            report.storage_id().unwrap_or("-"),
            report.registration_id().unwrap_or("-")
        );
        if let Some(err) = &report.error {
            eprintln!("  error: {}", err);
        }
        for warning in &report.warnings {
            eprintln!("  warning: {}", warning);
        }
    }
}

pub struct StageGuard {
    name: String,
    start: Instant,
    spinner: Option<ProgressBar>,
    failed: Option<String>,
}

impl StageGuard {
    fn new(name: String, spinner: Option<ProgressBar>) -> Self {
        Self {
            name,
            start: Instant::now(),
            spinner,
            failed: None,
        }
    }

    /// Marks the stage failed; the reason is shown when the guard drops.
    pub fn fail(&mut self, reason: impl Into<String>) {
        self.failed = Some(reason.into());
    }
}

impl Drop for StageGuard {
    fn drop(&mut self) {
        let elapsed = format_duration(self.start.elapsed());
        let message = match &self.failed {
            Some(reason) => format!("✘ {} ({}): {}", self.name, elapsed, reason),
            None => format!("✔ {} ({})", self.name, elapsed),
        };
        if let Some(spinner) = &self.spinner {
            spinner.finish_with_message(message);
        } else {
            eprintln!("{message}");
        }
    }
}

/// Maps controller state changes onto stage spinners.
pub struct CaptureProgress<'a> {
    ui: &'a Ui,
    current: Option<StageGuard>,
}

impl<'a> CaptureProgress<'a> {
    pub fn new(ui: &'a Ui) -> Self {
        Self { ui, current: None }
    }

    pub fn on_state(&mut self, state: CaptureState) {
        self.current = None;
        if !matches!(
            state,
            CaptureState::Idle | CaptureState::Done | CaptureState::Errored
        ) {
            self.current = Some(self.ui.stage(&state.to_string()));
        }
    }

    /// Closes the open stage, marking it failed if the capture did not finish cleanly.
    pub fn finish(mut self, report: &CaptureReport) {
        if let Some(guard) = self.current.as_mut() {
            match report.status() {
                CaptureStatus::Errored => guard.fail("failed"),
                CaptureStatus::Degraded => guard.fail("degraded"),
                _ => {}
            }
        }
        self.current = None;
    }
}

fn format_duration(duration: Duration) -> String {
    if duration.as_secs() >= 1 {
        format!("{:.2}s", duration.as_secs_f64())
    } else {
        format!("{}ms", duration.as_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_render_compactly() {
        assert_eq!(format_duration(Duration::from_millis(250)), "250ms");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.50s");
    }

    #[test]
    fn plain_mode_never_uses_spinners() {
        let ui = Ui::from_args(Some("plain"), true, false);
        assert!(!ui.use_pretty());
        let ui = Ui::from_args(Some("pretty"), false, false);
        assert!(!ui.use_pretty());
        let ui = Ui::from_args(None, true, false);
        assert!(ui.use_pretty());
    }
}
