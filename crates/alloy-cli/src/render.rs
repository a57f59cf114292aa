use std::time::Duration;

use anstyle::{AnsiColor, Effects, Style};
use indicatif::{ProgressBar, ProgressStyle};

use alloy_ledger::DiagStatus;

pub fn status_glyph(status: DiagStatus) -> &'static str {
    match status {
        DiagStatus::Ok => "✓",
        DiagStatus::Warning => "⚠",
        DiagStatus::Error => "✗",
    }
}

fn status_style(status: DiagStatus) -> Style {
    let color = match status {
        DiagStatus::Ok => AnsiColor::Green,
        DiagStatus::Warning => AnsiColor::Yellow,
        DiagStatus::Error => AnsiColor::Red,
    };
    Style::new().fg_color(Some(color.into())).effects(Effects::BOLD)
}

/// A diagnostic line with a coloured status glyph.
pub fn status_line(status: DiagStatus, message: &str) -> String {
    format!("{} {message}", colorize(status_style(status), status_glyph(status)))
}

fn colorize(style: Style, text: &str) -> String {
    format!("{}{}{}", style.render(), text, style.render_reset())
}

/// A steady-tick spinner for long-running phases; hidden when stderr is
/// not a terminal.
pub fn phase_spinner(label: &str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan.bold} {msg}") {
        spinner.set_style(style);
    }
    spinner.set_message(label.to_string());
    spinner.enable_steady_tick(Duration::from_millis(80));
    spinner
}
