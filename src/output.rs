//! Terminal rendering for speech runs and conversations.
//!
//! Progress and previews go to stderr so stdout stays clean for replies and
//! machine-readable output.

use crate::tts::registry::BackendStatus;
use crate::tts::stats::PipelineRunStats;
use std::io::{self, Write};

const DIM: &str = "\x1b[2m";
const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const RED: &str = "\x1b[31m";
const RESET: &str = "\x1b[0m";

const BAR_WIDTH: usize = 20;
/// Preview lines longer than this are cut with an ellipsis.
const PREVIEW_WIDTH: usize = 60;

/// Clear the current terminal line (replaces the progress bar).
pub fn clear_line() {
    eprint!("\r\x1b[2K");
}

/// `[#####---------------]  25%` for a fraction in [0, 1].
pub fn format_progress_bar(fraction: f32, width: usize) -> String {
    let fraction = if fraction.is_finite() {
        fraction.clamp(0.0, 1.0)
    } else {
        0.0
    };
    let filled = (fraction * width as f32).round() as usize;
    format!(
        "[{}{}] {:>3}%",
        "#".repeat(filled),
        "-".repeat(width - filled),
        (fraction * 100.0).round() as u32
    )
}

/// Redraws the progress line in place.
pub fn render_progress(fraction: f32, message: &str) {
    let bar = format_progress_bar(fraction, BAR_WIDTH);
    eprint!("\r\x1b[2K{bar} {DIM}{message}{RESET}");
    io::stderr().flush().ok();
}

/// Shortens `text` to `width` characters, ending in `…` when cut.
pub fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        return text.to_string();
    }
    let kept: String = text.chars().take(width.saturating_sub(1)).collect();
    format!("{kept}…")
}

/// Numbered preview lines for the first chunks of a run.
pub fn format_preview(preview: &[String], total_chunks: usize) -> Vec<String> {
    let mut lines: Vec<String> = preview
        .iter()
        .enumerate()
        .map(|(i, chunk)| format!("  {}. {}", i + 1, truncate(chunk, PREVIEW_WIDTH)))
        .collect();
    if total_chunks > preview.len() {
        lines.push(format!("  … {} more", total_chunks - preview.len()));
    }
    lines
}

pub fn render_preview(preview: &[String], total_chunks: usize) {
    if preview.is_empty() {
        return;
    }
    eprintln!("{DIM}Speaking {total_chunks} chunk(s):{RESET}");
    for line in format_preview(preview, total_chunks) {
        eprintln!("{DIM}{line}{RESET}");
    }
}

/// Final report after a run.
pub fn render_run_stats(stats: &PipelineRunStats) {
    clear_line();
    let missing = stats.total_chunks.saturating_sub(stats.played_count);
    let color = if missing == 0 { GREEN } else { YELLOW };
    eprintln!(
        "{color}Played {}/{} chunks{RESET}",
        stats.played_count, stats.total_chunks
    );
    eprintln!("{DIM}{stats}{RESET}");
}

/// One line per backend: marker, kind, id, note.
pub fn format_backend_line(status: &BackendStatus) -> String {
    let (marker, color) = if status.available {
        ("●", GREEN)
    } else {
        ("○", RED)
    };
    let note = status
        .note
        .as_ref()
        .map(|n| format!(" {DIM}({n}){RESET}"))
        .unwrap_or_default();
    format!(
        "  {color}{marker}{RESET} {:<12} {}{note}",
        status.kind, status.id
    )
}

pub fn render_backends(statuses: &[BackendStatus]) {
    for status in statuses {
        println!("{}", format_backend_line(status));
    }
}
