#![allow(clippy::module_name_repetitions)]
//! Terminal color policy and the stderr one-liners used for progress.
//!
//! Precedence: `NO_COLOR`, then `--color`, then `VDS_COLOR`, then whether the stream is a TTY.
//! Precompute once per scope and reuse:
//!     let use_err = vds_provisioner::color_enabled_stderr();
//! Machine-readable output (`--json`) goes to stdout and is never painted.

use clap::ValueEnum;
use once_cell::sync::OnceCell;

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug, ValueEnum)]
pub enum ColorMode {
    Auto,
    Always,
    Never,
}

/// Palette for step outcomes and report values.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Tone {
    Info,
    Ok,
    Changed,
    Warn,
    Error,
    Value,
    Dim,
}

impl Tone {
    fn code(self) -> &'static str {
        match self {
            Tone::Info => "\x1b[36;1m",
            Tone::Ok => "\x1b[32m",
            Tone::Changed => "\x1b[33;1m",
            Tone::Warn => "\x1b[33m",
            Tone::Error => "\x1b[31;1m",
            Tone::Value => "\x1b[34;1m",
            Tone::Dim => "\x1b[2m",
        }
    }
}

static COLOR_MODE: OnceCell<ColorMode> = OnceCell::new();

/// First call wins; later calls are ignored.
pub fn set_color_mode(mode: ColorMode) {
    let _ = COLOR_MODE.set(mode);
}

fn parse_color_mode(s: &str) -> Option<ColorMode> {
    match s.trim().to_ascii_lowercase().as_str() {
        "auto" => Some(ColorMode::Auto),
        "always" | "on" | "true" | "yes" => Some(ColorMode::Always),
        "never" | "off" | "false" | "no" => Some(ColorMode::Never),
        _ => None,
    }
}

fn effective_mode(no_color: bool, cli: Option<ColorMode>, env: Option<&str>) -> ColorMode {
    if no_color {
        return ColorMode::Never;
    }
    cli.or_else(|| env.and_then(parse_color_mode))
        .unwrap_or(ColorMode::Auto)
}

fn enabled_for(is_tty: bool) -> bool {
    let env = std::env::var("VDS_COLOR").ok();
    // https://no-color.org/
    let no_color = std::env::var_os("NO_COLOR").is_some();
    match effective_mode(no_color, COLOR_MODE.get().copied(), env.as_deref()) {
        ColorMode::Always => true,
        ColorMode::Never => false,
        ColorMode::Auto => is_tty,
    }
}

pub fn color_enabled_stderr() -> bool {
    enabled_for(atty::is(atty::Stream::Stderr))
}

/// Wrap `s` in the tone's ANSI code when enabled; otherwise return it unchanged.
pub fn paint(enabled: bool, tone: Tone, s: &str) -> String {
    if enabled {
        format!("{}{s}\x1b[0m", tone.code())
    } else {
        s.to_string()
    }
}

pub fn log_info_stderr(use_color: bool, msg: &str) {
    eprintln!("{}", paint(use_color, Tone::Info, msg));
}

pub fn log_warn_stderr(use_color: bool, msg: &str) {
    eprintln!("{}", paint(use_color, Tone::Warn, msg));
}

pub fn log_error_stderr(use_color: bool, msg: &str) {
    eprintln!("{}", paint(use_color, Tone::Error, msg));
}

pub fn log_ok_stderr(use_color: bool, msg: &str) {
    eprintln!("{}", paint(use_color, Tone::Ok, msg));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_color_mode_aliases() {
        assert_eq!(parse_color_mode(" ON "), Some(ColorMode::Always));
        assert_eq!(parse_color_mode("no"), Some(ColorMode::Never));
        assert_eq!(parse_color_mode("auto"), Some(ColorMode::Auto));
        assert_eq!(parse_color_mode("sometimes"), None);
    }

    #[test]
    fn test_precedence() {
        assert_eq!(
            effective_mode(true, Some(ColorMode::Always), Some("always")),
            ColorMode::Never
        );
        assert_eq!(
            effective_mode(false, Some(ColorMode::Never), Some("always")),
            ColorMode::Never
        );
        assert_eq!(effective_mode(false, None, Some("on")), ColorMode::Always);
        assert_eq!(effective_mode(false, None, Some("bogus")), ColorMode::Auto);
    }

    #[test]
    fn test_paint_disabled_is_identity() {
        assert_eq!(paint(false, Tone::Error, "x"), "x");
        assert_eq!(paint(true, Tone::Error, "x"), "\x1b[31;1mx\x1b[0m");
    }
}
