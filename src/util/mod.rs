#![allow(clippy::module_name_repetitions)]
//! Small utilities: shell escaping and in-place editing of `key = value` style config files.

pub mod exec;
pub mod fs;
pub mod id;

pub use exec::{CommandRunner, ExecOutput, ExecRequest, ExecService, ScriptedRunner};
pub use fs::HostFs;

/// Reject strings containing newline, carriage return, or NUL before embedding into a config line.
pub fn reject_newlines(s: &str, what: &str) -> Result<(), String> {
    if s.contains('\n') || s.contains('\r') || s.contains('\0') {
        Err(format!("refusing to write {what}: contains newline"))
    } else {
        Ok(())
    }
}

pub fn shell_join(args: &[String]) -> String {
    args.iter()
        .map(|a| shell_escape(a))
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn shell_escape(s: &str) -> String {
    if s.is_empty() {
        "''".to_string()
    } else if s
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "-_=./:@,+".contains(c))
    {
        s.to_string()
    } else {
        let escaped = s.replace('\'', "'\"'\"'");
        format!("'{}'", escaped)
    }
}

/// How a directive is written back by [`set_directive`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectiveStyle {
    /// `key = value` (php.ini, php-fpm pools, my.cnf)
    Equals,
    /// `-k value` (memcached.conf option lines)
    Flag,
    /// `KEY=value` (dotenv files)
    Assign,
}

fn directive_key(line: &str, style: DirectiveStyle) -> Option<&str> {
    let t = line.trim_start();
    let t = t.strip_prefix(';').or_else(|| t.strip_prefix('#')).unwrap_or(t);
    let t = t.trim_start();
    match style {
        DirectiveStyle::Equals | DirectiveStyle::Assign => t.split_once('=').map(|(k, _)| k.trim()),
        DirectiveStyle::Flag => t.split_whitespace().next(),
    }
}

fn is_commented(line: &str) -> bool {
    let t = line.trim_start();
    t.starts_with(';') || t.starts_with('#')
}

/// Set `key` to `value`, the way `sed -i 's/^;\?key = .*/key = value/'` does in provisioning scripts.
///
/// An active line wins over a commented one; if neither exists the directive is appended.
/// Only the first matching line is rewritten.
pub fn set_directive(contents: &str, key: &str, value: &str, style: DirectiveStyle) -> String {
    let rendered = match style {
        DirectiveStyle::Equals => format!("{key} = {value}"),
        DirectiveStyle::Flag => format!("{key} {value}"),
        DirectiveStyle::Assign => format!("{key}={value}"),
    };
    let mut lines: Vec<String> = contents.lines().map(str::to_string).collect();
    let matches = |l: &String| directive_key(l, style) == Some(key);
    let target = lines
        .iter()
        .position(|l| matches(l) && !is_commented(l))
        .or_else(|| lines.iter().position(matches));
    match target {
        Some(i) => lines[i] = rendered,
        None => lines.push(rendered),
    }
    let mut out = lines.join("\n");
    out.push('\n');
    out
}

/// Read the active value of `key`, ignoring commented lines.
pub fn get_directive(contents: &str, key: &str, style: DirectiveStyle) -> Option<String> {
    contents
        .lines()
        .filter(|l| !is_commented(l))
        .find(|l| directive_key(l, style) == Some(key))
        .map(|l| match style {
            DirectiveStyle::Equals | DirectiveStyle::Assign => l
                .split_once('=')
                .map(|(_, v)| v.trim().to_string())
                .unwrap_or_default(),
            DirectiveStyle::Flag => l
                .trim()
                .split_once(char::is_whitespace)
                .map(|(_, v)| v.trim().to_string())
                .unwrap_or_default(),
        })
}
