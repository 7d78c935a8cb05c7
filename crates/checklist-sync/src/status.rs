//! User-facing status messages emitted on every reconciler transition.

use std::fmt;
use std::sync::mpsc;

const MAX_STATUS_CHARS: usize = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusLevel {
    Info,
    Success,
    Warning,
    Error,
}

impl fmt::Display for StatusLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Info => "INFO",
            Self::Success => "OK",
            Self::Warning => "WARN",
            Self::Error => "ERROR",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEvent {
    pub level: StatusLevel,
    pub message: String,
}

pub trait StatusSink: Send + Sync {
    fn emit(&self, ev: StatusEvent);
}

#[derive(Debug, Default)]
pub struct StdoutSink;

impl StatusSink for StdoutSink {
    fn emit(&self, ev: StatusEvent) {
        println!("{}: {}", ev.level, ev.message);
    }
}

#[derive(Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<StatusEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<StatusEvent>) -> Self {
        Self { tx }
    }
}

impl StatusSink for ChannelSink {
    fn emit(&self, ev: StatusEvent) {
        let _ = self.tx.send(ev);
    }
}

pub(crate) fn emit(sink: &dyn StatusSink, level: StatusLevel, message: impl AsRef<str>) {
    let message = sanitize_status_text(message.as_ref());
    match level {
        StatusLevel::Error => tracing::error!(status = %message),
        StatusLevel::Warning => tracing::warn!(status = %message),
        _ => tracing::debug!(status = %message),
    }
    sink.emit(StatusEvent { level, message });
}

enum EscapeMode {
    Esc,
    Csi,
    Osc,
    OscEsc,
    // DCS, SOS, PM and APC run until the string terminator `ESC \`.
    StTerminated,
    StEsc,
}

/// Flattens text to a single terminal-safe line: escape sequences and control
/// characters are dropped, line breaks become spaces, long text is cut.
pub fn sanitize_status_text(input: &str) -> String {
    let mut out = String::with_capacity(input.len().min(MAX_STATUS_CHARS));
    let mut esc_mode: Option<EscapeMode> = None;
    let mut count = 0usize;

    for c in input.chars() {
        if let Some(mode) = esc_mode.take() {
            esc_mode = match mode {
                EscapeMode::Esc => match c {
                    '[' => Some(EscapeMode::Csi),
                    ']' => Some(EscapeMode::Osc),
                    'P' | 'X' | '^' | '_' => Some(EscapeMode::StTerminated),
                    _ => None,
                },
                EscapeMode::Csi if ('@'..='~').contains(&c) => None,
                EscapeMode::Csi => Some(EscapeMode::Csi),
                EscapeMode::Osc => match c {
                    '\x07' => None,
                    '\x1b' => Some(EscapeMode::OscEsc),
                    _ => Some(EscapeMode::Osc),
                },
                EscapeMode::OscEsc => match c {
                    '\\' => None,
                    '\x1b' => Some(EscapeMode::OscEsc),
                    _ => Some(EscapeMode::Osc),
                },
                EscapeMode::StTerminated if c == '\x1b' => Some(EscapeMode::StEsc),
                EscapeMode::StTerminated => Some(EscapeMode::StTerminated),
                EscapeMode::StEsc => match c {
                    '\\' => None,
                    '\x1b' => Some(EscapeMode::StEsc),
                    _ => Some(EscapeMode::StTerminated),
                },
            };
            continue;
        }
        if c == '\x1b' {
            esc_mode = Some(EscapeMode::Esc);
            continue;
        }

        let mapped = match c {
            '\n' | '\r' | '\t' => ' ',
            c if c.is_control() || is_bidi_control(c) => continue,
            c => c,
        };
        if mapped == ' ' && out.ends_with(' ') {
            continue;
        }
        if count == MAX_STATUS_CHARS {
            out.push_str("...");
            break;
        }
        out.push(mapped);
        count += 1;
    }

    out.trim().to_string()
}

fn is_bidi_control(c: char) -> bool {
    matches!(c, '\u{061C}' | '\u{200E}' | '\u{200F}')
        || ('\u{202A}'..='\u{202E}').contains(&c)
        || ('\u{2066}'..='\u{2069}').contains(&c)
}
