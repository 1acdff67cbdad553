//! Line classification for Grbl's unframed, line-oriented wire protocol.
//!
//! `Classifier` is pure: it owns a small accumulation buffer and a
//! help/normal mode flag, but performs no I/O and knows nothing about flow
//! control or budgets.

use regex::Regex;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    Empty,
    Startup,
    Response,
    Push,
    Status,
    Multiline,
    MultilineDone,
    Alarm,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Normal,
    Help,
}

pub struct Classifier {
    buffer: Vec<String>,
    mode: Mode,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new()
    }
}

fn version_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"Grbl (\d+)\.(\d+)([a-z])").unwrap())
}

impl Classifier {
    pub fn new() -> Self {
        Classifier {
            buffer: Vec::new(),
            mode: Mode::Normal,
        }
    }

    /// Classify one received line (newline already stripped) and update the
    /// accumulation buffer accordingly. Recognition order matters: the
    /// first matching rule wins.
    ///
    /// Note: a `<...>` status frame returns [`LineKind::Startup`], not
    /// [`LineKind::Status`]. The reference classifier's status branch
    /// literally returns its Startup type; this reproduces that byte-for-byte
    /// against logs captured against the original mediator.
    /// `LineKind::Status` exists and is handled in `FlowController`'s
    /// reaction table as the corrected contract, but `classify` never
    /// actually produces it.
    pub fn classify(&mut self, line: &str) -> LineKind {
        if line.is_empty() {
            return LineKind::Empty;
        }

        if line.starts_with("ALARM") {
            self.buffer.clear();
            self.buffer.push(line.to_string());
            self.mode = Mode::Normal;
            return LineKind::Alarm;
        }

        if line.starts_with("Grbl") {
            self.buffer.clear();
            self.buffer.push(line.to_string());
            self.mode = Mode::Normal;
            return LineKind::Startup;
        }

        if line.starts_with('[') && line.ends_with(']') {
            if self.mode == Mode::Help {
                self.buffer.push(line.to_string());
                return LineKind::Multiline;
            }
            self.buffer.clear();
            self.buffer.push(line.to_string());
            self.mode = Mode::Normal;
            return LineKind::Push;
        }

        if line.starts_with('<') && line.ends_with('>') {
            self.buffer.clear();
            self.buffer.push(line.to_string());
            return LineKind::Startup;
        }

        if line.starts_with("ok") || line.starts_with("error:") {
            self.buffer.push(line.to_string());
            if self.mode == Mode::Help {
                self.mode = Mode::Normal;
                return LineKind::MultilineDone;
            }
            self.buffer.truncate(1);
            return LineKind::Response;
        }

        self.buffer.push(line.to_string());
        if self.mode == Mode::Help {
            LineKind::Multiline
        } else {
            LineKind::Unknown
        }
    }

    /// Switch into multiline-collection mode. Called by the flow controller
    /// right after it transmits a request whose flags mark it `Multiline`.
    pub fn start_multiline(&mut self) {
        self.mode = Mode::Help;
    }

    /// Drain and return everything accumulated since the last `dump`/`reset`.
    pub fn dump(&mut self) -> Vec<String> {
        std::mem::take(&mut self.buffer)
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    /// Parse a Grbl startup banner's version triple. A value that fails to
    /// parse as a number (only possible via numeric overflow, since the
    /// pattern only captures digits) yields zero rather than propagating an
    /// error -- this mirrors the protocol's original silent-fallback
    /// behavior on unparseable version text.
    pub fn version(line: &str) -> (u32, u32, char) {
        match version_re().captures(line) {
            Some(caps) => {
                let major = caps[1].parse().unwrap_or(0);
                let minor = caps[2].parse().unwrap_or(0);
                let sub = caps[3].chars().next().unwrap_or('\0');
                (major, minor, sub)
            }
            None => (0, 0, '\0'),
        }
    }
}
