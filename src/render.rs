use std::env;
use std::fmt::Write as _;
use std::io;

use chrono::{DateTime, Local, Utc};
use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};
use tracing::debug;

use crate::reader::decode_in_stream;
use crate::sink::Sink;
use crate::wire::{self, DecodedValue, Level, Record};

/// Column the message is padded to when fields follow it.
pub const MESSAGE_COLUMN: usize = 40;

const TIME_FORMAT: &str = "%m-%d|%H:%M:%S";
const UNKNOWN_LEVEL: &str = "UNKN";
const RESET: &str = "\x1b[0m";

fn level_color(level: Level) -> &'static str {
    match level {
        Level::Debug => "\x1b[36m",
        Level::Info => "\x1b[32m",
        Level::Warn => "\x1b[33m",
        Level::Error => "\x1b[31m",
        Level::Fatal => "\x1b[35m",
    }
}

/// Time zone used for the rendered timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Zone {
    Utc,
    #[default]
    Local,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RenderOptions {
    /// Wrap levels and keys in ANSI colors.
    pub color: bool,
    pub zone: Zone,
}

impl RenderOptions {
    /// Color on, unless `NO_COLOR` is set to anything non-empty or `TERM`
    /// is `dumb`.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Like [`from_env`](Self::from_env), but reads variables through
    /// `lookup` instead of the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let no_color = lookup("NO_COLOR").is_some_and(|v| !v.is_empty());
        let dumb = lookup("TERM").is_some_and(|t| t == "dumb");
        Self {
            color: !(no_color || dumb),
            zone: Zone::Local,
        }
    }

    pub fn with_color(mut self, color: bool) -> Self {
        self.color = color;
        self
    }

    pub fn with_zone(mut self, zone: Zone) -> Self {
        self.zone = zone;
        self
    }
}

/// Appends the text line for `record` to `out`, newline included.
///
/// ```text
/// INFO  [03-14|09:26:53] user login                              user=alice attempts=3
/// ```
pub fn render_record(record: &Record<'_>, options: &RenderOptions, out: &mut String) {
    let level = record.level();
    let color = match level {
        Some(level) if options.color => Some(level_color(level)),
        _ => None,
    };

    let name = level.map_or(UNKNOWN_LEVEL, Level::as_str);
    match color {
        Some(code) => {
            let _ = write!(out, "{code}{name:<5}{RESET}");
        }
        None => {
            let _ = write!(out, "{name:<5}");
        }
    }

    out.push_str(" [");
    push_time(out, record.timestamp, options.zone);
    out.push_str("] ");

    let message = record.message_str();
    out.push_str(&message);

    if !record.fields.is_empty() {
        let width = message.chars().count();
        let pad = MESSAGE_COLUMN.saturating_sub(width).max(1);
        out.extend(std::iter::repeat(' ').take(pad));

        for (i, field) in record.fields.iter().enumerate() {
            if i > 0 {
                out.push(' ');
            }
            let key = field.key_str();
            match color {
                Some(code) => {
                    let _ = write!(out, "{code}{key}{RESET}=");
                }
                None => {
                    let _ = write!(out, "{key}=");
                }
            }
            push_value(out, &field.value);
        }
    }

    out.push('\n');
}

fn push_time(out: &mut String, nanos: u64, zone: Zone) {
    let secs = (nanos / 1_000_000_000) as i64;
    let subsec = (nanos % 1_000_000_000) as u32;
    let Some(utc) = DateTime::<Utc>::from_timestamp(secs, subsec) else {
        out.push_str("??-??|??:??:??");
        return;
    };
    let _ = match zone {
        Zone::Utc => write!(out, "{}", utc.format(TIME_FORMAT)),
        Zone::Local => write!(out, "{}", utc.with_timezone(&Local).format(TIME_FORMAT)),
    };
}

fn push_value(out: &mut String, value: &DecodedValue<'_>) {
    let _ = match *value {
        DecodedValue::Int(v) => write!(out, "{v}"),
        DecodedValue::Uint(v) => write!(out, "{v}"),
        DecodedValue::Float32(v) => write!(out, "{v:.3}"),
        DecodedValue::Float64(v) => write!(out, "{v:.3}"),
        DecodedValue::Bool(v) => write!(out, "{v}"),
        DecodedValue::Str(s) => {
            push_str_value(out, &String::from_utf8_lossy(s));
            Ok(())
        }
        DecodedValue::Bytes(b) => {
            out.push_str(&hex::encode(b));
            Ok(())
        }
        DecodedValue::Truncated | DecodedValue::Unknown => {
            out.push('?');
            Ok(())
        }
    };
}

fn needs_quotes(s: &str) -> bool {
    s.chars()
        .any(|c| c.is_whitespace() || c.is_control() || matches!(c, '"' | '\\' | '='))
}

/// Bare when safe, otherwise double-quoted with escapes.
fn push_str_value(out: &mut String, s: &str) {
    if !needs_quotes(s) {
        out.push_str(s);
        return;
    }
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                let _ = write!(out, "\\u{{{:x}}}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('"');
}

/// A [`Sink`] that decodes each record and writes it as a text line.
///
/// Concurrent writers share one scratch buffer behind a mutex, so lines never
/// interleave and a warm renderer does not allocate. Bytes that do not decode
/// produce an `InvalidData` error for that call and nothing is written.
///
/// # Examples
///
/// ```
/// # use zlog::{Sink, TextRenderer, render::{RenderOptions, Zone}};
/// # use zlog::wire::{self, Field, Level};
/// let renderer = TextRenderer::with_options(
///     Vec::new(),
///     RenderOptions::default().with_zone(Zone::Utc),
/// );
/// let record = wire::encode(Level::Warn, None, 0, "disk almost full", &[]);
/// renderer.write(&record).unwrap();
///
/// assert_eq!(&*renderer.output(), b"WARN  [01-01|00:00:00] disk almost full\n");
/// ```
pub struct TextRenderer<W> {
    state: Mutex<State<W>>,
}

struct State<W> {
    out: W,
    options: RenderOptions,
    scratch: String,
}

impl<W: io::Write + Send> TextRenderer<W> {
    /// Renderer with [`RenderOptions::from_env`].
    pub fn new(out: W) -> Self {
        Self::with_options(out, RenderOptions::from_env())
    }

    pub fn with_options(out: W, options: RenderOptions) -> Self {
        Self {
            state: Mutex::new(State {
                out,
                options,
                scratch: String::with_capacity(2048),
            }),
        }
    }

    pub fn set_color(&self, color: bool) {
        self.state.lock().options.color = color;
    }

    pub fn options(&self) -> RenderOptions {
        self.state.lock().options
    }

    /// Locks and exposes the underlying writer.
    pub fn output(&self) -> MappedMutexGuard<'_, W> {
        MutexGuard::map(self.state.lock(), |state| &mut state.out)
    }

    pub fn into_inner(self) -> W {
        self.state.into_inner().out
    }
}

impl TextRenderer<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl TextRenderer<io::Stderr> {
    pub fn stderr() -> Self {
        Self::new(io::stderr())
    }
}

impl<W: io::Write + Send> Sink for TextRenderer<W> {
    fn write(&self, buf: &[u8]) -> io::Result<usize> {
        let record = decode_in_stream(buf).map_err(|err| {
            debug!(error = %err, len = buf.len(), "cannot render record");
            io::Error::from(err)
        })?;

        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.scratch.clear();
        render_record(&record, &state.options, &mut state.scratch);
        state.out.write_all(state.scratch.as_bytes())?;
        Ok(buf.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::Field;

    fn line(bytes: &[u8], options: RenderOptions) -> String {
        let record = wire::decode(bytes).unwrap();
        let mut out = String::new();
        render_record(&record, &options, &mut out);
        out
    }

    fn utc() -> RenderOptions {
        RenderOptions::default().with_zone(Zone::Utc)
    }

    #[test]
    fn test_string_quoting() {
        let mut out = String::new();
        push_str_value(&mut out, "plain");
        out.push('|');
        push_str_value(&mut out, "two words");
        out.push('|');
        push_str_value(&mut out, "a=b");
        out.push('|');
        push_str_value(&mut out, "say \"hi\"\n");
        out.push('|');
        push_str_value(&mut out, "");
        assert_eq!(out, r#"plain|"two words"|"a=b"|"say \"hi\"\n"|"#);
    }

    #[test]
    fn test_colored_level_and_keys() {
        let bytes = wire::encode(Level::Error, Some(1), 0, "boom", &[Field::int("code", -2)]);
        let out = line(&bytes, utc().with_color(true));
        assert!(out.starts_with("\x1b[31mERROR\x1b[0m [01-01|00:00:00] boom"));
        assert!(out.ends_with("\x1b[31mcode\x1b[0m=-2\n"));
    }

    #[test]
    fn test_unknown_level() {
        let mut bytes = wire::encode(Level::Info, None, 0, "odd", &[]);
        bytes[5] = 42;
        let out = line(&bytes, utc().with_color(true));
        assert_eq!(out, "UNKN  [01-01|00:00:00] odd\n");
    }

    #[test]
    fn test_float_and_bytes() {
        let bytes = wire::encode(
            Level::Debug,
            None,
            0,
            "m",
            &[Field::float64("ratio", 2.0 / 3.0), Field::bytes("id", &[0xde, 0xad, 0x01])],
        );
        let out = line(&bytes, utc());
        assert!(out.ends_with("ratio=0.667 id=dead01\n"), "{out:?}");
    }
}
