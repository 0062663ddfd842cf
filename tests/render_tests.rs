mod common;

use std::io;

use zlog::render::{render_record, RenderOptions, Zone, MESSAGE_COLUMN};
use zlog::wire::{self, Field, Level};
use zlog::{Sink, TextRenderer};

// 2024-03-14 09:26:53 UTC, low 16 bits cleared.
const TS: u64 = 1_710_408_413_500_000_000 & !0xFFFF;

fn renderer() -> TextRenderer<Vec<u8>> {
    TextRenderer::with_options(Vec::new(), RenderOptions::default().with_zone(Zone::Utc))
}

fn rendered(renderer: &TextRenderer<Vec<u8>>) -> String {
    String::from_utf8(renderer.output().clone()).unwrap()
}

#[test]
fn test_basic_line() {
    let renderer = renderer();
    let record = wire::encode(Level::Info, None, TS, "service started", &[]);
    assert_eq!(renderer.write(&record).unwrap(), record.len());
    assert_eq!(rendered(&renderer), "INFO  [03-14|09:26:53] service started\n");
}

#[test]
fn test_fields_start_at_message_column() {
    let renderer = renderer();
    let record = wire::encode(
        Level::Warn,
        Some(1),
        TS,
        "slow request",
        &[
            Field::string("path", "/login"),
            Field::uint("ms", 812),
            Field::bool("cached", false),
        ],
    );
    renderer.write(&record).unwrap();

    let line = rendered(&renderer);
    let prefix = "WARN  [03-14|09:26:53] ";
    assert!(line.starts_with(prefix));
    let body = &line[prefix.len()..];
    assert_eq!(&body[MESSAGE_COLUMN..], "path=/login ms=812 cached=false\n");
    assert_eq!(body[..MESSAGE_COLUMN].trim_end(), "slow request");
}

#[test]
fn test_long_message_gets_single_space() {
    let message = "m".repeat(MESSAGE_COLUMN + 5);
    let record = wire::encode(Level::Debug, Some(9), TS, &message, &[Field::int("n", -1)]);
    let decoded = wire::decode(&record).unwrap();

    let mut line = String::new();
    render_record(&decoded, &RenderOptions::default().with_zone(Zone::Utc), &mut line);
    assert!(line.ends_with(&format!("{message} n=-1\n")));
}

#[test]
fn test_escaped_values() {
    let renderer = renderer();
    let record = wire::encode(
        Level::Error,
        Some(3),
        TS,
        "parse failed",
        &[
            Field::string("input", "a \"quoted\"\tvalue"),
            Field::float32("score", 1.5),
            Field::bytes("raw", &[0x00, 0xff]),
        ],
    );
    renderer.write(&record).unwrap();

    let line = rendered(&renderer);
    let expected = concat!(r#"input="a \"quoted\"\tvalue" score=1.500 raw=00ff"#, "\n");
    assert!(line.ends_with(expected), "{line:?}");
}

#[test]
fn test_truncated_field_renders_placeholder() {
    let renderer = renderer();
    let mut record = wire::encode(Level::Info, Some(2), TS, "cut", &[Field::int("n", 5)]);
    record.truncate(record.len() - 3);
    renderer.write(&record).unwrap();
    assert!(rendered(&renderer).ends_with("n=?\n"));
}

#[test]
fn test_undecodable_bytes_are_rejected() {
    common::init_tracing();
    let renderer = renderer();

    let err = renderer.write(b"definitely not a record").unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    assert!(renderer.output().is_empty());

    let short = renderer.write(b"ZL").unwrap_err();
    assert_eq!(short.kind(), io::ErrorKind::InvalidData);
}

#[test]
fn test_color_can_be_toggled() {
    let renderer = renderer();
    renderer.set_color(true);
    renderer
        .write(&wire::encode(Level::Fatal, None, TS, "down", &[]))
        .unwrap();
    assert!(rendered(&renderer).starts_with("\x1b[35mFATAL\x1b[0m ["));
}

fn vars(pairs: &'static [(&'static str, &'static str)]) -> impl Fn(&str) -> Option<String> {
    move |name: &str| {
        pairs
            .iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value.to_string())
    }
}

#[test]
fn test_options_from_lookup() {
    let options = RenderOptions::from_lookup(vars(&[("NO_COLOR", "1")]));
    assert!(!options.color);
    assert_eq!(options.zone, Zone::Local);

    assert!(!RenderOptions::from_lookup(vars(&[("TERM", "dumb")])).color);
    assert!(RenderOptions::from_lookup(vars(&[("NO_COLOR", ""), ("TERM", "xterm")])).color);
    assert!(RenderOptions::from_lookup(vars(&[])).color);
}
