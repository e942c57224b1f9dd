//! Sketches in the shape the generation service produces: header with
//! `%%MIDI` directives, voice definitions after `K:`, one `[V:n]` line per
//! part and a trailing `|]` line.

use notation::{parse, render, to_midi, Bar, LayoutOptions, MidiParams, RenderError, Severity};
use pretty_assertions::assert_eq;
use std::fs;
use std::path::Path;

fn fixture(name: &str) -> String {
    let path = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(format!("{name}.abc"));
    fs::read_to_string(&path).unwrap_or_else(|e| panic!("failed to read fixture {name}: {e}"))
}

#[test]
fn duet_parses_without_errors() {
    let parsed = parse(&fixture("duet"));
    assert!(!parsed.has_errors(), "errors: {:?}", parsed.diagnostics);

    let tune = &parsed.value;
    assert_eq!(tune.header.title.as_deref(), Some("MelodyCraft Sketch"));
    assert_eq!(tune.header.tempo.bpm, 96);
    assert_eq!(tune.voices.len(), 2);
    assert_eq!(tune.voices[1].name.as_deref(), Some("strings"));
    assert_eq!(tune.header.program_for(1), Some(49));
}

#[test]
fn duet_layout_and_timing() {
    let score = render(&fixture("duet"), LayoutOptions { measures_per_line: 4 }).unwrap();
    assert_eq!(score.voices().len(), 2);
    assert_eq!(score.measure_count(), 5);
    assert_eq!(score.line_count(), 2);
    assert_eq!(score.milliseconds_per_measure(), 2500.0);
}

#[test]
fn duet_exports_one_track_per_part() {
    let tune = parse(&fixture("duet")).value;
    let midi = to_midi(&tune, &MidiParams::default());
    assert_eq!(&midi[..4], b"MThd");
    assert_eq!(u16::from_be_bytes([midi[8], midi[9]]), 1);
    assert_eq!(u16::from_be_bytes([midi[10], midi[11]]), 3);
}

#[test]
fn solo_is_single_track() {
    let score = render(&fixture("solo"), LayoutOptions::default()).unwrap();
    assert_eq!(score.measure_count(), 5);
    assert_eq!(score.milliseconds_per_measure(), 2000.0);

    let midi = to_midi(score.tune(), &MidiParams::default());
    assert_eq!(u16::from_be_bytes([midi[8], midi[9]]), 0);
}

#[test]
fn final_bar_split_across_lines_is_rejoined() {
    let reflowed = "X:1\nM:4/4\nL:1/8\nK:C\nC8 | D8 | E8 | F8 |\n]";
    let parsed = parse(reflowed);
    assert!(parsed
        .diagnostics
        .iter()
        .all(|d| d.severity == Severity::Info));

    let score = render(reflowed, LayoutOptions::default()).unwrap();
    let last_line = &score.voices()[0].lines[0];
    assert_eq!(last_line.measures.len(), 4);
    assert_eq!(last_line.measures[3].closing, Some(Bar::Final));
}

#[test]
fn header_only_text_has_nothing_to_render() {
    let err = render("X:1\nT:Empty\nK:C\n", LayoutOptions::default()).unwrap_err();
    assert!(matches!(err, RenderError::NoPlayableContent));
}

#[test]
fn malformed_chord_is_rejected() {
    let err = render("X:1\nK:C\nC2 [CE | D8 |", LayoutOptions::default()).unwrap_err();
    assert!(matches!(err, RenderError::Invalid(_)));
}
