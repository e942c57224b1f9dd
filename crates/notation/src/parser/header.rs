//! Header block: information fields and `%%MIDI` directives up to the
//! first music line.
//!
//! Voice definitions may follow `K:`, so the header ends at the first line
//! that is neither a field, a directive, a comment nor blank.

use crate::ast::{Accidental, Fraction, Header, Key, Meter, Mode, Step, Tempo, VoiceDef};
use crate::diagnostics::Diagnostics;

/// Where the body starts after the header has been consumed.
pub(crate) struct HeaderEnd {
    /// Byte offset of the first body line.
    pub offset: usize,
    /// 1-based line number of the first body line.
    pub line: usize,
}

pub(crate) fn parse_header(input: &str, diags: &mut Diagnostics) -> (Header, HeaderEnd) {
    let mut header = Header::default();
    let mut seen_reference = false;
    let mut seen_key = false;
    let mut seen_unit = false;
    let mut offset = 0;
    let mut line_no = 1;

    for line in input.split_inclusive('\n') {
        diags.at_line(line_no);
        let trimmed = line.trim();

        if let Some(directive) = trimmed.strip_prefix("%%") {
            parse_directive(directive, &mut header, diags);
        } else if trimmed.is_empty() || trimmed.starts_with('%') {
            // blank or comment
        } else if let Some((field, value)) = field_line(trimmed) {
            match field {
                'X' => {
                    seen_reference = true;
                    header.reference = value.parse().unwrap_or_else(|_| {
                        diags.warn(format!("invalid X: value '{value}', using 1"));
                        1
                    });
                }
                'T' => {
                    if header.title.is_none() {
                        header.title = Some(value.to_string());
                    }
                }
                'M' => header.meter = parse_meter(value, diags),
                'L' => {
                    seen_unit = true;
                    header.unit_length = parse_fraction(value).unwrap_or_else(|| {
                        diags.warn(format!("invalid unit length '{value}', assuming 1/8"));
                        Fraction::new(1, 8)
                    });
                }
                'Q' => header.tempo = parse_tempo(value, diags),
                'K' => {
                    seen_key = true;
                    header.key = parse_key(value, diags);
                }
                'V' => header.voices.push(parse_voice_def(value)),
                _ => diags.info(format!("ignoring header field {field}:")),
            }
        } else {
            break;
        }

        offset += line.len();
        line_no += 1;
    }

    diags.at_line(1);
    if !seen_reference {
        diags.info("no X: field, assuming X:1");
    }
    if !seen_key {
        diags.warn("no K: field, assuming K:C");
    }
    if !seen_unit {
        header.unit_length = infer_unit_length(header.meter);
    }

    diags.at_line(line_no);
    (header, HeaderEnd { offset, line: line_no })
}

/// `X:value` with a single ASCII letter before the colon.
pub(crate) fn field_line(line: &str) -> Option<(char, &str)> {
    let mut chars = line.chars();
    let field = chars.next()?;
    if !field.is_ascii_alphabetic() || chars.next()? != ':' {
        return None;
    }
    Some((field, line[2..].trim()))
}

fn parse_directive(directive: &str, header: &mut Header, diags: &mut Diagnostics) {
    let mut words = directive.split_whitespace();
    if words.next() != Some("MIDI") {
        return;
    }
    match words.next() {
        Some("program") => {
            let numbers: Vec<u8> = words.filter_map(|w| w.parse().ok()).collect();
            match numbers.as_slice() {
                [program] => header.programs.push((0, *program)),
                [voice, program, ..] => header.programs.push((*voice, *program)),
                [] => diags.warn("%%MIDI program without a program number"),
            }
        }
        // channel assignment follows voice order
        Some("channel") => {}
        Some(other) => diags.info(format!("ignoring %%MIDI {other}")),
        None => {}
    }
}

pub(crate) fn parse_fraction(value: &str) -> Option<Fraction> {
    let (num, den) = value.trim().split_once('/')?;
    let num: u32 = num.trim().parse().ok()?;
    let den: u32 = den.trim().parse().ok()?;
    (den > 0).then_some(Fraction::new(num, den))
}

pub(crate) fn parse_meter(value: &str, diags: &mut Diagnostics) -> Meter {
    match value.trim() {
        "C" => Meter::Common,
        "C|" => Meter::Cut,
        "none" | "free" | "" => Meter::Free,
        other => match parse_fraction(other) {
            Some(f) if f.num > 0 => Meter::Ratio(f.num, f.den),
            _ => {
                diags.warn(format!("invalid meter '{other}', assuming 4/4"));
                Meter::Ratio(4, 4)
            }
        },
    }
}

/// `L:` default per the ABC standard: 1/16 below 3/4, else 1/8.
fn infer_unit_length(meter: Meter) -> Fraction {
    if meter.measure_length().as_f64() < 0.75 {
        Fraction::new(1, 16)
    } else {
        Fraction::new(1, 8)
    }
}

/// `1/4=120`, `120`, `"Allegro" 1/4=120`.
fn parse_tempo(value: &str, diags: &mut Diagnostics) -> Tempo {
    let without_text: String = value
        .split('"')
        .enumerate()
        .filter(|(i, _)| i % 2 == 0)
        .map(|(_, part)| part)
        .collect();
    let spec = without_text.trim();

    let parsed = match spec.split_once('=') {
        Some((beat, bpm)) => parse_fraction(beat)
            .zip(bpm.trim().parse::<u32>().ok())
            .map(|(beat, bpm)| Tempo { beat, bpm }),
        None => spec.parse::<u32>().ok().map(|bpm| Tempo {
            bpm,
            ..Tempo::default()
        }),
    };

    match parsed {
        Some(t) if t.bpm > 0 => t,
        _ => {
            diags.warn(format!("invalid tempo '{value}', assuming 1/4=120"));
            Tempo::default()
        }
    }
}

/// `C`, `Am`, `F#m`, `Bb`, `D dorian`, `none`; trailing `clef=` style
/// attributes are ignored.
pub(crate) fn parse_key(value: &str, diags: &mut Diagnostics) -> Key {
    let mut words = value.split_whitespace().filter(|w| !w.contains('='));
    let Some(first) = words.next() else {
        return Key::default();
    };
    if first.eq_ignore_ascii_case("none") {
        return Key::default();
    }

    let mut chars = first.chars();
    let Some(step) = chars.next().and_then(Step::from_letter) else {
        diags.warn(format!("invalid key '{value}', assuming C"));
        return Key::default();
    };
    let rest = chars.as_str();
    let (accidental, mode_text) = match rest.chars().next() {
        Some('#') => (Some(Accidental::Sharp), &rest[1..]),
        Some('b') => (Some(Accidental::Flat), &rest[1..]),
        _ => (None, rest),
    };

    let mode_text = if mode_text.is_empty() {
        words.next().unwrap_or("")
    } else {
        mode_text
    };
    let mode = Mode::parse(mode_text).unwrap_or_else(|| {
        diags.warn(format!("unknown mode '{mode_text}', assuming major"));
        Mode::Major
    });

    Key {
        tonic: Some((step, accidental)),
        mode,
    }
}

/// `1 clef=treble name="piano"`
pub(crate) fn parse_voice_def(value: &str) -> VoiceDef {
    let mut def = VoiceDef {
        id: String::new(),
        name: None,
        clef: None,
    };
    let mut rest = value.trim();

    let id_end = rest.find(char::is_whitespace).unwrap_or(rest.len());
    def.id = rest[..id_end].to_string();
    rest = rest[id_end..].trim_start();

    while let Some((attr, after)) = rest.split_once('=') {
        let attr = attr.trim();
        let after = after.trim_start();
        let (val, remaining) = if let Some(quoted) = after.strip_prefix('"') {
            match quoted.split_once('"') {
                Some((val, remaining)) => (val, remaining),
                None => (quoted, ""),
            }
        } else {
            let end = after.find(char::is_whitespace).unwrap_or(after.len());
            (&after[..end], &after[end..])
        };
        match attr {
            "name" | "nm" => def.name = Some(val.to_string()),
            "clef" => def.clef = Some(val.to_string()),
            _ => {}
        }
        rest = remaining.trim_start();
    }
    def
}
