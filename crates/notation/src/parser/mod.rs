//! ABC text to [`Tune`].

mod body;
mod header;
mod note;

use crate::ast::{Element, Header, Tune, Voice};
use crate::diagnostics::{Diagnostics, Parsed};

/// Parse ABC text. Never fails: problems are reported as diagnostics and
/// the offending constructs are skipped.
pub fn parse(input: &str) -> Parsed<Tune> {
    let mut diags = Diagnostics::new();
    let (header, end) = header::parse_header(input, &mut diags);
    let elements = body::parse_body(&input[end.offset..], end.line, &mut diags);
    let voices = route_voices(&header, elements);

    Parsed {
        value: Tune { header, voices },
        diagnostics: diags.into_vec(),
    }
}

/// Split the flat element stream into voices. Declared voices keep their
/// header order; undeclared ids are appended as they appear.
fn route_voices(header: &Header, elements: Vec<Element>) -> Vec<Voice> {
    let mut voices: Vec<Voice> = header
        .voices
        .iter()
        .map(|def| Voice {
            id: Some(def.id.clone()),
            name: def.name.clone(),
            elements: Vec::new(),
        })
        .collect();
    let mut current: Option<usize> = None;

    for element in elements {
        match element {
            Element::VoiceSwitch(id) => {
                let index = voices
                    .iter()
                    .position(|v| v.id.as_deref() == Some(id.as_str()))
                    .unwrap_or_else(|| {
                        voices.push(Voice {
                            id: Some(id),
                            name: None,
                            elements: Vec::new(),
                        });
                        voices.len() - 1
                    });
                current = Some(index);
            }
            Element::LineBreak if current.is_none() => {}
            other => {
                let index = *current.get_or_insert_with(|| {
                    if voices.is_empty() {
                        voices.push(Voice::default());
                    }
                    0
                });
                voices[index].elements.push(other);
            }
        }
    }

    voices
}
