//! Measure layout and playback timing for a parsed tune.
//!
//! A [`Score`] is what a renderer hands to a player: the tune, its voices
//! broken into measures and grouped into staff lines, and the timing the
//! synthesizer needs.

use serde::Serialize;

use crate::ast::{Bar, Element, Fraction, Key, Meter, Tempo, Tune};
use crate::diagnostics::Diagnostic;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutOptions {
    /// Measures per staff line; 0 keeps each voice on one line.
    pub measures_per_line: usize,
}

impl Default for LayoutOptions {
    fn default() -> Self {
        LayoutOptions {
            measures_per_line: 4,
        }
    }
}

/// Elements between two bar lines.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Measure {
    pub elements: Vec<Element>,
    /// The bar line that closed the measure, if any.
    pub closing: Option<Bar>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StaffLine {
    pub measures: Vec<Measure>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VoiceLayout {
    pub id: Option<String>,
    pub name: Option<String>,
    pub lines: Vec<StaffLine>,
}

impl VoiceLayout {
    pub fn measure_count(&self) -> usize {
        self.lines.iter().map(|l| l.measures.len()).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Score {
    tune: Tune,
    voices: Vec<VoiceLayout>,
    diagnostics: Vec<Diagnostic>,
}

impl Score {
    pub fn layout(tune: Tune, diagnostics: Vec<Diagnostic>, options: LayoutOptions) -> Score {
        let voices = tune
            .voices
            .iter()
            .filter(|v| v.has_sound())
            .map(|voice| {
                let measures = split_measures(&voice.elements);
                VoiceLayout {
                    id: voice.id.clone(),
                    name: voice.name.clone(),
                    lines: group_lines(measures, options.measures_per_line),
                }
            })
            .collect();

        Score {
            tune,
            voices,
            diagnostics,
        }
    }

    pub fn tune(&self) -> &Tune {
        &self.tune
    }

    pub fn voices(&self) -> &[VoiceLayout] {
        &self.voices
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn title(&self) -> Option<&str> {
        self.tune.header.title.as_deref()
    }

    pub fn key(&self) -> &Key {
        &self.tune.header.key
    }

    pub fn meter(&self) -> Meter {
        self.tune.header.meter
    }

    pub fn tempo(&self) -> &Tempo {
        &self.tune.header.tempo
    }

    /// Measures in the longest voice.
    pub fn measure_count(&self) -> usize {
        self.voices
            .iter()
            .map(VoiceLayout::measure_count)
            .max()
            .unwrap_or(0)
    }

    /// Staff lines in the longest voice.
    pub fn line_count(&self) -> usize {
        self.voices.iter().map(|v| v.lines.len()).max().unwrap_or(0)
    }

    pub fn has_playable_content(&self) -> bool {
        !self.voices.is_empty()
    }

    /// Duration of one measure at the header tempo.
    pub fn milliseconds_per_measure(&self) -> f64 {
        milliseconds_per_measure(self.meter(), self.tempo())
    }

    pub fn duration_ms(&self) -> f64 {
        self.milliseconds_per_measure() * self.measure_count() as f64
    }
}

/// `Q:1/4=120` in `M:4/4` is 2000 ms; `Q:3/8=120` in `M:6/8` is 1000 ms.
pub fn milliseconds_per_measure(meter: Meter, tempo: &Tempo) -> f64 {
    let beats = meter.measure_length().as_f64() / beat_or_quarter(tempo.beat).as_f64();
    let bpm = tempo.bpm.max(1) as f64;
    beats * 60_000.0 / bpm
}

fn beat_or_quarter(beat: Fraction) -> Fraction {
    if beat.num == 0 || beat.den == 0 {
        Fraction::new(1, 4)
    } else {
        beat
    }
}

fn split_measures(elements: &[Element]) -> Vec<Measure> {
    let mut measures = Vec::new();
    let mut current: Vec<Element> = Vec::new();

    for element in elements {
        match element {
            Element::Bar(Bar::Ending(_)) => current.push(element.clone()),
            Element::Bar(bar) => {
                if has_timed(&current) {
                    measures.push(Measure {
                        elements: std::mem::take(&mut current),
                        closing: Some(*bar),
                    });
                } else {
                    current.clear();
                }
            }
            Element::LineBreak | Element::VoiceSwitch(_) => {}
            other => current.push(other.clone()),
        }
    }
    if has_timed(&current) {
        measures.push(Measure {
            elements: current,
            closing: None,
        });
    }
    measures
}

fn has_timed(elements: &[Element]) -> bool {
    elements.iter().any(|e| {
        matches!(
            e,
            Element::Note(_) | Element::Chord(_) | Element::Rest(_) | Element::Tuplet(_)
        )
    })
}

fn group_lines(measures: Vec<Measure>, per_line: usize) -> Vec<StaffLine> {
    if measures.is_empty() {
        return Vec::new();
    }
    if per_line == 0 {
        return vec![StaffLine { measures }];
    }

    let mut lines = Vec::new();
    let mut iter = measures.into_iter().peekable();
    while iter.peek().is_some() {
        lines.push(StaffLine {
            measures: iter.by_ref().take(per_line).collect(),
        });
    }
    lines
}
