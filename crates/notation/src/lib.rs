//! ABC notation engine: parsing, measure layout, timing and MIDI export.
//!
//! ```
//! use notation::{render, to_midi, LayoutOptions, MidiParams};
//!
//! let abc = "X:1\nT:Sketch\nM:4/4\nL:1/8\nQ:1/4=120\nK:C\n\"C\"C2 E2 G2 c2 | \"G\"B4 d4 |]\n";
//!
//! let score = render(abc, LayoutOptions::default()).unwrap();
//! assert_eq!(score.measure_count(), 2);
//! assert_eq!(score.milliseconds_per_measure(), 2000.0);
//!
//! let midi = to_midi(score.tune(), &MidiParams::default());
//! assert_eq!(&midi[..4], b"MThd");
//! ```

pub mod ast;
pub mod diagnostics;
pub mod midi;
pub mod parser;
pub mod score;

pub use ast::*;
pub use diagnostics::{Diagnostic, Parsed, Severity};
pub use midi::MidiParams;
pub use parser::parse;
pub use score::{LayoutOptions, Measure, Score, StaffLine, VoiceLayout};

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("notation has no playable content")]
    NoPlayableContent,
    #[error("notation could not be read: {0}")]
    Invalid(String),
}

/// Parse and lay out ABC text in one step.
///
/// Text that yields no notes, chords or rests is rejected; so is text whose
/// parse produced errors.
pub fn render(text: &str, options: LayoutOptions) -> Result<Score, RenderError> {
    let parsed = parse(text);
    if let Some(error) = parsed
        .diagnostics
        .iter()
        .find(|d| d.severity == Severity::Error)
    {
        return Err(RenderError::Invalid(format!(
            "line {}: {}",
            error.line, error.message
        )));
    }
    if parsed.value.is_silent() {
        return Err(RenderError::NoPlayableContent);
    }
    Ok(Score::layout(parsed.value, parsed.diagnostics, options))
}

/// Standard MIDI File bytes for a tune.
pub fn to_midi(tune: &Tune, params: &MidiParams) -> Vec<u8> {
    midi::generate(tune, params)
}
