//! Token-level parsers for notes, chords and rests.
//!
//! Each parser leaves the input where it stopped on failure; callers that
//! need to backtrack keep their own copy of the slice.

use winnow::combinator::{alt, opt, repeat};
use winnow::prelude::*;
use winnow::token::{one_of, take_while};
use winnow::ModalResult;

use crate::ast::{Accidental, Chord, Fraction, Note, Rest, Step};

fn literal<'s>(input: &mut &'s str, tag: &'static str) -> ModalResult<&'s str> {
    winnow::token::literal(tag).parse_next(input)
}

fn digits<'s>(input: &mut &'s str) -> ModalResult<&'s str> {
    take_while(0.., |c: char| c.is_ascii_digit()).parse_next(input)
}

fn octave_marks<'s>(input: &mut &'s str) -> ModalResult<&'s str> {
    take_while(0.., ['\'', ',']).parse_next(input)
}

fn pitch_letter(input: &mut &str) -> ModalResult<char> {
    one_of(|c: char| matches!(c, 'A'..='G' | 'a'..='g')).parse_next(input)
}

fn rest_letter(input: &mut &str) -> ModalResult<char> {
    one_of(['z', 'x', 'Z', 'X']).parse_next(input)
}

fn tie<'s>(input: &mut &'s str) -> ModalResult<&'s str> {
    literal(input, "-")
}

pub(crate) fn accidental(input: &mut &str) -> ModalResult<Accidental> {
    alt((
        "^^".value(Accidental::DoubleSharp),
        "^".value(Accidental::Sharp),
        "__".value(Accidental::DoubleFlat),
        "_".value(Accidental::Flat),
        "=".value(Accidental::Natural),
    ))
    .parse_next(input)
}

/// Note length multiplier: `2`, `/2`, `3/2`, `/`, `//`.
pub(crate) fn length(input: &mut &str) -> ModalResult<Fraction> {
    let num = digits(input)?;
    let num = num.parse().ok().unwrap_or(1);

    let mut den = 1u32;
    while input.starts_with('/') {
        literal(input, "/")?;
        let d = digits(input)?;
        den = den.saturating_mul(d.parse().ok().filter(|d| *d > 0).unwrap_or(2));
    }

    Ok(Fraction::new(num, den))
}

pub(crate) fn note(input: &mut &str) -> ModalResult<Note> {
    let accidental = opt(accidental).parse_next(input)?;
    let letter = pitch_letter(input)?;
    let marks = octave_marks(input)?;
    let length = length(input)?;
    let tied = opt(tie).parse_next(input)?.is_some();

    let base: i8 = if letter.is_ascii_lowercase() { 1 } else { 0 };
    let shift = marks.chars().fold(0i8, |acc, c| match c {
        '\'' => acc.saturating_add(1),
        _ => acc.saturating_sub(1),
    });

    Ok(Note {
        step: Step::from_letter(letter).unwrap_or(Step::C),
        octave: base + shift,
        accidental,
        length,
        tied,
    })
}

fn chord_member(input: &mut &str) -> ModalResult<Note> {
    *input = input.trim_start_matches(' ');
    note(input)
}

/// `[CEG]2`; the outer length scales the first member's length.
pub(crate) fn chord(input: &mut &str) -> ModalResult<Chord> {
    literal(input, "[")?;
    let mut notes: Vec<Note> = repeat(1.., chord_member).parse_next(input)?;
    *input = input.trim_start_matches(' ');
    literal(input, "]")?;
    let outer = length(input)?;
    let tied = opt(tie).parse_next(input)?.is_some();

    if tied {
        for n in &mut notes {
            n.tied = true;
        }
    }
    let inner = notes.first().map(|n| n.length).unwrap_or(Fraction::new(1, 1));

    Ok(Chord {
        notes,
        length: inner.times(outer),
    })
}

pub(crate) fn rest(input: &mut &str) -> ModalResult<Rest> {
    let kind = rest_letter(input)?;
    if kind == 'Z' || kind == 'X' {
        let count = digits(input)?;
        return Ok(Rest {
            length: Fraction::new(1, 1),
            measures: Some(count.parse().ok().unwrap_or(1)),
        });
    }
    Ok(Rest {
        length: length(input)?,
        measures: None,
    })
}
