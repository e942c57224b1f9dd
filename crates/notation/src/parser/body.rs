//! Music body: notes, bars, inline fields and voice switches as one flat
//! element stream. Voice routing happens afterwards.

use crate::ast::{Bar, Element, Note, Tuplet};
use crate::diagnostics::Diagnostics;

use super::header::field_line;
use super::note::{chord, note, rest};

const SHORTHAND_DECORATIONS: &[char] = &['.', '~', 'H', 'L', 'M', 'O', 'P', 'S', 'T', 'u', 'v'];

/// A tuplet still collecting its notes.
struct PendingTuplet {
    tuplet: Tuplet,
    remaining: u32,
}

struct BodyParser<'d> {
    elements: Vec<Element>,
    pending: Option<PendingTuplet>,
    diags: &'d mut Diagnostics,
}

impl BodyParser<'_> {
    fn emit(&mut self, element: Element) {
        let timed = matches!(
            element,
            Element::Note(_) | Element::Chord(_) | Element::Rest(_)
        );
        if let Some(pending) = self.pending.as_mut() {
            if timed {
                pending.tuplet.elements.push(element);
                pending.remaining = pending.remaining.saturating_sub(1);
                if pending.remaining == 0 {
                    self.flush_tuplet();
                }
                return;
            }
            if matches!(element, Element::Bar(_) | Element::LineBreak | Element::VoiceSwitch(_)) {
                self.diags.warn("tuplet cut short");
                self.flush_tuplet();
            }
        }
        self.elements.push(element);
    }

    fn flush_tuplet(&mut self) {
        if let Some(pending) = self.pending.take() {
            self.elements.push(Element::Tuplet(pending.tuplet));
        }
    }

    /// Our own line reflow can split a two-character bar like `|]` across
    /// a line break. Rejoin it with the single bar before the break.
    fn fuse_split_bar(&mut self, next: char) -> bool {
        let n = self.elements.len();
        if n < 2 || self.elements[n - 1] != Element::LineBreak {
            return false;
        }
        let fused = match next {
            ']' => Bar::Final,
            '|' => Bar::Double,
            ':' => Bar::RepeatStart,
            _ => return false,
        };
        match self.elements[n - 2] {
            Element::Bar(Bar::Single) => {
                self.elements[n - 2] = Element::Bar(fused);
                true
            }
            _ => false,
        }
    }

    /// The same split can land between a bar and its ending number, as in
    /// `|\n1` or `:|\n2`. The ending goes back before the break.
    fn fuse_split_ending<'s>(&mut self, input: &'s str) -> Option<&'s str> {
        let n = self.elements.len();
        if n < 2 || self.elements[n - 1] != Element::LineBreak {
            return None;
        }
        if !matches!(self.elements[n - 2], Element::Bar(bar) if !matches!(bar, Bar::Ending(_))) {
            return None;
        }
        let (number, consumed) = ending_number(input)?;
        self.elements.insert(n - 1, Element::Bar(Bar::Ending(number)));
        Some(&input[consumed..])
    }
}

pub(crate) fn parse_body(input: &str, first_line: usize, diags: &mut Diagnostics) -> Vec<Element> {
    let mut p = BodyParser {
        elements: Vec::new(),
        pending: None,
        diags,
    };
    let mut rest = input;
    let mut line = first_line;
    let mut at_line_start = true;
    p.diags.at_line(line);

    while let Some(c) = rest.chars().next() {
        if at_line_start {
            at_line_start = false;
            let text = rest.split('\n').next().unwrap_or("");
            if let Some((field, value)) = field_line(text.trim()) {
                match field {
                    'V' => p.emit(Element::VoiceSwitch(first_word(value))),
                    'K' | 'M' | 'L' | 'Q' => p.emit(Element::Field(field, value.to_string())),
                    _ => p.diags.info(format!("ignoring body field {field}:")),
                }
                rest = &rest[text.len()..];
                continue;
            }
        }

        match c {
            '\n' => {
                p.emit(Element::LineBreak);
                line += 1;
                p.diags.at_line(line);
                at_line_start = true;
                rest = &rest[1..];
            }
            ' ' | '\t' | '\r' | '`' | '\\' | 'y' => rest = &rest[1..],
            '%' => rest = &rest[rest.find('\n').unwrap_or(rest.len())..],
            '"' => {
                let body = &rest[1..];
                match body.find('"') {
                    Some(end) => {
                        let text = &body[..end];
                        if !text.starts_with(['^', '_', '<', '>', '@']) {
                            p.emit(Element::ChordSymbol(text.to_string()));
                        }
                        rest = &body[end + 1..];
                    }
                    None => {
                        p.diags.error("unterminated chord symbol");
                        rest = &rest[rest.find('\n').unwrap_or(rest.len())..];
                    }
                }
            }
            '!' | '+' => {
                let body = &rest[1..];
                let end = body.find(|ch: char| ch == c || ch == '\n');
                match end.filter(|&i| body[i..].starts_with(c)) {
                    Some(end) => {
                        p.emit(Element::Decoration(body[..end].to_string()));
                        rest = &body[end + 1..];
                    }
                    None => {
                        p.diags.warn(format!("unterminated decoration '{c}'"));
                        rest = body;
                    }
                }
            }
            '{' => rest = grace(rest, &mut p),
            '(' => rest = tuplet_or_slur(rest, &mut p),
            ')' => {
                p.emit(Element::Slur);
                rest = &rest[1..];
            }
            '[' => rest = bracket(rest, &mut p),
            '|' | ':' => {
                if p.fuse_split_bar(c) {
                    rest = &rest[1..];
                } else {
                    rest = bar(rest, &mut p);
                }
            }
            ']' => {
                if !p.fuse_split_bar(c) {
                    p.diags.warn("skipping stray ']'");
                }
                rest = &rest[1..];
            }
            '>' | '<' => {
                p.diags.warn("broken rhythm is not supported, ignoring");
                rest = &rest[1..];
            }
            '-' => rest = &rest[1..],
            c if SHORTHAND_DECORATIONS.contains(&c) => {
                p.emit(Element::Decoration(c.to_string()));
                rest = &rest[1..];
            }
            c if c.is_ascii_digit() => {
                rest = match p.fuse_split_ending(rest) {
                    Some(after) => after,
                    None => note_or_rest(rest, &mut p),
                }
            }
            _ => rest = note_or_rest(rest, &mut p),
        }
    }

    p.flush_tuplet();
    p.elements
}

fn first_word(value: &str) -> String {
    value.split_whitespace().next().unwrap_or("").to_string()
}

fn note_or_rest<'s>(input: &'s str, p: &mut BodyParser<'_>) -> &'s str {
    let mut cursor = input;
    if let Ok(n) = note(&mut cursor) {
        p.emit(Element::Note(n));
        return cursor;
    }
    let mut cursor = input;
    if let Ok(r) = rest(&mut cursor) {
        p.emit(Element::Rest(r));
        return cursor;
    }

    let skipped = input.chars().next().map(char::len_utf8).unwrap_or(1);
    p.diags.warn(format!("skipping unknown character '{}'", &input[..skipped]));
    &input[skipped..]
}

fn bar<'s>(input: &'s str, p: &mut BodyParser<'_>) -> &'s str {
    let (kind, len) = if input.starts_with(":|:") {
        (Bar::RepeatBoth, 3)
    } else if input.starts_with("::") {
        (Bar::RepeatBoth, 2)
    } else if input.starts_with(":|") {
        (Bar::RepeatEnd, 2)
    } else if input.starts_with("|]") {
        (Bar::Final, 2)
    } else if input.starts_with("||") {
        (Bar::Double, 2)
    } else if input.starts_with("|:") {
        (Bar::RepeatStart, 2)
    } else if input.starts_with('|') {
        (Bar::Single, 1)
    } else {
        p.diags.warn("skipping stray ':'");
        return &input[1..];
    };

    p.emit(Element::Bar(kind));
    let after = &input[len..];
    match ending_number(after) {
        Some((n, consumed)) => {
            p.emit(Element::Bar(Bar::Ending(n)));
            &after[consumed..]
        }
        None => after,
    }
}

fn ending_number(input: &str) -> Option<(u8, usize)> {
    let digits = input.len() - input.trim_start_matches(|c: char| c.is_ascii_digit()).len();
    if digits == 0 {
        return None;
    }
    input[..digits].parse().ok().map(|n| (n, digits))
}

/// `[V:2]`, `[K:G]`, `[|`, `[1` or a chord.
fn bracket<'s>(input: &'s str, p: &mut BodyParser<'_>) -> &'s str {
    let inner = &input[1..];
    let mut chars = inner.chars();
    if let (Some(field), Some(':')) = (chars.next(), chars.next()) {
        if field.is_ascii_alphabetic() {
            let Some(end) = inner.find(']') else {
                p.diags.error("unterminated inline field");
                return &inner[inner.find('\n').unwrap_or(inner.len())..];
            };
            let value = inner[2..end].trim();
            match field {
                'V' => p.emit(Element::VoiceSwitch(first_word(value))),
                _ => p.emit(Element::Field(field, value.to_string())),
            }
            return &inner[end + 1..];
        }
    }

    if let Some(after) = inner.strip_prefix('|') {
        p.emit(Element::Bar(Bar::Thick));
        return after.strip_prefix(']').unwrap_or(after);
    }
    if let Some((n, consumed)) = ending_number(inner) {
        p.emit(Element::Bar(Bar::Ending(n)));
        return &inner[consumed..];
    }

    let mut cursor = input;
    match chord(&mut cursor) {
        Ok(c) => {
            p.emit(Element::Chord(c));
            cursor
        }
        Err(_) => {
            p.diags.error("skipping malformed chord");
            inner
        }
    }
}

fn grace<'s>(input: &'s str, p: &mut BodyParser<'_>) -> &'s str {
    let Some(end) = input.find('}') else {
        p.diags.error("unterminated grace notes");
        return &input[1..];
    };
    let mut cursor = input[1..end].trim_start_matches('/');
    let mut notes: Vec<Note> = Vec::new();
    while !cursor.is_empty() {
        cursor = cursor.trim_start();
        if cursor.is_empty() {
            break;
        }
        match note(&mut cursor) {
            Ok(n) => notes.push(n),
            Err(_) => cursor = &cursor[cursor.chars().next().map(char::len_utf8).unwrap_or(1)..],
        }
    }
    if !notes.is_empty() {
        p.emit(Element::Grace(notes));
    }
    &input[end + 1..]
}

/// `(3`, `(3:2`, `(3:2:3` start a tuplet; a bare `(` opens a slur.
fn tuplet_or_slur<'s>(input: &'s str, p: &mut BodyParser<'_>) -> &'s str {
    let inner = &input[1..];
    let Some((count, mut consumed)) = ending_number(inner) else {
        p.emit(Element::Slur);
        return inner;
    };

    let mut extra = [None, None];
    for slot in &mut extra {
        let Some(after_colon) = inner[consumed..].strip_prefix(':') else {
            break;
        };
        consumed += 1;
        if let Some((value, used)) = ending_number(after_colon) {
            *slot = Some(value as u32);
            consumed += used;
        }
    }

    let p_count = count as u32;
    if p_count < 2 {
        p.diags.warn(format!("invalid tuplet ({p_count}"));
        return &inner[consumed..];
    }
    let q = extra[0].unwrap_or(match p_count {
        2 | 4 | 8 => 3,
        _ => 2,
    });
    let r = extra[1].unwrap_or(p_count);

    p.flush_tuplet();
    p.pending = Some(PendingTuplet {
        tuplet: Tuplet {
            p: p_count,
            q,
            elements: Vec::new(),
        },
        remaining: r,
    });
    &inner[consumed..]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Fraction;
    use pretty_assertions::assert_eq;

    fn parse(input: &str) -> (Vec<Element>, Diagnostics) {
        let mut diags = Diagnostics::new();
        let elements = parse_body(input, 1, &mut diags);
        (elements, diags)
    }

    fn bars(elements: &[Element]) -> Vec<Bar> {
        elements
            .iter()
            .filter_map(|e| match e {
                Element::Bar(b) => Some(*b),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn parses_backend_style_line() {
        let (elements, _) = parse("[V:1] \"C\"C2 E2 G2 c2 | \"G\"B4 d4 |]\n");
        assert_eq!(elements[0], Element::VoiceSwitch("1".into()));
        assert_eq!(elements[1], Element::ChordSymbol("C".into()));
        assert_eq!(bars(&elements), vec![Bar::Single, Bar::Final]);
        assert_eq!(elements.last(), Some(&Element::LineBreak));
    }

    #[test]
    fn rejoins_final_bar_split_by_reflow() {
        let (elements, diags) = parse("C8 |\n]");
        assert_eq!(bars(&elements), vec![Bar::Final]);
        assert!(diags.into_vec().is_empty());
    }

    #[test]
    fn stray_bracket_is_skipped_with_warning() {
        let (elements, diags) = parse("C8 ] D8");
        assert_eq!(elements.len(), 2);
        assert_eq!(diags.into_vec().len(), 1);
    }

    #[test]
    fn parses_repeats_and_endings() {
        let (elements, _) = parse("|: C4 D4 |1 E8 :|2 F8 |]");
        assert_eq!(
            bars(&elements),
            vec![
                Bar::RepeatStart,
                Bar::Single,
                Bar::Ending(1),
                Bar::RepeatEnd,
                Bar::Ending(2),
                Bar::Final
            ]
        );
    }

    #[test]
    fn endings_split_from_their_bar_are_rejoined() {
        let (elements, diags) = parse("|: C8 |\n1 D8 :|\n2 E8 |]");
        assert_eq!(
            bars(&elements),
            vec![
                Bar::RepeatStart,
                Bar::Single,
                Bar::Ending(1),
                Bar::RepeatEnd,
                Bar::Ending(2),
                Bar::Final
            ]
        );
        assert!(diags.into_vec().is_empty());
        let ending = elements
            .iter()
            .position(|e| *e == Element::Bar(Bar::Ending(1)));
        assert_eq!(elements.get(ending.map_or(0, |i| i + 1)), Some(&Element::LineBreak));
    }

    #[test]
    fn digits_after_a_plain_line_break_are_not_endings() {
        let (elements, diags) = parse("C8\n1 D8");
        assert!(!bars(&elements).iter().any(|b| matches!(b, Bar::Ending(_))));
        assert_eq!(diags.into_vec().len(), 1);
    }

    #[test]
    fn collects_triplet_notes() {
        let (elements, _) = parse("(3CDE F2");
        let Element::Tuplet(t) = &elements[0] else {
            panic!("expected tuplet, got {:?}", elements[0]);
        };
        assert_eq!((t.p, t.q, t.elements.len()), (3, 2, 3));
        assert!(matches!(elements[1], Element::Note(_)));
    }

    #[test]
    fn parses_inline_fields_and_decorations() {
        let (elements, _) = parse("[M:3/4] !trill! ~G3 {ag}f2");
        assert_eq!(elements[0], Element::Field('M', "3/4".into()));
        assert_eq!(elements[1], Element::Decoration("trill".into()));
        assert_eq!(elements[2], Element::Decoration("~".into()));
        assert!(matches!(&elements[4], Element::Grace(g) if g.len() == 2));
    }

    #[test]
    fn chords_and_rests() {
        let (elements, _) = parse("[CEG]2 z2 x");
        let Element::Chord(c) = &elements[0] else {
            panic!("expected chord");
        };
        assert_eq!(c.length, Fraction::new(2, 1));
        assert!(matches!(elements[1], Element::Rest(_)));
        assert!(matches!(elements[2], Element::Rest(_)));
    }

    #[test]
    fn voice_line_in_body_switches_voice() {
        let (elements, _) = parse("C8|\nV:2\nE8|\n");
        assert!(elements.contains(&Element::VoiceSwitch("2".into())));
    }
}
