//! Reflow ABC text into display lines of a fixed number of bars.

/// Bars per display line when nothing else is configured.
pub const DEFAULT_MEASURES_PER_LINE: usize = 4;

/// Rewrap the body of `text` so every line carries `measures_per_line` bars.
///
/// Lines before the first line containing `|` are header and pass through
/// untouched. From that line on everything is body: the body lines are
/// joined with single spaces, trimmed, and a newline is inserted right
/// after every `measures_per_line`-th `|`. A count of 0 inserts no breaks.
///
/// Text without any `|` comes back unchanged.
pub fn reflow(text: &str, measures_per_line: usize) -> String {
    if text.is_empty() {
        return String::new();
    }

    let mut header: Vec<&str> = Vec::new();
    let mut body: Vec<&str> = Vec::new();
    for line in text.split('\n') {
        if body.is_empty() && !line.contains('|') {
            header.push(line);
        } else {
            body.push(line);
        }
    }

    let joined = body.join(" ");
    let joined = joined.trim();
    if joined.is_empty() {
        return text.to_string();
    }

    let mut wrapped = String::with_capacity(joined.len() + joined.len() / 8);
    let mut bars = 0usize;
    for ch in joined.chars() {
        wrapped.push(ch);
        if ch == '|' {
            bars += 1;
            if measures_per_line > 0 && bars % measures_per_line == 0 {
                wrapped.push('\n');
            }
        }
    }

    header.push(&wrapped);
    header.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wraps_every_fourth_bar() {
        assert_eq!(reflow("A|B|C|D|E|", 4), "A|B|C|D|\nE|");
    }

    #[test]
    fn empty_and_separator_free_input_is_unchanged() {
        assert_eq!(reflow("", 4), "");
        let header_only = "X:1\nT:Nothing yet\nK:C";
        assert_eq!(reflow(header_only, 4), header_only);
        assert_eq!(reflow("CDEF GABc", 2), "CDEF GABc");
    }

    #[test]
    fn header_lines_are_preserved() {
        let text = "X:1\nM:4/4\nK:C\nC2 D2 | E4 |\nF4 | G4 |\nc8 |]";
        assert_eq!(
            reflow(text, 2),
            "X:1\nM:4/4\nK:C\nC2 D2 | E4 |\n F4 | G4 |\n c8 |]"
        );
    }

    #[test]
    fn lines_after_body_start_are_body_even_without_bars() {
        let text = "X:1\nC4 |\n%comment\nD4 |";
        assert_eq!(reflow(text, 8), "X:1\nC4 | %comment D4 |");
    }

    #[test]
    fn break_count_is_floor_of_bars_over_width() {
        let body = "a|".repeat(11);
        for m in 1..=6 {
            let out = reflow(&body, m);
            assert_eq!(out.matches('\n').count(), 11 / m, "m = {m}");
        }
    }

    #[test]
    fn breaks_follow_every_mth_separator() {
        let out = reflow("a|b|c|d|e|f|g|", 3);
        let positions: Vec<usize> = out
            .char_indices()
            .filter(|(_, c)| *c == '\n')
            .map(|(i, _)| i)
            .collect();
        for pos in positions {
            assert_eq!(&out[pos - 1..pos], "|");
            let bars_before = out[..pos].matches('|').count();
            assert_eq!(bars_before % 3, 0);
        }
    }

    #[test]
    fn reflow_is_stable_on_its_own_output() {
        let text = "X:1\nK:C\nC|D|E|F|G|A|B|c|d|";
        let once = reflow(text, 4);
        let twice = reflow(&once, 4);
        assert_eq!(once, "X:1\nK:C\nC|D|E|F|\nG|A|B|c|\nd|");
        assert_eq!(twice, "X:1\nK:C\nC|D|E|F|\n G|A|B|c|\n d|");

        let groups = |s: &str| -> Vec<String> {
            s.lines()
                .skip(2)
                .map(|l| l.trim().to_string())
                .collect()
        };
        assert_eq!(groups(&once), groups(&twice));
    }

    #[test]
    fn repeat_endings_survive_every_width() {
        use notation::{Bar, Element};

        let tune = "X:1\nK:C\n|: C8 | D8 | E8 |1 F8 :|2 G8 |]";
        let bars = |text: &str| -> Vec<Bar> {
            let parsed = notation::parse(text);
            assert!(parsed.diagnostics.is_empty(), "{:?}", parsed.diagnostics);
            parsed.value.voices[0]
                .elements
                .iter()
                .filter_map(|e| match e {
                    Element::Bar(b) => Some(*b),
                    _ => None,
                })
                .collect()
        };

        let expected = bars(tune);
        assert!(expected.contains(&Bar::Ending(1)));
        assert!(expected.contains(&Bar::Ending(2)));
        for m in 1..=6 {
            assert_eq!(bars(&reflow(tune, m)), expected, "m = {m}");
        }
    }

    #[test]
    fn zero_width_inserts_no_breaks() {
        assert_eq!(reflow("A|B|\nC|", 0), "A|B| C|");
    }
}
