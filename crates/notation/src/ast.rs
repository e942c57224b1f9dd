//! Syntax tree for the subset of ABC notation MelodyCraft scores use.
//!
//! The generation backend emits single-tune ABC with a header block,
//! optional voice definitions and `[V:n]` switches in the body. Everything
//! here is serializable so parsed tunes can be inspected or cached by callers.

use serde::{Deserialize, Serialize};

/// A parsed tune: header metadata plus one element stream per voice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tune {
    pub header: Header,
    pub voices: Vec<Voice>,
}

impl Tune {
    /// Number of bar lines across every voice.
    pub fn bar_count(&self) -> usize {
        self.voices.iter().map(Voice::bar_count).sum()
    }

    /// True when no voice carries a single note, chord or rest.
    pub fn is_silent(&self) -> bool {
        self.voices.iter().all(|v| !v.has_sound())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Header {
    pub reference: u32,
    pub title: Option<String>,
    pub meter: Meter,
    pub unit_length: Fraction,
    pub tempo: Tempo,
    pub key: Key,
    pub voices: Vec<VoiceDef>,
    /// `%%MIDI program` directives: (1-based voice index, program).
    /// A directive without a voice index is stored with index 0.
    pub programs: Vec<(u8, u8)>,
}

impl Default for Header {
    fn default() -> Self {
        Header {
            reference: 1,
            title: None,
            meter: Meter::default(),
            unit_length: Fraction::new(1, 8),
            tempo: Tempo::default(),
            key: Key::default(),
            voices: Vec::new(),
            programs: Vec::new(),
        }
    }
}

impl Header {
    /// Program for the voice at `index` (0-based position in the tune).
    pub fn program_for(&self, index: usize) -> Option<u8> {
        let wanted = (index + 1) as u8;
        self.programs
            .iter()
            .find(|(voice, _)| *voice == wanted)
            .or_else(|| self.programs.iter().find(|(voice, _)| *voice == 0))
            .map(|(_, program)| *program)
    }
}

/// A simple ratio, used for meters, unit lengths and note durations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fraction {
    pub num: u32,
    pub den: u32,
}

impl Fraction {
    pub const fn new(num: u32, den: u32) -> Self {
        Fraction { num, den }
    }

    pub fn as_f64(&self) -> f64 {
        if self.den == 0 {
            0.0
        } else {
            self.num as f64 / self.den as f64
        }
    }

    /// Product in lowest terms. Values too large for `u32` lose precision
    /// rather than overflow.
    pub fn times(&self, other: Fraction) -> Fraction {
        let mut num = self.num as u64 * other.num as u64;
        let mut den = self.den as u64 * other.den as u64;
        let divisor = gcd(num, den);
        if divisor > 1 {
            num /= divisor;
            den /= divisor;
        }
        while num > u32::MAX as u64 || den > u32::MAX as u64 {
            num >>= 1;
            den = (den >> 1).max(1);
        }
        Fraction::new(num as u32, den as u32)
    }
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Meter {
    /// `M:C`
    Common,
    /// `M:C|`
    Cut,
    Ratio(u32, u32),
    Free,
}

impl Default for Meter {
    fn default() -> Self {
        Meter::Ratio(4, 4)
    }
}

impl Meter {
    /// Length of one measure as a fraction of a whole note.
    pub fn measure_length(&self) -> Fraction {
        match self {
            Meter::Common | Meter::Free => Fraction::new(4, 4),
            Meter::Cut => Fraction::new(2, 2),
            Meter::Ratio(num, den) => Fraction::new(*num, *den),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tempo {
    /// Beat unit as a fraction of a whole note, `1/4` for `Q:1/4=120`.
    pub beat: Fraction,
    pub bpm: u32,
}

impl Default for Tempo {
    fn default() -> Self {
        Tempo {
            beat: Fraction::new(1, 4),
            bpm: 120,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Step {
    C,
    D,
    E,
    F,
    G,
    A,
    B,
}

impl Step {
    pub fn from_letter(letter: char) -> Option<Step> {
        match letter.to_ascii_uppercase() {
            'C' => Some(Step::C),
            'D' => Some(Step::D),
            'E' => Some(Step::E),
            'F' => Some(Step::F),
            'G' => Some(Step::G),
            'A' => Some(Step::A),
            'B' => Some(Step::B),
            _ => None,
        }
    }

    /// Semitones above C.
    pub fn semitone(&self) -> i16 {
        match self {
            Step::C => 0,
            Step::D => 2,
            Step::E => 4,
            Step::F => 5,
            Step::G => 7,
            Step::A => 9,
            Step::B => 11,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Accidental {
    DoubleSharp,
    Sharp,
    Natural,
    Flat,
    DoubleFlat,
}

impl Accidental {
    pub fn offset(&self) -> i16 {
        match self {
            Accidental::DoubleSharp => 2,
            Accidental::Sharp => 1,
            Accidental::Natural => 0,
            Accidental::Flat => -1,
            Accidental::DoubleFlat => -2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Mode {
    #[default]
    Major,
    Minor,
    Dorian,
    Phrygian,
    Lydian,
    Mixolydian,
    Locrian,
}

impl Mode {
    /// Accepts the usual abbreviations (`m`, `min`, `dor`, `mix`, ...).
    pub fn parse(s: &str) -> Option<Mode> {
        let lowered = s.to_ascii_lowercase();
        let head = lowered.get(..3).unwrap_or(&lowered);
        match head {
            "" | "maj" | "ion" => Some(Mode::Major),
            "m" | "mi" | "min" | "aeo" => Some(Mode::Minor),
            "dor" => Some(Mode::Dorian),
            "phr" => Some(Mode::Phrygian),
            "lyd" => Some(Mode::Lydian),
            "mix" => Some(Mode::Mixolydian),
            "loc" => Some(Mode::Locrian),
            _ => None,
        }
    }

    /// Shift in fifths relative to the major key on the same tonic.
    fn fifths_shift(&self) -> i8 {
        match self {
            Mode::Major => 0,
            Mode::Lydian => 1,
            Mode::Mixolydian => -1,
            Mode::Dorian => -2,
            Mode::Minor => -3,
            Mode::Phrygian => -4,
            Mode::Locrian => -5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Key {
    pub tonic: Option<(Step, Option<Accidental>)>,
    pub mode: Mode,
}

impl Key {
    /// Sharps (positive) or flats (negative) in the signature.
    pub fn fifths(&self) -> i8 {
        let Some((step, accidental)) = self.tonic else {
            return 0;
        };
        let major = match (step, accidental) {
            (Step::C, None) => 0,
            (Step::G, None) => 1,
            (Step::D, None) => 2,
            (Step::A, None) => 3,
            (Step::E, None) => 4,
            (Step::B, None) => 5,
            (Step::F, Some(Accidental::Sharp)) => 6,
            (Step::C, Some(Accidental::Sharp)) => 7,
            (Step::F, None) => -1,
            (Step::B, Some(Accidental::Flat)) => -2,
            (Step::E, Some(Accidental::Flat)) => -3,
            (Step::A, Some(Accidental::Flat)) => -4,
            (Step::D, Some(Accidental::Flat)) => -5,
            (Step::G, Some(Accidental::Flat)) => -6,
            (Step::C, Some(Accidental::Flat)) => -7,
            (Step::G, Some(Accidental::Sharp)) => 8,
            (Step::D, Some(Accidental::Sharp)) => 9,
            (Step::A, Some(Accidental::Sharp)) => 10,
            _ => 0,
        };
        major + self.mode.fifths_shift()
    }

    /// The accidental the signature applies to `step`, if any.
    pub fn accidental_for(&self, step: Step) -> Option<Accidental> {
        const SHARP_ORDER: [Step; 7] = [Step::F, Step::C, Step::G, Step::D, Step::A, Step::E, Step::B];
        const FLAT_ORDER: [Step; 7] = [Step::B, Step::E, Step::A, Step::D, Step::G, Step::C, Step::F];

        let fifths = self.fifths().clamp(-7, 7);
        if fifths > 0 {
            SHARP_ORDER[..fifths as usize]
                .contains(&step)
                .then_some(Accidental::Sharp)
        } else if fifths < 0 {
            FLAT_ORDER[..(-fifths) as usize]
                .contains(&step)
                .then_some(Accidental::Flat)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceDef {
    pub id: String,
    pub name: Option<String>,
    pub clef: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Voice {
    pub id: Option<String>,
    pub name: Option<String>,
    pub elements: Vec<Element>,
}

impl Voice {
    pub fn bar_count(&self) -> usize {
        self.elements
            .iter()
            .filter(|e| matches!(e, Element::Bar(_)))
            .count()
    }

    pub fn has_sound(&self) -> bool {
        self.elements.iter().any(|e| match e {
            Element::Note(_) | Element::Chord(_) | Element::Rest(_) => true,
            Element::Tuplet(t) => !t.elements.is_empty(),
            _ => false,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Element {
    Note(Note),
    Chord(Chord),
    Rest(Rest),
    Bar(Bar),
    Tuplet(Tuplet),
    /// Grace notes take no time in playback.
    Grace(Vec<Note>),
    ChordSymbol(String),
    Decoration(String),
    /// Inline field other than a voice switch, e.g. `[M:3/4]`.
    Field(char, String),
    VoiceSwitch(String),
    Slur,
    LineBreak,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub step: Step,
    /// 0 for `C`..`B`, 1 for `c`..`b`, adjusted by `'` and `,`.
    pub octave: i8,
    pub accidental: Option<Accidental>,
    pub length: Fraction,
    pub tied: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chord {
    pub notes: Vec<Note>,
    pub length: Fraction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rest {
    pub length: Fraction,
    /// `Z4`: whole measures of rest.
    pub measures: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Bar {
    Single,
    Double,
    /// `|]`
    Final,
    /// `[|`
    Thick,
    RepeatStart,
    RepeatEnd,
    RepeatBoth,
    Ending(u8),
}

impl Bar {
    pub fn is_repeat_end(&self) -> bool {
        matches!(self, Bar::RepeatEnd | Bar::RepeatBoth)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tuplet {
    pub p: u32,
    pub q: u32,
    pub elements: Vec<Element>,
}
