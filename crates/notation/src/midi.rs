//! Standard MIDI File export.
//!
//! One sounding voice gives format 0. Several voices give format 1 with a
//! conductor track (tempo, time signature) and one track per voice, each
//! on its own channel.

use std::collections::{HashMap, HashSet};

use crate::ast::{Accidental, Bar, Element, Fraction, Key, Meter, Note, Step, Tempo, Tune, Voice};

#[derive(Debug, Clone)]
pub struct MidiParams {
    /// Note-on velocity (1-127).
    pub velocity: u8,
    /// Ticks per quarter note.
    pub ticks_per_beat: u16,
    /// Program used when the tune carries no `%%MIDI program`.
    pub program: Option<u8>,
}

impl Default for MidiParams {
    fn default() -> Self {
        MidiParams {
            velocity: 80,
            ticks_per_beat: 480,
            program: None,
        }
    }
}

pub fn generate(tune: &Tune, params: &MidiParams) -> Vec<u8> {
    let sounding: Vec<(usize, &Voice)> = tune
        .voices
        .iter()
        .enumerate()
        .filter(|(_, v)| v.has_sound())
        .collect();

    let timing = Timing::new(tune, params.ticks_per_beat);

    if sounding.len() <= 1 {
        let mut track = Track::new(0);
        conductor_events(&mut track, tune);
        if let Some((index, voice)) = sounding.first() {
            voice_events(&mut track, tune, *index, voice, &timing, params);
        }
        return smf(0, params.ticks_per_beat, vec![track.encode()]);
    }

    let mut tracks = Vec::with_capacity(sounding.len() + 1);
    let mut conductor = Track::new(0);
    conductor_events(&mut conductor, tune);
    tracks.push(conductor.encode());

    for (slot, (index, voice)) in sounding.iter().enumerate() {
        let mut track = Track::new(channel_for(slot));
        if let Some(name) = voice.name.as_deref().or(voice.id.as_deref()) {
            track.meta(0x03, name.as_bytes().to_vec());
        }
        voice_events(&mut track, tune, *index, voice, &timing, params);
        tracks.push(track.encode());
    }

    smf(1, params.ticks_per_beat, tracks)
}

/// Channels in voice order, skipping the General MIDI drum channel.
fn channel_for(slot: usize) -> u8 {
    let channel = if slot >= 9 { slot + 1 } else { slot };
    channel.min(15) as u8
}

struct Timing {
    unit: Fraction,
    ticks_per_whole: u64,
    measure: Fraction,
}

impl Timing {
    fn new(tune: &Tune, ticks_per_beat: u16) -> Self {
        Timing {
            unit: tune.header.unit_length,
            ticks_per_whole: ticks_per_beat as u64 * 4,
            measure: tune.header.meter.measure_length(),
        }
    }

    /// Ticks for `length` units of `L:`.
    fn ticks(&self, length: Fraction) -> u32 {
        let whole = self.unit.times(length);
        if whole.den == 0 {
            return 0;
        }
        clamp_ticks(self.ticks_per_whole * whole.num as u64 / whole.den as u64)
    }

    fn measure_ticks(&self) -> u32 {
        if self.measure.den == 0 {
            return 0;
        }
        clamp_ticks(self.ticks_per_whole * self.measure.num as u64 / self.measure.den as u64)
    }
}

fn clamp_ticks(ticks: u64) -> u32 {
    u32::try_from(ticks).unwrap_or(u32::MAX)
}

fn conductor_events(track: &mut Track, tune: &Tune) {
    track.meta(0x51, microseconds_per_quarter(&tune.header.tempo).to_be_bytes()[1..].to_vec());
    let (num, den) = time_signature(tune.header.meter);
    let den_power = (den.max(1) as f64).log2().round() as u8;
    track.meta(0x58, vec![num.min(255) as u8, den_power, 24, 8]);
    let fifths = tune.header.key.fifths().clamp(-7, 7);
    let minor = matches!(tune.header.key.mode, crate::ast::Mode::Minor) as u8;
    track.meta(0x59, vec![fifths as u8, minor]);
}

fn time_signature(meter: Meter) -> (u32, u32) {
    match meter {
        Meter::Common | Meter::Free => (4, 4),
        Meter::Cut => (2, 2),
        Meter::Ratio(num, den) => (num, den),
    }
}

/// Tempo as microseconds per quarter note, whatever the `Q:` beat unit.
pub fn microseconds_per_quarter(tempo: &Tempo) -> u32 {
    let beat = if tempo.beat.num == 0 || tempo.beat.den == 0 {
        Fraction::new(1, 4)
    } else {
        tempo.beat
    };
    let bpm = tempo.bpm.max(1) as u64;
    let per_minute = bpm.saturating_mul(4).saturating_mul(beat.num as u64);
    let us = 60_000_000u64 * beat.den as u64 / per_minute;
    us.min(0xFF_FFFF) as u32
}

fn voice_events(
    track: &mut Track,
    tune: &Tune,
    index: usize,
    voice: &Voice,
    timing: &Timing,
    params: &MidiParams,
) {
    if let Some(program) = tune.header.program_for(index).or(params.program) {
        track.channel_event(0xC0, &[program & 0x7F]);
    }

    let key = &tune.header.key;
    let mut accidentals = BarAccidentals::new(key);
    let mut held: HashSet<u8> = HashSet::new();
    let velocity = params.velocity.clamp(1, 127);

    for element in expand_repeats(&voice.elements) {
        match &element {
            Element::Note(note) => {
                let pitch = accidentals.pitch(note);
                let ticks = timing.ticks(note.length);
                if !held.remove(&pitch) {
                    track.note_on(pitch, velocity);
                }
                track.advance(ticks);
                if note.tied {
                    held.insert(pitch);
                } else {
                    track.note_off(pitch);
                }
            }
            Element::Chord(chord) => {
                let pitches: Vec<u8> = chord.notes.iter().map(|n| accidentals.pitch(n)).collect();
                for &pitch in &pitches {
                    if !held.remove(&pitch) {
                        track.note_on(pitch, velocity);
                    }
                }
                track.advance(timing.ticks(chord.length));
                for (note, &pitch) in chord.notes.iter().zip(&pitches) {
                    if note.tied {
                        held.insert(pitch);
                    } else {
                        track.note_off(pitch);
                    }
                }
            }
            Element::Rest(rest) => match rest.measures {
                Some(count) => track.advance(timing.measure_ticks().saturating_mul(count)),
                None => track.advance(timing.ticks(rest.length)),
            },
            Element::Tuplet(tuplet) => {
                for inner in &tuplet.elements {
                    let (notes, length): (Vec<&Note>, Fraction) = match inner {
                        Element::Note(n) => (vec![n], n.length),
                        Element::Chord(c) => (c.notes.iter().collect(), c.length),
                        Element::Rest(r) => (Vec::new(), r.length),
                        _ => continue,
                    };
                    let ticks = clamp_ticks(
                        timing.ticks(length) as u64 * tuplet.q as u64 / tuplet.p.max(1) as u64,
                    );
                    let pitches: Vec<u8> = notes.iter().map(|n| accidentals.pitch(n)).collect();
                    for &pitch in &pitches {
                        track.note_on(pitch, velocity);
                    }
                    track.advance(ticks);
                    for &pitch in &pitches {
                        track.note_off(pitch);
                    }
                }
            }
            Element::Bar(_) => accidentals.reset(),
            _ => {}
        }
    }

    let mut remaining: Vec<u8> = held.into_iter().collect();
    remaining.sort_unstable();
    for pitch in remaining {
        track.note_off(pitch);
    }
}

/// Key signature plus accidentals written earlier in the current bar.
struct BarAccidentals<'k> {
    key: &'k Key,
    bar: HashMap<Step, Accidental>,
}

impl<'k> BarAccidentals<'k> {
    fn new(key: &'k Key) -> Self {
        BarAccidentals {
            key,
            bar: HashMap::new(),
        }
    }

    fn reset(&mut self) {
        self.bar.clear();
    }

    /// MIDI pitch; `C` is middle C (60), `c` an octave above.
    fn pitch(&mut self, note: &Note) -> u8 {
        if let Some(acc) = note.accidental {
            self.bar.insert(note.step, acc);
        }
        let offset = self
            .bar
            .get(&note.step)
            .copied()
            .or_else(|| self.key.accidental_for(note.step))
            .map(|a| a.offset())
            .unwrap_or(0);
        let pitch = (note.octave as i16 + 5) * 12 + note.step.semitone() + offset;
        pitch.clamp(0, 127) as u8
    }
}

/// Unroll `|: ... :|` once. On the second pass the first ending is skipped.
fn expand_repeats(elements: &[Element]) -> Vec<Element> {
    let mut out: Vec<Element> = Vec::with_capacity(elements.len());
    let mut section_start = 0;

    for element in elements {
        match element {
            Element::Bar(Bar::RepeatStart) => {
                out.push(element.clone());
                section_start = out.len();
            }
            Element::Bar(bar) if bar.is_repeat_end() => {
                out.push(Element::Bar(Bar::RepeatEnd));
                let section = &out[section_start..out.len() - 1];
                let replay_len = section
                    .iter()
                    .position(|e| matches!(e, Element::Bar(Bar::Ending(1))))
                    .unwrap_or(section.len());
                let replay: Vec<Element> = section[..replay_len].to_vec();
                out.extend(replay);
                section_start = out.len();
            }
            _ => out.push(element.clone()),
        }
    }
    out
}

struct Event {
    tick: u32,
    data: Vec<u8>,
}

struct Track {
    channel: u8,
    tick: u32,
    events: Vec<Event>,
}

impl Track {
    fn new(channel: u8) -> Self {
        Track {
            channel: channel & 0x0F,
            tick: 0,
            events: Vec::new(),
        }
    }

    fn advance(&mut self, ticks: u32) {
        self.tick = self.tick.saturating_add(ticks);
    }

    fn note_on(&mut self, pitch: u8, velocity: u8) {
        self.channel_event(0x90, &[pitch, velocity]);
    }

    fn note_off(&mut self, pitch: u8) {
        self.channel_event(0x80, &[pitch, 0]);
    }

    fn channel_event(&mut self, status: u8, data: &[u8]) {
        let mut bytes = vec![status | self.channel];
        bytes.extend_from_slice(data);
        self.events.push(Event {
            tick: self.tick,
            data: bytes,
        });
    }

    fn meta(&mut self, kind: u8, data: Vec<u8>) {
        let mut bytes = vec![0xFF, kind];
        bytes.extend(vlq(data.len() as u32));
        bytes.extend(data);
        self.events.push(Event {
            tick: self.tick,
            data: bytes,
        });
    }

    fn encode(self) -> Vec<u8> {
        let mut out = Vec::new();
        let mut last = 0u32;
        for event in &self.events {
            out.extend(vlq(event.tick.saturating_sub(last)));
            out.extend_from_slice(&event.data);
            last = event.tick;
        }
        out.extend_from_slice(&[0x00, 0xFF, 0x2F, 0x00]);
        out
    }
}

fn smf(format: u16, ticks_per_beat: u16, tracks: Vec<Vec<u8>>) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"MThd");
    out.extend_from_slice(&6u32.to_be_bytes());
    out.extend_from_slice(&format.to_be_bytes());
    out.extend_from_slice(&(tracks.len() as u16).to_be_bytes());
    out.extend_from_slice(&ticks_per_beat.to_be_bytes());
    for track in tracks {
        out.extend_from_slice(b"MTrk");
        out.extend_from_slice(&(track.len() as u32).to_be_bytes());
        out.extend(track);
    }
    out
}

/// MIDI variable-length quantity.
fn vlq(mut value: u32) -> Vec<u8> {
    let mut bytes = vec![(value & 0x7F) as u8];
    value >>= 7;
    while value > 0 {
        bytes.push(((value & 0x7F) | 0x80) as u8);
        value >>= 7;
    }
    bytes.reverse();
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use pretty_assertions::assert_eq;

    /// Pitches of every note-on, walking the track chunks.
    fn note_ons(bytes: &[u8]) -> Vec<u8> {
        let mut pitches = Vec::new();
        let mut chunk = 14;
        while chunk + 8 <= bytes.len() {
            let len = u32::from_be_bytes([
                bytes[chunk + 4],
                bytes[chunk + 5],
                bytes[chunk + 6],
                bytes[chunk + 7],
            ]) as usize;
            let end = chunk + 8 + len;
            let mut i = chunk + 8;
            while i < end {
                while bytes[i] & 0x80 != 0 {
                    i += 1;
                }
                i += 1;
                match bytes[i] {
                    0xFF => i += 3 + bytes[i + 2] as usize,
                    s if s & 0xF0 == 0x90 => {
                        pitches.push(bytes[i + 1]);
                        i += 3;
                    }
                    s if s & 0xF0 == 0xC0 => i += 2,
                    _ => i += 3,
                }
            }
            chunk = end;
        }
        pitches
    }

    #[test]
    fn variable_length_quantities() {
        assert_eq!(vlq(0), vec![0x00]);
        assert_eq!(vlq(0x7F), vec![0x7F]);
        assert_eq!(vlq(0x80), vec![0x81, 0x00]);
        assert_eq!(vlq(0x0FFF_FFFF), vec![0xFF, 0xFF, 0xFF, 0x7F]);
    }

    #[test]
    fn tempo_in_quarter_microseconds() {
        let tempo = Tempo {
            beat: Fraction::new(1, 4),
            bpm: 120,
        };
        assert_eq!(microseconds_per_quarter(&tempo), 500_000);
        let half = Tempo {
            beat: Fraction::new(1, 2),
            bpm: 60,
        };
        assert_eq!(microseconds_per_quarter(&half), 500_000);
    }

    #[test]
    fn single_voice_is_format_zero() {
        let tune = parse("X:1\nL:1/4\nK:C\nC D E F|\n").value;
        let bytes = generate(&tune, &MidiParams::default());
        assert_eq!(&bytes[..4], b"MThd");
        assert_eq!(u16::from_be_bytes([bytes[8], bytes[9]]), 0);
        assert_eq!(u16::from_be_bytes([bytes[10], bytes[11]]), 1);
        assert_eq!(note_ons(&bytes), vec![60, 62, 64, 65]);
    }

    #[test]
    fn key_and_bar_accidentals() {
        let tune = parse("X:1\nL:1/4\nK:G\nF ^c c c | c\n").value;
        let bytes = generate(&tune, &MidiParams::default());
        assert_eq!(note_ons(&bytes), vec![66, 73, 73, 73, 72]);
    }

    #[test]
    fn multiple_voices_are_format_one() {
        let text = "X:1\nL:1/4\n%%MIDI program 2 32\nK:C\nV:1\nV:2\n[V:1] c4|\n[V:2] C,4|\n";
        let bytes = generate(&parse(text).value, &MidiParams::default());
        assert_eq!(u16::from_be_bytes([bytes[8], bytes[9]]), 1);
        assert_eq!(u16::from_be_bytes([bytes[10], bytes[11]]), 3);
        assert!(bytes.windows(2).any(|w| w == [0xC1, 32]));
    }

    #[test]
    fn absurd_lengths_and_tempos_still_encode() {
        let slashes = "/".repeat(40);
        let text = format!("X:1\nQ:4294967295/1=4294967295\nK:C\nC{slashes}|D4294967295|(3CDE|\n");
        let tune = parse(&text).value;
        let bytes = generate(&tune, &MidiParams::default());
        assert_eq!(&bytes[..4], b"MThd");
        assert_eq!(note_ons(&bytes), vec![60, 62, 60, 62, 64]);
    }

    #[test]
    fn repeats_skip_first_ending_on_replay() {
        let tune = parse("X:1\nL:1/4\nK:C\n|: C |1 D :|2 E |]\n").value;
        let bytes = generate(&tune, &MidiParams::default());
        assert_eq!(note_ons(&bytes), vec![60, 62, 60, 64]);
    }
}
