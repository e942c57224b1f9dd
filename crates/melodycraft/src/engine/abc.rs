//! The stock engine: `notation` for parsing and layout, RustySynth for sound.
//!
//! Synthesis renders the whole tune to PCM while priming, then streams it
//! into a [`PcmContext`] one measure at a time at real-time pace.

use super::{
    AudioContext, ContextState, EndedSignal, Engine, EngineError, Notation, RenderOptions,
    SynthOptions, Synthesizer,
};
use async_trait::async_trait;
use hound::{WavSpec, WavWriter};
use melodyconf::MediaConfig;
use notation::{LayoutOptions, MidiParams, Score};
use rustysynth::{MidiFile, MidiFileSequencer, SoundFont, SynthesizerSettings};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Seconds rendered past the last event so releases ring out.
const RELEASE_TAIL_SECONDS: f64 = 1.0;

pub struct AbcEngine {
    soundfont: Option<Arc<SoundFont>>,
    soundfont_path: Option<PathBuf>,
    sample_rate: u32,
    midi: MidiParams,
    last_output: Mutex<Option<PcmContext>>,
}

impl AbcEngine {
    /// Load the first SoundFont found in `media.soundfont_dirs`.
    ///
    /// No SoundFont anywhere gives an engine without audio. A SoundFont that
    /// exists but will not load is an error.
    pub fn load(media: &MediaConfig) -> Result<Self, EngineError> {
        match find_soundfont(&media.soundfont_dirs) {
            Some(path) => Self::with_soundfont(&path, media.sample_rate),
            None => {
                info!(
                    dirs = ?media.soundfont_dirs,
                    "no soundfont found, playback disabled"
                );
                Ok(Self::silent(media.sample_rate))
            }
        }
    }

    pub fn with_soundfont(path: &Path, sample_rate: u32) -> Result<Self, EngineError> {
        let soundfont_error = |message: String| EngineError::SoundFont {
            path: path.to_path_buf(),
            message,
        };

        let bytes = std::fs::read(path).map_err(|e| soundfont_error(e.to_string()))?;
        let soundfont = SoundFont::new(&mut Cursor::new(bytes))
            .map_err(|e| soundfont_error(format!("{e:?}")))?;
        info!(path = %path.display(), sample_rate, "soundfont loaded");

        Ok(AbcEngine {
            soundfont: Some(Arc::new(soundfont)),
            soundfont_path: Some(path.to_path_buf()),
            sample_rate,
            midi: MidiParams::default(),
            last_output: Mutex::new(None),
        })
    }

    /// Notation and MIDI export only.
    pub fn silent(sample_rate: u32) -> Self {
        AbcEngine {
            soundfont: None,
            soundfont_path: None,
            sample_rate,
            midi: MidiParams::default(),
            last_output: Mutex::new(None),
        }
    }

    pub fn soundfont_path(&self) -> Option<&Path> {
        self.soundfont_path.as_deref()
    }

    /// The most recently created audio context, for capturing what played.
    pub fn last_output(&self) -> Option<PcmContext> {
        self.last_output
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// First `.sf2` file, by name, in the first directory that has one.
pub fn find_soundfont(dirs: &[PathBuf]) -> Option<PathBuf> {
    dirs.iter().find_map(|dir| {
        let mut found: Vec<PathBuf> = std::fs::read_dir(dir)
            .ok()?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.is_file()
                    && path
                        .extension()
                        .is_some_and(|ext| ext.eq_ignore_ascii_case("sf2"))
            })
            .collect();
        found.sort();
        found.into_iter().next()
    })
}

impl Engine for AbcEngine {
    type Notation = AbcNotation;
    type Context = PcmContext;
    type Synth = SoundFontSynth;

    fn render(&self, text: &str, options: &RenderOptions) -> Result<AbcNotation, EngineError> {
        let layout = LayoutOptions {
            measures_per_line: options.measures_per_line,
        };
        let score = notation::render(text, layout)?;
        for warning in score
            .diagnostics()
            .iter()
            .filter(|d| d.severity != notation::Severity::Info)
        {
            debug!(line = warning.line, "{}", warning.message);
        }
        Ok(AbcNotation { score })
    }

    fn export_midi(&self, text: &str) -> Result<Vec<u8>, EngineError> {
        let score = notation::render(text, LayoutOptions::default())?;
        Ok(notation::to_midi(score.tune(), &self.midi))
    }

    fn supports_audio(&self) -> bool {
        self.soundfont.is_some()
    }

    fn create_context(&self) -> Result<PcmContext, EngineError> {
        let context = PcmContext::new(self.sample_rate);
        *self
            .last_output
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(context.clone());
        Ok(context)
    }

    fn create_synth(&self) -> Result<SoundFontSynth, EngineError> {
        let soundfont = self.soundfont.clone().ok_or(EngineError::NoAudio)?;
        Ok(SoundFontSynth::new(soundfont, self.sample_rate, self.midi.clone()))
    }
}

/// A laid-out ABC score.
#[derive(Debug)]
pub struct AbcNotation {
    score: Score,
}

impl AbcNotation {
    pub fn score(&self) -> &Score {
        &self.score
    }
}

impl Notation for AbcNotation {
    fn milliseconds_per_measure(&self) -> f64 {
        self.score.milliseconds_per_measure()
    }

    fn measure_count(&self) -> usize {
        self.score.measure_count()
    }
}

/// In-memory stereo output. Clones share the same buffer.
#[derive(Debug, Clone)]
pub struct PcmContext {
    sample_rate: u32,
    inner: Arc<Mutex<PcmBuffer>>,
}

#[derive(Debug)]
struct PcmBuffer {
    state: ContextState,
    left: Vec<f32>,
    right: Vec<f32>,
}

impl PcmContext {
    pub fn new(sample_rate: u32) -> Self {
        PcmContext {
            sample_rate,
            inner: Arc::new(Mutex::new(PcmBuffer {
                state: ContextState::Suspended,
                left: Vec::new(),
                right: Vec::new(),
            })),
        }
    }

    fn buffer(&self) -> std::sync::MutexGuard<'_, PcmBuffer> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Append frames. Returns false once the context is closed.
    pub fn write(&self, left: &[f32], right: &[f32]) -> bool {
        let mut buffer = self.buffer();
        if buffer.state == ContextState::Closed {
            return false;
        }
        buffer.left.extend_from_slice(left);
        buffer.right.extend_from_slice(right);
        true
    }

    /// Stereo frames written so far.
    pub fn frames(&self) -> usize {
        self.buffer().left.len()
    }

    pub fn write_wav(&self, path: &Path) -> Result<(), EngineError> {
        let spec = WavSpec {
            channels: 2,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let buffer = self.buffer();
        let mut writer = WavWriter::create(path, spec)?;
        for (&l, &r) in buffer.left.iter().zip(buffer.right.iter()) {
            writer.write_sample(to_i16(l))?;
            writer.write_sample(to_i16(r))?;
        }
        writer.finalize()?;
        Ok(())
    }
}

fn to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

#[async_trait]
impl AudioContext for PcmContext {
    async fn resume(&self) -> Result<(), EngineError> {
        let mut buffer = self.buffer();
        match buffer.state {
            ContextState::Closed => Err(EngineError::Context(
                "cannot resume a closed context".to_string(),
            )),
            _ => {
                buffer.state = ContextState::Running;
                Ok(())
            }
        }
    }

    fn close(&self) {
        self.buffer().state = ContextState::Closed;
    }

    fn state(&self) -> ContextState {
        self.buffer().state
    }
}

struct Prepared {
    midi: Arc<MidiFile>,
    context: Arc<PcmContext>,
    frames_per_measure: usize,
    on_ended: EndedSignal,
}

pub struct SoundFontSynth {
    soundfont: Arc<SoundFont>,
    sample_rate: u32,
    midi_params: MidiParams,
    prepared: Option<Prepared>,
    rendered: Option<(Vec<f32>, Vec<f32>)>,
    task: Option<JoinHandle<()>>,
}

impl SoundFontSynth {
    fn new(soundfont: Arc<SoundFont>, sample_rate: u32, midi_params: MidiParams) -> Self {
        SoundFontSynth {
            soundfont,
            sample_rate,
            midi_params,
            prepared: None,
            rendered: None,
            task: None,
        }
    }
}

fn frames_per_measure(milliseconds_per_measure: f64, sample_rate: u32) -> usize {
    if milliseconds_per_measure.is_finite() && milliseconds_per_measure > 0.0 {
        ((milliseconds_per_measure / 1000.0) * sample_rate as f64).round().max(1.0) as usize
    } else {
        (sample_rate as usize / 2).max(1)
    }
}

fn render_pcm(
    soundfont: &Arc<SoundFont>,
    midi: &Arc<MidiFile>,
    sample_rate: u32,
) -> Result<(Vec<f32>, Vec<f32>), EngineError> {
    let settings = SynthesizerSettings::new(sample_rate as i32);
    let synthesizer = rustysynth::Synthesizer::new(soundfont, &settings)
        .map_err(|e| EngineError::Synth(format!("failed to create synthesizer: {e}")))?;

    let mut sequencer = MidiFileSequencer::new(synthesizer);
    sequencer.play(midi, false);

    let total = midi.get_length() + RELEASE_TAIL_SECONDS;
    let frames = (sample_rate as f64 * total) as usize;
    let mut left = vec![0f32; frames];
    let mut right = vec![0f32; frames];
    sequencer.render(&mut left[..], &mut right[..]);
    Ok((left, right))
}

/// Write `left`/`right` into `context` in `chunk_frames` slices, sleeping
/// one chunk's duration after each, then fire `on_ended`. A context that
/// closes mid-stream ends the stream without firing.
pub(crate) async fn stream_pcm(
    context: Arc<PcmContext>,
    left: Vec<f32>,
    right: Vec<f32>,
    chunk_frames: usize,
    on_ended: EndedSignal,
) {
    let chunk_frames = chunk_frames.max(1);
    let rate = context.sample_rate().max(1) as f64;
    let chunk_time = Duration::from_secs_f64(chunk_frames as f64 / rate);

    for (l, r) in left.chunks(chunk_frames).zip(right.chunks(chunk_frames)) {
        if !context.write(l, r) {
            debug!(session = on_ended.session(), "context closed, stream abandoned");
            return;
        }
        tokio::time::sleep(chunk_time).await;
    }

    debug!(session = on_ended.session(), frames = left.len(), "stream finished");
    on_ended.fire();
}

#[async_trait]
impl Synthesizer for SoundFontSynth {
    type Notation = AbcNotation;
    type Context = PcmContext;

    async fn init(
        &mut self,
        options: SynthOptions<AbcNotation, PcmContext>,
    ) -> Result<(), EngineError> {
        let bytes = notation::to_midi(options.notation.score().tune(), &self.midi_params);
        let midi = MidiFile::new(&mut Cursor::new(bytes))
            .map_err(|e| EngineError::Synth(format!("failed to read generated MIDI: {e}")))?;

        self.prepared = Some(Prepared {
            midi: Arc::new(midi),
            context: options.context,
            frames_per_measure: frames_per_measure(
                options.milliseconds_per_measure,
                self.sample_rate,
            ),
            on_ended: options.on_ended,
        });
        self.rendered = None;
        Ok(())
    }

    async fn prime(&mut self) -> Result<(), EngineError> {
        let prepared = self
            .prepared
            .as_ref()
            .ok_or_else(|| EngineError::Synth("prime called before init".to_string()))?;

        let soundfont = Arc::clone(&self.soundfont);
        let midi = Arc::clone(&prepared.midi);
        let sample_rate = self.sample_rate;
        let rendered = tokio::task::spawn_blocking(move || render_pcm(&soundfont, &midi, sample_rate))
            .await
            .map_err(|e| EngineError::Synth(format!("render task failed: {e}")))??;

        debug!(frames = rendered.0.len(), "synthesizer primed");
        self.rendered = Some(rendered);
        Ok(())
    }

    fn start(&mut self) -> Result<(), EngineError> {
        let prepared = self
            .prepared
            .as_ref()
            .ok_or_else(|| EngineError::Synth("start called before init".to_string()))?;
        let (left, right) = self
            .rendered
            .take()
            .ok_or_else(|| EngineError::Synth("start called before prime".to_string()))?;

        if let Some(previous) = self.task.take() {
            previous.abort();
        }
        self.task = Some(tokio::spawn(stream_pcm(
            Arc::clone(&prepared.context),
            left,
            right,
            prepared.frames_per_measure,
            prepared.on_ended.clone(),
        )));
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.rendered = None;
    }
}

impl Drop for SoundFontSynth {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            warn!("synthesizer dropped while streaming");
            task.abort();
        }
    }
}
