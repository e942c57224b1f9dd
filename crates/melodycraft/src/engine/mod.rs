//! The rendering/synthesis engine seam.
//!
//! Playback and rendering only see these traits: something that turns text
//! into a notation object, an audio context that can be resumed and closed,
//! and a synthesizer that can be initialised, primed, started and stopped.
//! [`abc::AbcEngine`] is the stock implementation.

pub mod abc;

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

pub use abc::{AbcEngine, AbcNotation, PcmContext, SoundFontSynth};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("soundfont {path}: {message}")]
    SoundFont { path: PathBuf, message: String },

    #[error(transparent)]
    Notation(#[from] notation::RenderError),

    #[error("audio context: {0}")]
    Context(String),

    #[error("synthesizer: {0}")]
    Synth(String),

    #[error("audio output is not supported by this engine")]
    NoAudio,

    #[error("wav output: {0}")]
    Wav(#[from] hound::Error),
}

/// Options the engine lays a score out with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderOptions {
    /// Measures per staff line, the same count the text was reflowed with.
    pub measures_per_line: usize,
}

impl Default for RenderOptions {
    fn default() -> Self {
        RenderOptions {
            measures_per_line: crate::reflow::DEFAULT_MEASURES_PER_LINE,
        }
    }
}

/// A parsed, laid-out score.
pub trait Notation: Send + Sync + 'static {
    fn milliseconds_per_measure(&self) -> f64;
    fn measure_count(&self) -> usize;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    Suspended,
    Running,
    Closed,
}

/// The audio output a synthesizer writes into.
#[async_trait]
pub trait AudioContext: Send + Sync + 'static {
    async fn resume(&self) -> Result<(), EngineError>;
    fn close(&self);
    fn state(&self) -> ContextState;
}

/// Fired by a synthesizer when it reaches the end of its notation.
///
/// Carries the id of the session it belongs to so a late signal from a
/// released session can be told apart from the current one.
#[derive(Debug, Clone)]
pub struct EndedSignal {
    session: u64,
    tx: mpsc::UnboundedSender<u64>,
}

impl EndedSignal {
    pub fn new(session: u64, tx: mpsc::UnboundedSender<u64>) -> Self {
        EndedSignal { session, tx }
    }

    pub fn session(&self) -> u64 {
        self.session
    }

    pub fn fire(&self) {
        // receiver gone means the controller is gone; nothing to tell
        let _ = self.tx.send(self.session);
    }
}

pub struct SynthOptions<N, C> {
    pub notation: Arc<N>,
    pub context: Arc<C>,
    pub milliseconds_per_measure: f64,
    pub on_ended: EndedSignal,
}

/// One notation played into one context.
///
/// `stop` must be safe to call at any point, including before `init` and
/// more than once.
#[async_trait]
pub trait Synthesizer: Send + 'static {
    type Notation: Notation;
    type Context: AudioContext;

    async fn init(
        &mut self,
        options: SynthOptions<Self::Notation, Self::Context>,
    ) -> Result<(), EngineError>;

    async fn prime(&mut self) -> Result<(), EngineError>;

    fn start(&mut self) -> Result<(), EngineError>;

    fn stop(&mut self);
}

pub trait Engine: Send + Sync + 'static {
    type Notation: Notation;
    type Context: AudioContext;
    type Synth: Synthesizer<Notation = Self::Notation, Context = Self::Context>;

    fn render(&self, text: &str, options: &RenderOptions) -> Result<Self::Notation, EngineError>;

    /// Standard MIDI File bytes for `text`.
    fn export_midi(&self, text: &str) -> Result<Vec<u8>, EngineError>;

    /// Whether this runtime can produce audio at all.
    fn supports_audio(&self) -> bool;

    fn create_context(&self) -> Result<Self::Context, EngineError>;

    fn create_synth(&self) -> Result<Self::Synth, EngineError>;
}
