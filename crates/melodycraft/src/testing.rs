//! In-memory engine that records every call, for driving the playback
//! state machine in tests.

use crate::engine::{
    AudioContext, ContextState, EndedSignal, Engine, EngineError, Notation, RenderOptions,
    SynthOptions, Synthesizer,
};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

pub const SKETCH: &str = "X:1\nM:4/4\nK:C\nC2 D2 E2 F2 | G8 | c8 |]";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Resume,
    Init,
    Prime,
    Start,
}

#[derive(Default)]
struct Shared {
    events: Vec<String>,
    contexts: Vec<Arc<Mutex<ContextState>>>,
    ended: Vec<EndedSignal>,
    live_synths: usize,
}

#[derive(Clone)]
pub struct FakeEngine {
    shared: Arc<Mutex<Shared>>,
    audio: bool,
    fail_at: Option<Stage>,
}

impl FakeEngine {
    pub fn new() -> Self {
        FakeEngine {
            shared: Arc::default(),
            audio: true,
            fail_at: None,
        }
    }

    pub fn without_audio() -> Self {
        FakeEngine {
            audio: false,
            ..Self::new()
        }
    }

    pub fn failing_at(stage: Stage) -> Self {
        FakeEngine {
            fail_at: Some(stage),
            ..Self::new()
        }
    }

    fn record(&self, event: impl Into<String>) {
        self.shared.lock().unwrap().events.push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.shared.lock().unwrap().events.clone()
    }

    pub fn count(&self, event: &str) -> usize {
        self.events().iter().filter(|e| *e == event).count()
    }

    pub fn context_states(&self) -> Vec<ContextState> {
        let shared = self.shared.lock().unwrap();
        shared.contexts.iter().map(|s| *s.lock().unwrap()).collect()
    }

    pub fn live_synths(&self) -> usize {
        self.shared.lock().unwrap().live_synths
    }

    /// Fire the completion signal handed to the n-th initialised synth.
    pub fn finish(&self, n: usize) {
        let signal = self.shared.lock().unwrap().ended[n].clone();
        signal.fire();
    }
}

#[derive(Debug)]
pub struct FakeNotation {
    pub text: String,
    pub ms_per_measure: f64,
}

impl Notation for FakeNotation {
    fn milliseconds_per_measure(&self) -> f64 {
        self.ms_per_measure
    }

    fn measure_count(&self) -> usize {
        self.text.matches('|').count()
    }
}

pub struct FakeContext {
    engine: FakeEngine,
    state: Arc<Mutex<ContextState>>,
}

#[async_trait]
impl AudioContext for FakeContext {
    async fn resume(&self) -> Result<(), EngineError> {
        self.engine.record("context.resume");
        tokio::task::yield_now().await;
        if self.engine.fail_at == Some(Stage::Resume) {
            return Err(EngineError::Context("device busy".into()));
        }
        *self.state.lock().unwrap() = ContextState::Running;
        Ok(())
    }

    fn close(&self) {
        self.engine.record("context.close");
        *self.state.lock().unwrap() = ContextState::Closed;
    }

    fn state(&self) -> ContextState {
        *self.state.lock().unwrap()
    }
}

pub struct FakeSynth {
    engine: FakeEngine,
    stopped: bool,
}

impl FakeSynth {
    fn fail(&self, stage: Stage) -> Result<(), EngineError> {
        if self.engine.fail_at == Some(stage) {
            return Err(EngineError::Synth(format!("{stage:?} failed")));
        }
        Ok(())
    }
}

#[async_trait]
impl Synthesizer for FakeSynth {
    type Notation = FakeNotation;
    type Context = FakeContext;

    async fn init(
        &mut self,
        options: SynthOptions<FakeNotation, FakeContext>,
    ) -> Result<(), EngineError> {
        self.engine
            .record(format!("synth.init {}", options.milliseconds_per_measure));
        tokio::task::yield_now().await;
        self.fail(Stage::Init)?;
        self.engine.shared.lock().unwrap().ended.push(options.on_ended);
        Ok(())
    }

    async fn prime(&mut self) -> Result<(), EngineError> {
        self.engine.record("synth.prime");
        tokio::task::yield_now().await;
        self.fail(Stage::Prime)
    }

    fn start(&mut self) -> Result<(), EngineError> {
        self.engine.record("synth.start");
        self.fail(Stage::Start)
    }

    fn stop(&mut self) {
        self.engine.record("synth.stop");
        if !self.stopped {
            self.stopped = true;
            self.engine.shared.lock().unwrap().live_synths -= 1;
        }
    }
}

impl Engine for FakeEngine {
    type Notation = FakeNotation;
    type Context = FakeContext;
    type Synth = FakeSynth;

    fn render(&self, text: &str, options: &RenderOptions) -> Result<FakeNotation, EngineError> {
        self.record(format!("render {}", options.measures_per_line));
        if !text.contains('|') {
            return Err(notation::RenderError::NoPlayableContent.into());
        }
        Ok(FakeNotation {
            text: text.to_string(),
            ms_per_measure: 2000.0,
        })
    }

    fn export_midi(&self, text: &str) -> Result<Vec<u8>, EngineError> {
        if !text.contains('|') {
            return Err(notation::RenderError::NoPlayableContent.into());
        }
        Ok(b"MThd\0\0\0\x06".to_vec())
    }

    fn supports_audio(&self) -> bool {
        self.audio
    }

    fn create_context(&self) -> Result<FakeContext, EngineError> {
        self.record("context.create");
        let state = Arc::new(Mutex::new(ContextState::Suspended));
        self.shared.lock().unwrap().contexts.push(Arc::clone(&state));
        Ok(FakeContext {
            engine: self.clone(),
            state,
        })
    }

    fn create_synth(&self) -> Result<FakeSynth, EngineError> {
        self.record("synth.create");
        self.shared.lock().unwrap().live_synths += 1;
        Ok(FakeSynth {
            engine: self.clone(),
            stopped: false,
        })
    }
}
