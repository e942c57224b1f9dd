//! Playback state machine and the audio session it owns.
//!
//! A [`PlaybackSession`] pairs one audio context with one synthesizer.
//! Dropping it stops the synthesizer and closes the context, so every exit
//! (stop, natural end, a new notation, teardown, a failed or cancelled
//! `play`) releases both together.

use crate::engine::{
    AudioContext, ContextState, EndedSignal, Engine, EngineError, Notation, SynthOptions,
    Synthesizer,
};
use crate::loader::EngineStatus;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    /// No notation, or no engine.
    Idle,
    Ready,
    Priming,
    Playing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayOutcome {
    Started,
    /// A session is already live; nothing changed.
    AlreadyActive,
    /// Idle: no notation or no engine.
    NothingToPlay,
}

#[derive(Debug, thiserror::Error)]
pub enum PlaybackError {
    #[error("audio playback is not supported here")]
    Unsupported,
    #[error("playback could not start: {0}")]
    InitFailed(#[source] EngineError),
}

impl PlaybackError {
    pub fn user_message(&self) -> &'static str {
        match self {
            PlaybackError::Unsupported => "Audio playback is not supported in this environment.",
            PlaybackError::InitFailed(_) => "Playback failed to start.",
        }
    }
}

struct PlaybackSession<E: Engine> {
    id: u64,
    context: Arc<E::Context>,
    // None only while the session is being opened
    synth: Option<E::Synth>,
}

impl<E: Engine> PlaybackSession<E> {
    async fn open(
        engine: &E,
        notation: Arc<E::Notation>,
        id: u64,
        ended: mpsc::UnboundedSender<u64>,
    ) -> Result<Self, EngineError> {
        let mut session = PlaybackSession {
            id,
            context: Arc::new(engine.create_context()?),
            synth: None,
        };
        session.context.resume().await?;

        let options = SynthOptions {
            milliseconds_per_measure: notation.milliseconds_per_measure(),
            notation,
            context: Arc::clone(&session.context),
            on_ended: EndedSignal::new(id, ended),
        };
        let synth = session.synth.insert(engine.create_synth()?);
        synth.init(options).await?;
        synth.prime().await?;
        synth.start()?;
        Ok(session)
    }
}

impl<E: Engine> Drop for PlaybackSession<E> {
    fn drop(&mut self) {
        if let Some(synth) = self.synth.as_mut() {
            synth.stop();
        }
        if self.context.state() != ContextState::Closed {
            self.context.close();
        }
        debug!(session = self.id, "playback session released");
    }
}

/// Publishes `Priming` while a `play` call is in flight. If the call is
/// dropped before it settles, the prior state goes back out on drop.
struct PrimingGuard<'a> {
    tx: &'a watch::Sender<PlaybackState>,
    restore: Option<PlaybackState>,
}

impl<'a> PrimingGuard<'a> {
    fn publish(tx: &'a watch::Sender<PlaybackState>, restore: PlaybackState) -> Self {
        tx.send_replace(PlaybackState::Priming);
        PrimingGuard {
            tx,
            restore: Some(restore),
        }
    }

    /// The caller publishes the settled state itself.
    fn settle(mut self) {
        self.restore = None;
    }
}

impl Drop for PrimingGuard<'_> {
    fn drop(&mut self) {
        if let Some(state) = self.restore {
            self.tx.send_replace(state);
        }
    }
}

pub struct PlaybackController<E: Engine> {
    engine: EngineStatus<E>,
    notation: Option<Arc<E::Notation>>,
    session: Option<PlaybackSession<E>>,
    next_session: u64,
    ended_tx: mpsc::UnboundedSender<u64>,
    ended_rx: mpsc::UnboundedReceiver<u64>,
    state_tx: watch::Sender<PlaybackState>,
    alive: bool,
}

impl<E: Engine> PlaybackController<E> {
    pub fn new(engine: EngineStatus<E>) -> Self {
        let (ended_tx, ended_rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(PlaybackState::Idle);
        let controller = PlaybackController {
            engine,
            notation: None,
            session: None,
            next_session: 1,
            ended_tx,
            ended_rx,
            state_tx,
            alive: true,
        };
        controller.publish();
        controller
    }

    pub fn state(&self) -> PlaybackState {
        if self.session.is_some() {
            PlaybackState::Playing
        } else if self.notation.is_some() && self.engine.is_available() {
            PlaybackState::Ready
        } else {
            PlaybackState::Idle
        }
    }

    /// State changes, including `Priming` while `play` is in flight.
    pub fn subscribe(&self) -> watch::Receiver<PlaybackState> {
        self.state_tx.subscribe()
    }

    pub fn notation(&self) -> Option<&Arc<E::Notation>> {
        self.notation.as_ref()
    }

    pub fn is_alive(&self) -> bool {
        self.alive
    }

    fn publish(&self) {
        self.state_tx.send_replace(self.state());
    }

    fn release(&mut self) {
        if let Some(session) = self.session.take() {
            info!(session = session.id, "playback stopped");
            drop(session);
        }
        self.publish();
    }

    pub fn set_engine(&mut self, engine: EngineStatus<E>) {
        self.release();
        self.engine = engine;
        self.publish();
    }

    /// Replace the notation. A live session is released first.
    pub fn set_notation(&mut self, notation: Option<Arc<E::Notation>>) {
        self.release();
        if self.alive {
            self.notation = notation;
        }
        self.publish();
    }

    pub async fn play(&mut self) -> Result<PlayOutcome, PlaybackError> {
        if self.session.is_some() {
            debug!("play ignored, already playing");
            return Ok(PlayOutcome::AlreadyActive);
        }
        let (Some(engine), Some(notation)) = (self.engine.engine().cloned(), self.notation.clone())
        else {
            return Ok(PlayOutcome::NothingToPlay);
        };
        if !engine.supports_audio() {
            warn!("play requested but the engine has no audio");
            return Err(PlaybackError::Unsupported);
        }

        let id = self.next_session;
        self.next_session += 1;
        let priming = PrimingGuard::publish(&self.state_tx, self.state());
        let opened =
            PlaybackSession::<E>::open(engine.as_ref(), notation, id, self.ended_tx.clone()).await;
        priming.settle();

        match opened {
            Ok(session) => {
                info!(session = id, "playback started");
                self.session = Some(session);
                self.publish();
                Ok(PlayOutcome::Started)
            }
            Err(e) => {
                warn!(session = id, error = %e, "playback failed to start");
                self.publish();
                Err(PlaybackError::InitFailed(e))
            }
        }
    }

    pub fn stop(&mut self) {
        self.release();
    }

    /// Wait for the live session to finish on its own, then release it.
    /// Returns false straight away if nothing is playing.
    pub async fn wait_for_end(&mut self) -> bool {
        while let Some(current) = self.session.as_ref().map(|s| s.id) {
            match self.ended_rx.recv().await {
                Some(id) if id == current => {
                    debug!(session = id, "playback finished");
                    self.release();
                    return true;
                }
                Some(stale) => debug!(session = stale, "ignoring end of an old session"),
                None => return false,
            }
        }
        false
    }

    /// Non-blocking form of [`wait_for_end`](Self::wait_for_end).
    pub fn poll_ended(&mut self) -> bool {
        while let Ok(id) = self.ended_rx.try_recv() {
            if self.session.as_ref().is_some_and(|s| s.id == id) {
                debug!(session = id, "playback finished");
                self.release();
                return true;
            }
        }
        false
    }

    /// Release everything. The controller stays idle afterwards.
    pub fn teardown(&mut self) {
        self.release();
        self.alive = false;
        self.notation = None;
        self.engine = EngineStatus::Unavailable;
        self.publish();
    }
}
