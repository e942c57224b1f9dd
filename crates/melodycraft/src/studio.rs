//! The prompt-to-score session: one generation service, one engine, one
//! renderer and one playback controller wired together.

use crate::engine::Engine;
use crate::generation::{
    GenerationError, GenerationRequest, GenerationResponse, GenerationService, RequestError,
};
use crate::loader::{EngineLoader, EngineStatus, Liveness};
use crate::playback::{PlayOutcome, PlaybackController, PlaybackError, PlaybackState};
use crate::reflow::reflow;
use crate::renderer::{Export, ExportError, ScoreRenderer};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error(transparent)]
    Invalid(#[from] RequestError),
    #[error(transparent)]
    Failed(#[from] GenerationError),
    #[error("studio was torn down before the result arrived")]
    Discarded,
}

/// Display data for the current result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Summary {
    pub mood: String,
    pub key: String,
    pub tempo_bpm: u32,
    pub meter: String,
    pub highlights: Vec<String>,
}

/// Lets another task tear the studio down; in-flight results are dropped.
#[derive(Debug, Clone)]
pub struct StudioHandle {
    liveness: Liveness,
}

impl StudioHandle {
    pub fn teardown(&self) {
        self.liveness.kill();
    }

    pub fn is_alive(&self) -> bool {
        self.liveness.is_alive()
    }
}

pub struct Studio<E: Engine, S: GenerationService> {
    service: S,
    loader: Arc<EngineLoader<E>>,
    renderer: ScoreRenderer<E>,
    playback: PlaybackController<E>,
    liveness: Liveness,
    response: Option<GenerationResponse>,
    last_error: Option<&'static str>,
}

impl<E: Engine, S: GenerationService> Studio<E, S> {
    pub fn new(service: S, loader: Arc<EngineLoader<E>>, measures_per_line: usize) -> Self {
        Studio {
            service,
            loader,
            renderer: ScoreRenderer::new(measures_per_line),
            playback: PlaybackController::new(EngineStatus::Unavailable),
            liveness: Liveness::new(),
            response: None,
            last_error: None,
        }
    }

    pub fn handle(&self) -> StudioHandle {
        StudioHandle {
            liveness: self.liveness.clone(),
        }
    }

    fn ensure_alive(&mut self) -> bool {
        if !self.liveness.is_alive() && self.playback.is_alive() {
            self.teardown();
        }
        self.liveness.is_alive()
    }

    /// Load the engine and hand it to the renderer and the controller.
    /// Returns false if the studio was torn down meanwhile.
    pub async fn load_engine(&mut self) -> bool {
        let Some(status) = self.loader.load_while(&self.liveness).await else {
            self.ensure_alive();
            return false;
        };
        self.renderer.set_engine(status.clone());
        self.playback.set_engine(status);
        self.playback.set_notation(self.renderer.notation());
        true
    }

    pub fn engine_status(&self) -> Option<EngineStatus<E>> {
        self.loader.status()
    }

    pub async fn submit(
        &mut self,
        request: GenerationRequest,
    ) -> Result<&GenerationResponse, SubmitError> {
        request.validate()?;
        if !self.ensure_alive() {
            return Err(SubmitError::Discarded);
        }

        let liveness = self.liveness.clone();
        self.last_error = None;
        let result = self.service.generate(&request).await;
        if !liveness.is_alive() {
            self.ensure_alive();
            return Err(SubmitError::Discarded);
        }

        match result {
            Ok(response) => {
                info!(
                    key = %response.key,
                    tempo = response.tempo_bpm,
                    playable = response.has_playable_content(),
                    "generation received"
                );
                self.renderer.set_source(Some(&response.notation_text));
                self.playback.set_notation(self.renderer.notation());
                Ok(&*self.response.insert(response))
            }
            Err(e) => {
                warn!(error = %e, "generation failed, keeping previous result");
                self.last_error = Some(e.user_message());
                Err(e.into())
            }
        }
    }

    pub fn response(&self) -> Option<&GenerationResponse> {
        self.response.as_ref()
    }

    pub fn last_error(&self) -> Option<&'static str> {
        self.last_error
    }

    pub fn summary(&self) -> Option<Summary> {
        self.response.as_ref().map(|r| Summary {
            mood: r.mood.clone(),
            key: r.key.clone(),
            tempo_bpm: r.tempo_bpm,
            meter: r.meter.clone(),
            highlights: r.highlights.clone(),
        })
    }

    /// Each part's text, reflowed the same way as the main score.
    pub fn part_texts(&self) -> Vec<(String, String)> {
        let width = self.renderer.measures_per_line();
        self.response
            .iter()
            .flat_map(|r| r.parts.iter())
            .map(|part| (part.instrument.clone(), reflow(&part.notation_text, width)))
            .collect()
    }

    pub fn renderer(&self) -> &ScoreRenderer<E> {
        &self.renderer
    }

    pub fn export_text(&self) -> Option<Export> {
        self.renderer.export_text()
    }

    pub fn export_audio_file(&self) -> Result<Export, ExportError> {
        self.renderer.export_audio_file()
    }

    pub fn playback_state(&self) -> PlaybackState {
        self.playback.state()
    }

    pub fn playback(&self) -> &PlaybackController<E> {
        &self.playback
    }

    pub async fn play(&mut self) -> Result<PlayOutcome, PlaybackError> {
        if !self.ensure_alive() {
            return Ok(PlayOutcome::NothingToPlay);
        }
        self.playback.play().await
    }

    pub fn stop(&mut self) {
        self.playback.stop();
    }

    pub async fn wait_for_end(&mut self) -> bool {
        self.playback.wait_for_end().await
    }

    pub fn teardown(&mut self) {
        self.liveness.kill();
        self.playback.teardown();
        info!("studio torn down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::{FailureCause, Part};
    use crate::testing::{FakeEngine, SKETCH};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Hands out queued responses; `None` fails with a 503.
    struct Scripted {
        replies: Mutex<Vec<Option<GenerationResponse>>>,
        on_call: Mutex<Option<StudioHandle>>,
    }

    impl Scripted {
        fn new(replies: Vec<Option<GenerationResponse>>) -> Self {
            Scripted {
                replies: Mutex::new(replies),
                on_call: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl GenerationService for Scripted {
        async fn generate(
            &self,
            _request: &GenerationRequest,
        ) -> Result<GenerationResponse, GenerationError> {
            if let Some(handle) = self.on_call.lock().unwrap().take() {
                handle.teardown();
            }
            match self.replies.lock().unwrap().remove(0) {
                Some(response) => Ok(response),
                None => Err(GenerationError::Failed(FailureCause::Status(
                    reqwest::StatusCode::SERVICE_UNAVAILABLE,
                ))),
            }
        }
    }

    fn response(text: &str) -> GenerationResponse {
        GenerationResponse {
            notation_text: text.to_string(),
            tempo_bpm: 96,
            meter: "4/4".into(),
            key: "C".into(),
            mood: "calm".into(),
            highlights: vec!["Tempo: 96 BPM".into()],
            parts: vec![Part {
                instrument: "piano".into(),
                notation_text: "C|D|E|F|G|".into(),
            }],
        }
    }

    async fn studio(
        engine: &FakeEngine,
        replies: Vec<Option<GenerationResponse>>,
    ) -> Studio<FakeEngine, Scripted> {
        let loader = Arc::new(EngineLoader::ready(engine.clone()));
        let mut studio = Studio::new(Scripted::new(replies), loader, 4);
        assert!(studio.load_engine().await);
        studio
    }

    #[tokio::test]
    async fn submit_renders_and_readies_playback() {
        let engine = FakeEngine::new();
        let mut studio = studio(&engine, vec![Some(response(SKETCH))]).await;

        studio.submit(GenerationRequest::new("calm morning")).await.unwrap();
        assert_eq!(studio.playback_state(), PlaybackState::Ready);
        assert!(studio.renderer().notation().is_some());
        assert_eq!(studio.summary().unwrap().tempo_bpm, 96);
        assert_eq!(
            studio.part_texts(),
            vec![("piano".to_string(), "C|D|E|F|\nG|".to_string())]
        );
    }

    #[tokio::test]
    async fn invalid_request_never_reaches_the_service() {
        let engine = FakeEngine::new();
        let mut studio = studio(&engine, vec![]).await;
        let err = studio
            .submit(GenerationRequest::new("x").with_measures(100))
            .await
            .unwrap_err();
        assert!(matches!(err, SubmitError::Invalid(RequestError::MeasuresOutOfRange(100))));
    }

    #[tokio::test]
    async fn failure_keeps_the_previous_result() {
        let engine = FakeEngine::new();
        let mut studio = studio(&engine, vec![Some(response(SKETCH)), None]).await;
        studio.submit(GenerationRequest::new("first")).await.unwrap();

        let err = studio.submit(GenerationRequest::new("second")).await.unwrap_err();
        assert!(matches!(err, SubmitError::Failed(_)));
        assert_eq!(studio.last_error(), Some("Generation request failed."));
        assert_eq!(studio.response().unwrap().notation_text, SKETCH);
        assert_eq!(studio.playback_state(), PlaybackState::Ready);
    }

    #[tokio::test]
    async fn empty_notation_leaves_nothing_to_play() {
        let engine = FakeEngine::new();
        let mut studio = studio(&engine, vec![Some(response(""))]).await;
        studio.submit(GenerationRequest::new("silence")).await.unwrap();

        assert_eq!(studio.playback_state(), PlaybackState::Idle);
        assert_eq!(studio.play().await.unwrap(), PlayOutcome::NothingToPlay);
        assert!(studio.export_text().is_none());
    }

    #[tokio::test]
    async fn new_result_while_playing_replaces_the_session() {
        let engine = FakeEngine::new();
        let next = "X:1\nK:G\nG8 | d8 |]";
        let mut studio = studio(&engine, vec![Some(response(SKETCH)), Some(response(next))]).await;
        studio.submit(GenerationRequest::new("first")).await.unwrap();
        studio.play().await.unwrap();
        assert_eq!(studio.playback_state(), PlaybackState::Playing);

        studio.submit(GenerationRequest::new("second")).await.unwrap();
        assert_eq!(studio.playback_state(), PlaybackState::Ready);
        assert_eq!(engine.live_synths(), 0);
        assert_eq!(studio.renderer().reflowed(), Some(next));
    }

    #[tokio::test]
    async fn result_after_teardown_is_discarded() {
        let engine = FakeEngine::new();
        let mut studio = studio(&engine, vec![Some(response(SKETCH))]).await;
        *studio.service.on_call.lock().unwrap() = Some(studio.handle());

        let err = studio.submit(GenerationRequest::new("late")).await.unwrap_err();
        assert!(matches!(err, SubmitError::Discarded));
        assert!(studio.response().is_none());
        assert_eq!(studio.playback_state(), PlaybackState::Idle);
    }

    #[tokio::test]
    async fn teardown_releases_playback() {
        let engine = FakeEngine::new();
        let mut studio = studio(&engine, vec![Some(response(SKETCH))]).await;
        studio.submit(GenerationRequest::new("go")).await.unwrap();
        studio.play().await.unwrap();

        studio.teardown();
        assert_eq!(engine.live_synths(), 0);
        assert!(!studio.handle().is_alive());
        assert_eq!(studio.play().await.unwrap(), PlayOutcome::NothingToPlay);
    }

    #[tokio::test]
    async fn unavailable_engine_keeps_text_but_not_notation() {
        let loader = Arc::new(EngineLoader::<FakeEngine>::new(|| {
            Box::pin(async { Err(crate::engine::EngineError::NoAudio) })
        }));
        let mut studio = Studio::new(Scripted::new(vec![Some(response(SKETCH))]), loader, 4);
        assert!(studio.load_engine().await);
        studio.submit(GenerationRequest::new("go")).await.unwrap();

        assert!(studio.renderer().reflowed().is_some());
        assert!(studio.renderer().notation().is_none());
        assert_eq!(studio.playback_state(), PlaybackState::Idle);
        assert!(matches!(
            studio.export_audio_file(),
            Err(ExportError::EngineUnavailable)
        ));
    }
}
