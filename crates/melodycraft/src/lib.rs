//! MelodyCraft client core.
//!
//! A prompt goes to the generation service ([`generation`]), the returned
//! ABC text is wrapped into display lines ([`reflow`]), rendered into a
//! notation object by the lazily loaded engine ([`loader`], [`renderer`])
//! and played through a session that always releases its audio resources
//! ([`playback`]). [`studio::Studio`] wires the pieces together.

pub mod engine;
pub mod generation;
pub mod loader;
pub mod playback;
pub mod reflow;
pub mod renderer;
pub mod studio;

#[cfg(test)]
mod testing;

pub use engine::{AbcEngine, Engine, EngineError, RenderOptions};
pub use generation::{
    GenerationClient, GenerationError, GenerationRequest, GenerationResponse, GenerationService,
    Part, RequestError,
};
pub use loader::{EngineLoader, EngineStatus, Liveness};
pub use playback::{PlayOutcome, PlaybackController, PlaybackError, PlaybackState};
pub use reflow::{reflow, DEFAULT_MEASURES_PER_LINE};
pub use renderer::{Export, ExportError, ScoreRenderer};
pub use studio::{Studio, StudioHandle, SubmitError, Summary};
