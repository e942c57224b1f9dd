//! Reflowed text to notation objects and file exports.

use crate::engine::{Engine, EngineError, RenderOptions};
use crate::loader::EngineStatus;
use crate::reflow::reflow;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

pub const TEXT_FILENAME: &str = "melodycraft.abc";
pub const MIDI_FILENAME: &str = "melodycraft.mid";

/// A file ready to hand to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Export {
    pub filename: &'static str,
    pub mime_type: &'static str,
    pub bytes: Vec<u8>,
}

impl Export {
    /// Write into `dir` under the export's filename.
    pub fn save_to(&self, dir: &Path) -> std::io::Result<PathBuf> {
        let path = dir.join(self.filename);
        std::fs::write(&path, &self.bytes)?;
        Ok(path)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("nothing to export")]
    NothingToExport,
    #[error("notation engine is unavailable")]
    EngineUnavailable,
    #[error("engine could not produce MIDI: {0}")]
    Engine(#[from] EngineError),
}

impl ExportError {
    pub fn user_message(&self) -> &'static str {
        "MIDI export failed."
    }
}

/// Build a notation object, or `None` when there is no text, no engine, or
/// the engine rejects the text.
pub fn render<E: Engine>(
    reflowed_text: Option<&str>,
    engine: &EngineStatus<E>,
    options: &RenderOptions,
) -> Option<E::Notation> {
    let text = reflowed_text.filter(|t| !t.is_empty())?;
    let engine = engine.engine()?;
    match engine.render(text, options) {
        Ok(notation) => Some(notation),
        Err(e) => {
            warn!(error = %e, "notation could not be rendered");
            None
        }
    }
}

pub fn export_text(reflowed_text: &str) -> Export {
    Export {
        filename: TEXT_FILENAME,
        mime_type: "text/plain",
        bytes: reflowed_text.as_bytes().to_vec(),
    }
}

pub fn export_audio_file<E: Engine>(
    reflowed_text: &str,
    engine: &EngineStatus<E>,
) -> Result<Export, ExportError> {
    let engine = engine.engine().ok_or(ExportError::EngineUnavailable)?;
    let bytes = engine.export_midi(reflowed_text).map_err(|e| {
        warn!(error = %e, "MIDI export failed");
        ExportError::from(e)
    })?;
    Ok(Export {
        filename: MIDI_FILENAME,
        mime_type: "audio/midi",
        bytes,
    })
}

/// Holds the current reflowed text and the notation object built from it.
pub struct ScoreRenderer<E: Engine> {
    options: RenderOptions,
    engine: EngineStatus<E>,
    reflowed: Option<String>,
    notation: Option<Arc<E::Notation>>,
}

impl<E: Engine> ScoreRenderer<E> {
    pub fn new(measures_per_line: usize) -> Self {
        ScoreRenderer {
            options: RenderOptions { measures_per_line },
            engine: EngineStatus::Unavailable,
            reflowed: None,
            notation: None,
        }
    }

    pub fn measures_per_line(&self) -> usize {
        self.options.measures_per_line
    }

    pub fn set_engine(&mut self, engine: EngineStatus<E>) {
        self.engine = engine;
        self.rerender();
    }

    /// Reflow `text` and rebuild the notation object from it.
    pub fn set_source(&mut self, text: Option<&str>) {
        self.reflowed = text
            .map(|t| reflow(t, self.options.measures_per_line))
            .filter(|t| !t.is_empty());
        self.rerender();
    }

    fn rerender(&mut self) {
        self.notation = render(self.reflowed.as_deref(), &self.engine, &self.options).map(Arc::new);
        debug!(
            has_text = self.reflowed.is_some(),
            has_notation = self.notation.is_some(),
            "score rendered"
        );
    }

    pub fn reflowed(&self) -> Option<&str> {
        self.reflowed.as_deref()
    }

    pub fn notation(&self) -> Option<Arc<E::Notation>> {
        self.notation.clone()
    }

    pub fn export_text(&self) -> Option<Export> {
        self.reflowed.as_deref().map(export_text)
    }

    pub fn export_audio_file(&self) -> Result<Export, ExportError> {
        let text = self.reflowed.as_deref().ok_or(ExportError::NothingToExport)?;
        export_audio_file(text, &self.engine)
    }
}
