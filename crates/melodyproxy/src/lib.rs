//! Same-origin pass-through for MelodyCraft generation requests.
//!
//! `POST /api/generate` forwards the JSON body to `{backend}/generate` and
//! relays the answer. Any backend failure becomes a 500 with a generic
//! `{"error": "Generation failed."}` body.

pub mod serve;
pub mod telemetry;

pub use serve::{router, run, ProxyState, ServeConfig, GENERATION_FAILED};
