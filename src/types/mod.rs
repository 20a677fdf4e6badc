//! Core value types shared by engines, the orchestrator and the fallback coordinator.

pub mod request;
pub mod voice;

pub use request::{OptionsValidation, SynthesisOptions, SynthesisRequest};
pub use voice::VoiceInfo;
