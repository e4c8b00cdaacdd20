//! Read-aloud for generated articles: remote speech synthesis, decoded
//! audio clips and the paragraph playback state machine.

pub mod audio;
pub mod cache;
pub mod playback;
pub mod synth;

#[cfg(test)]
mod mock;

pub use audio::{AudioClip, PCM_SAMPLE_RATE};
pub use cache::{AudioCache, FetchOutcome};
pub use playback::{
    AudioOutput, DeviceVoice, PlaybackController, PlaybackSnapshot, PlaybackState, SourceKind,
    PLAYBACK_ERROR,
};
pub use synth::{SpeechClient, SpeechFetcher, SpeechOutput};
