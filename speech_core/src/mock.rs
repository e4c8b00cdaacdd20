//! Test doubles for the playback seams.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::audio::AudioClip;
use crate::playback::{AudioOutput, DeviceVoice, OnEnd, OnSpoken};
use crate::synth::{SpeechFetcher, SpeechOutput};

/// Fetcher returning a clip of `clip_secs` per text, optionally held back
/// until a gate is opened.
#[derive(Default)]
pub struct GatedFetcher {
    gates: Mutex<HashMap<String, Arc<Notify>>>,
    failing: Mutex<HashSet<String>>,
    device: Mutex<HashSet<String>>,
    panicking: Mutex<HashSet<String>>,
    calls: Mutex<HashMap<String, usize>>,
    clip_secs: Mutex<Option<u32>>,
}

impl GatedFetcher {
    /// Hold fetches of `text` until the returned gate is notified.
    pub fn gate(&self, text: &str) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.gates.lock().unwrap().insert(text.to_string(), gate.clone());
        gate
    }

    pub fn fail(&self, text: &str) {
        self.failing.lock().unwrap().insert(text.to_string());
    }

    pub fn device(&self, text: &str) {
        self.device.lock().unwrap().insert(text.to_string());
    }

    pub fn panic_on(&self, text: &str) {
        self.panicking.lock().unwrap().insert(text.to_string());
    }

    pub fn set_clip_secs(&self, secs: u32) {
        *self.clip_secs.lock().unwrap() = Some(secs);
    }

    pub fn calls(&self, text: &str) -> usize {
        self.calls.lock().unwrap().get(text).copied().unwrap_or(0)
    }
}

/// Ten samples per second keeps clip lengths exact.
pub const MOCK_RATE: u32 = 10;

pub fn clip(secs: u32) -> AudioClip {
    AudioClip::new(vec![0.0; (secs * MOCK_RATE) as usize], MOCK_RATE)
}

#[async_trait]
impl SpeechFetcher for GatedFetcher {
    async fn fetch(&self, text: &str) -> anyhow::Result<SpeechOutput> {
        *self.calls.lock().unwrap().entry(text.to_string()).or_default() += 1;
        let gate = self.gates.lock().unwrap().get(text).cloned();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if self.panicking.lock().unwrap().contains(text) {
            panic!("synthesizer crashed");
        }
        if self.failing.lock().unwrap().contains(text) {
            anyhow::bail!("provider unavailable");
        }
        if self.device.lock().unwrap().contains(text) {
            return Ok(SpeechOutput::Device);
        }
        let secs = self.clip_secs.lock().unwrap().unwrap_or(4);
        Ok(SpeechOutput::Remote(clip(secs)))
    }
}

#[derive(Default)]
pub struct OutputLog {
    /// (clip duration, start offset) per start.
    pub starts: Vec<(Duration, Duration)>,
    pub stops: usize,
    pub elapsed: Duration,
    pub on_end: Option<OnEnd>,
    pub fail_next_start: bool,
}

#[derive(Clone, Default)]
pub struct MockOutput(pub Arc<Mutex<OutputLog>>);

impl MockOutput {
    /// Fire the natural end of the current clip.
    pub fn finish(&self) {
        let on_end = self.0.lock().unwrap().on_end.take();
        if let Some(on_end) = on_end {
            on_end();
        }
    }

    pub fn set_elapsed(&self, elapsed: Duration) {
        self.0.lock().unwrap().elapsed = elapsed;
    }

    pub fn starts(&self) -> Vec<(Duration, Duration)> {
        self.0.lock().unwrap().starts.clone()
    }
}

impl AudioOutput for MockOutput {
    fn start(&mut self, clip: Arc<AudioClip>, offset: Duration, on_end: OnEnd) -> anyhow::Result<()> {
        let mut log = self.0.lock().unwrap();
        if log.fail_next_start {
            log.fail_next_start = false;
            anyhow::bail!("output device busy");
        }
        log.starts.push((clip.duration(), offset));
        log.elapsed = Duration::ZERO;
        log.on_end = Some(on_end);
        Ok(())
    }

    fn stop(&mut self) {
        let mut log = self.0.lock().unwrap();
        log.stops += 1;
        log.on_end = None;
    }

    fn elapsed(&self) -> Duration {
        self.0.lock().unwrap().elapsed
    }
}

#[derive(Default)]
pub struct VoiceLog {
    pub spoken: Vec<String>,
    pub pauses: usize,
    pub resumes: usize,
    pub cancels: usize,
    pub on_end: Option<OnSpoken>,
}

#[derive(Clone, Default)]
pub struct MockVoice(pub Arc<Mutex<VoiceLog>>);

impl MockVoice {
    pub fn finish(&self, result: anyhow::Result<()>) {
        let on_end = self.0.lock().unwrap().on_end.take();
        if let Some(on_end) = on_end {
            on_end(result);
        }
    }

    pub fn spoken(&self) -> Vec<String> {
        self.0.lock().unwrap().spoken.clone()
    }
}

impl DeviceVoice for MockVoice {
    fn speak(&mut self, text: &str, on_end: OnSpoken) -> anyhow::Result<()> {
        let mut log = self.0.lock().unwrap();
        log.spoken.push(text.to_string());
        log.on_end = Some(on_end);
        Ok(())
    }

    fn pause(&mut self) {
        self.0.lock().unwrap().pauses += 1;
    }

    fn resume(&mut self) {
        self.0.lock().unwrap().resumes += 1;
    }

    fn cancel(&mut self) {
        let mut log = self.0.lock().unwrap();
        log.cancels += 1;
        log.on_end = None;
    }
}
