//! Paragraph-by-paragraph read-aloud.
//!
//! A single actor task owns the paragraph list, the [`AudioCache`] and both
//! output devices. [`PlaybackController`] sends it commands; asynchronous
//! completions (fetches, clip ends, device speech ends) come back on a
//! second channel tagged with the session that started them. Every `play`,
//! `stop` and remote `pause` opens a new session, so anything still in
//! flight from an older one is dropped on arrival. Cache bookkeeping for a
//! finished fetch happens regardless of its session.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use article_core::Paragraph;

use crate::audio::AudioClip;
use crate::cache::{AudioCache, FetchOutcome};
use crate::synth::SpeechFetcher;

/// Shown for every playback failure.
pub const PLAYBACK_ERROR: &str = "Unable to play audio";

/// Pause between a clip ending and the next paragraph starting.
pub const ADVANCE_GAP: Duration = Duration::from_millis(100);

/// Progress polling period while remote audio plays.
pub const PROGRESS_TICK: Duration = Duration::from_millis(50);

/// Called once when a clip plays to its end.
pub type OnEnd = Box<dyn FnOnce() + Send>;

/// Called once when device speech finishes or fails.
pub type OnSpoken = Box<dyn FnOnce(anyhow::Result<()>) + Send>;

/// Sink for decoded clips.
pub trait AudioOutput: Send + 'static {
    /// Start playing `clip` from `offset`. `on_end` fires only on a natural
    /// end, never after [`AudioOutput::stop`].
    fn start(&mut self, clip: Arc<AudioClip>, offset: Duration, on_end: OnEnd) -> anyhow::Result<()>;
    fn stop(&mut self);
    /// Time played since the last `start`.
    fn elapsed(&self) -> Duration;
}

/// On-device speech synthesizer used when no remote audio is available.
pub trait DeviceVoice: Send + 'static {
    fn speak(&mut self, text: &str, on_end: OnSpoken) -> anyhow::Result<()>;
    fn pause(&mut self);
    fn resume(&mut self);
    fn cancel(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SourceKind {
    RemoteAudio,
    DeviceSpeech,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum PlaybackState {
    Idle,
    Loading { index: usize },
    Playing { index: usize, source: SourceKind },
    Paused { index: usize, offset: Duration, source: SourceKind },
    Error { index: usize },
}

/// What a player UI renders.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackSnapshot {
    pub state: PlaybackState,
    pub active_index: Option<usize>,
    pub playing: bool,
    pub loading: bool,
    /// Percent of the current clip, 0..=100.
    pub progress: f32,
    pub error: Option<String>,
    pub using_device_voice: bool,
    pub player_visible: bool,
    pub failed_paragraphs: Vec<usize>,
    pub paragraph_count: usize,
}

#[derive(Debug)]
enum Command {
    Play { index: usize, offset: Duration },
    Pause,
    Resume,
    Seek(f32),
    Stop { full_reset: bool },
    Toggle,
    Append(Paragraph),
}

enum Internal {
    Fetched {
        session: u64,
        index: usize,
        offset: Duration,
        outcome: FetchOutcome,
    },
    ClipEnded { session: u64, index: usize },
    Advance { session: u64, index: usize },
    Spoken {
        session: u64,
        index: usize,
        result: Result<(), String>,
    },
}

/// Handle to a running player. Cloning shares the same player; the actor
/// stops when the last handle is dropped.
#[derive(Clone)]
pub struct PlaybackController {
    commands: mpsc::UnboundedSender<Command>,
    snapshot: watch::Receiver<PlaybackSnapshot>,
}

impl PlaybackController {
    /// Spawn the player actor on the current tokio runtime.
    pub fn spawn(
        paragraphs: Vec<Paragraph>,
        fetcher: Arc<dyn SpeechFetcher>,
        output: Box<dyn AudioOutput>,
        voice: Box<dyn DeviceVoice>,
    ) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot) = watch::channel(PlaybackSnapshot::idle(paragraphs.len()));
        let player = Player {
            paragraphs,
            cache: AudioCache::new(fetcher),
            output,
            voice,
            internal_tx,
            session: 0,
            state: PlaybackState::Idle,
            active: None,
            base_offset: Duration::ZERO,
            current_clip: None,
            progress: 0.0,
            error: None,
            using_device_voice: false,
            visible: false,
            snapshot_tx,
        };
        tokio::spawn(player.run(command_rx, internal_rx));
        Self { commands, snapshot }
    }

    pub fn play(&self, index: usize) {
        self.play_from(index, Duration::ZERO);
    }

    pub fn play_from(&self, index: usize, offset: Duration) {
        self.send(Command::Play { index, offset });
    }

    pub fn pause(&self) {
        self.send(Command::Pause);
    }

    pub fn resume(&self) {
        self.send(Command::Resume);
    }

    /// Jump to `percentage` of the current clip.
    pub fn seek(&self, percentage: f32) {
        self.send(Command::Seek(percentage));
    }

    pub fn stop(&self, full_reset: bool) {
        self.send(Command::Stop { full_reset });
    }

    pub fn toggle(&self) {
        self.send(Command::Toggle);
    }

    pub fn append_paragraph(&self, paragraph: Paragraph) {
        self.send(Command::Append(paragraph));
    }

    pub fn snapshot(&self) -> PlaybackSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PlaybackSnapshot> {
        self.snapshot.clone()
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            debug!("player is gone, command dropped");
        }
    }
}

impl PlaybackSnapshot {
    fn idle(paragraph_count: usize) -> Self {
        Self {
            state: PlaybackState::Idle,
            active_index: None,
            playing: false,
            loading: false,
            progress: 0.0,
            error: None,
            using_device_voice: false,
            player_visible: false,
            failed_paragraphs: Vec::new(),
            paragraph_count,
        }
    }
}

struct Player {
    paragraphs: Vec<Paragraph>,
    cache: AudioCache,
    output: Box<dyn AudioOutput>,
    voice: Box<dyn DeviceVoice>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    session: u64,
    state: PlaybackState,
    active: Option<usize>,
    base_offset: Duration,
    current_clip: Option<Arc<AudioClip>>,
    progress: f32,
    error: Option<String>,
    using_device_voice: bool,
    visible: bool,
    snapshot_tx: watch::Sender<PlaybackSnapshot>,
}

impl Player {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut internal: mpsc::UnboundedReceiver<Internal>,
    ) {
        let mut ticker = tokio::time::interval(PROGRESS_TICK);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some(message) = internal.recv() => self.handle_internal(message),
                _ = ticker.tick() => self.tick(),
            }
        }

        self.halt_sources();
        debug!("player stopped");
    }

    fn next_session(&mut self) -> u64 {
        self.session = self.session.wrapping_add(1);
        self.session
    }

    fn is_current(&self, session: u64) -> bool {
        session == self.session
    }

    fn handle_command(&mut self, command: Command) {
        debug!("player command: {command:?}");
        match command {
            Command::Play { index, offset } => self.play(index, offset),
            Command::Pause => self.pause(),
            Command::Resume => self.resume(),
            Command::Seek(percentage) => self.seek(percentage),
            Command::Stop { full_reset } => self.stop(full_reset),
            Command::Toggle => self.toggle(),
            Command::Append(paragraph) => {
                self.paragraphs.push(paragraph);
                self.publish();
            }
        }
    }

    fn handle_internal(&mut self, message: Internal) {
        match message {
            Internal::Fetched {
                session,
                index,
                offset,
                outcome,
            } => {
                self.cache.settle(index, &outcome);
                if !self.is_current(session) {
                    debug!("discarding stale audio for paragraph {index}");
                    self.publish();
                    return;
                }
                match outcome {
                    FetchOutcome::Decoded(clip) => self.start_remote(index, clip, offset),
                    FetchOutcome::NoRemote | FetchOutcome::Failed(_) => self.start_device(index),
                    FetchOutcome::Crashed(reason) => {
                        error!("audio fetch for paragraph {index} crashed: {reason}");
                        self.fail(index);
                    }
                }
            }
            Internal::ClipEnded { session, index } => {
                if !self.is_current(session) {
                    return;
                }
                self.progress = 100.0;
                self.current_clip = None;
                self.publish();
                let tx = self.internal_tx.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(ADVANCE_GAP).await;
                    let _ = tx.send(Internal::Advance { session, index });
                });
            }
            Internal::Advance { session, index } => {
                if self.is_current(session) {
                    self.play(index + 1, Duration::ZERO);
                }
            }
            Internal::Spoken {
                session,
                index,
                result,
            } => {
                if !self.is_current(session) {
                    return;
                }
                match result {
                    Ok(()) => self.play(index + 1, Duration::ZERO),
                    Err(reason) => {
                        error!("device speech for paragraph {index} failed: {reason}");
                        self.fail(index);
                    }
                }
            }
        }
    }

    fn play(&mut self, index: usize, offset: Duration) {
        let session = self.next_session();
        self.halt_sources();
        self.visible = true;

        if index >= self.paragraphs.len() {
            info!("reached end of article after {} paragraphs", self.paragraphs.len());
            self.stop(true);
            return;
        }

        self.active = Some(index);
        self.base_offset = offset;
        self.current_clip = None;
        self.error = None;
        self.progress = 0.0;
        self.state = PlaybackState::Loading { index };

        if let Some(clip) = self.cache.clip(index) {
            self.start_remote(index, clip, offset);
            return;
        }

        self.publish();
        let fetch = self.cache.request(index, self.paragraphs[index].text());
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let outcome = fetch.await;
            let _ = tx.send(Internal::Fetched {
                session,
                index,
                offset,
                outcome,
            });
        });
    }

    fn start_remote(&mut self, index: usize, clip: Arc<AudioClip>, offset: Duration) {
        let duration = clip.duration();
        if offset >= duration {
            self.play(index + 1, Duration::ZERO);
            return;
        }

        let session = self.session;
        let tx = self.internal_tx.clone();
        let on_end: OnEnd = Box::new(move || {
            let _ = tx.send(Internal::ClipEnded { session, index });
        });
        match self.output.start(Arc::clone(&clip), offset, on_end) {
            Ok(()) => {
                self.base_offset = offset;
                self.progress = percent(offset, duration);
                self.current_clip = Some(clip);
                self.using_device_voice = false;
                self.state = PlaybackState::Playing {
                    index,
                    source: SourceKind::RemoteAudio,
                };
                self.publish();
            }
            Err(e) => {
                error!("audio output failed for paragraph {index}: {e:#}");
                self.fail(index);
            }
        }
    }

    fn start_device(&mut self, index: usize) {
        warn!("falling back to device voice for paragraph {index}");
        let session = self.session;
        let tx = self.internal_tx.clone();
        let on_end: OnSpoken = Box::new(move |result| {
            let result = result.map_err(|e| format!("{e:#}"));
            let _ = tx.send(Internal::Spoken {
                session,
                index,
                result,
            });
        });
        let text = self.paragraphs[index].text();
        match self.voice.speak(&text, on_end) {
            Ok(()) => {
                self.current_clip = None;
                self.progress = 0.0;
                self.using_device_voice = true;
                self.state = PlaybackState::Playing {
                    index,
                    source: SourceKind::DeviceSpeech,
                };
                self.publish();
            }
            Err(e) => {
                error!("device voice failed for paragraph {index}: {e:#}");
                self.fail(index);
            }
        }
    }

    fn fail(&mut self, index: usize) {
        self.halt_sources();
        self.state = PlaybackState::Error { index };
        self.error = Some(PLAYBACK_ERROR.to_string());
        self.publish();
    }

    fn pause(&mut self) {
        match self.state {
            PlaybackState::Playing {
                index,
                source: SourceKind::RemoteAudio,
            } => {
                self.base_offset += self.output.elapsed();
                self.next_session();
                self.output.stop();
                self.state = PlaybackState::Paused {
                    index,
                    offset: self.base_offset,
                    source: SourceKind::RemoteAudio,
                };
            }
            PlaybackState::Playing {
                index,
                source: SourceKind::DeviceSpeech,
            } => {
                self.voice.pause();
                self.state = PlaybackState::Paused {
                    index,
                    offset: Duration::ZERO,
                    source: SourceKind::DeviceSpeech,
                };
            }
            PlaybackState::Loading { index } => {
                self.next_session();
                self.state = PlaybackState::Paused {
                    index,
                    offset: self.base_offset,
                    source: SourceKind::RemoteAudio,
                };
            }
            _ => return,
        }
        self.publish();
    }

    fn resume(&mut self) {
        match self.state {
            PlaybackState::Paused {
                index,
                offset,
                source: SourceKind::RemoteAudio,
            } => self.play(index, offset),
            PlaybackState::Paused {
                index,
                source: SourceKind::DeviceSpeech,
                ..
            } => {
                self.voice.resume();
                self.state = PlaybackState::Playing {
                    index,
                    source: SourceKind::DeviceSpeech,
                };
                self.publish();
            }
            PlaybackState::Error { index } => self.play(index, self.base_offset),
            PlaybackState::Idle => {
                if let Some(index) = self.active {
                    self.play(index, self.base_offset);
                }
            }
            PlaybackState::Loading { .. } | PlaybackState::Playing { .. } => {}
        }
    }

    fn seek(&mut self, percentage: f32) {
        let Some(index) = self.active else {
            return;
        };
        if self.using_device_voice {
            return;
        }
        let Some(clip) = self.cache.clip(index) else {
            return;
        };
        let fraction = percentage.clamp(0.0, 100.0) / 100.0;
        let offset = clip.duration().mul_f32(fraction);
        self.play(index, offset);
    }

    fn stop(&mut self, full_reset: bool) {
        self.next_session();
        self.halt_sources();
        self.state = PlaybackState::Idle;
        self.current_clip = None;
        self.base_offset = Duration::ZERO;
        self.using_device_voice = false;
        if full_reset {
            self.active = None;
            self.progress = 0.0;
            self.visible = false;
            self.error = None;
        }
        self.publish();
    }

    fn toggle(&mut self) {
        match self.state {
            PlaybackState::Playing { .. } | PlaybackState::Loading { .. } => self.pause(),
            PlaybackState::Paused { .. } | PlaybackState::Error { .. } => self.resume(),
            PlaybackState::Idle if self.active.is_some() => self.resume(),
            PlaybackState::Idle => self.play(0, Duration::ZERO),
        }
    }

    fn tick(&mut self) {
        let PlaybackState::Playing {
            source: SourceKind::RemoteAudio,
            ..
        } = self.state
        else {
            return;
        };
        let Some(clip) = &self.current_clip else {
            return;
        };
        let position = self.base_offset + self.output.elapsed();
        let progress = percent(position, clip.duration());
        if (progress - self.progress).abs() > f32::EPSILON {
            self.progress = progress;
            self.publish();
        }
    }

    fn halt_sources(&mut self) {
        self.output.stop();
        self.voice.cancel();
    }

    fn snapshot(&self) -> PlaybackSnapshot {
        PlaybackSnapshot {
            state: self.state,
            active_index: self.active,
            playing: matches!(
                self.state,
                PlaybackState::Playing { .. } | PlaybackState::Loading { .. }
            ),
            loading: matches!(self.state, PlaybackState::Loading { .. }),
            progress: self.progress,
            error: self.error.clone(),
            using_device_voice: self.using_device_voice,
            player_visible: self.visible,
            failed_paragraphs: self.cache.failed().iter().copied().collect(),
            paragraph_count: self.paragraphs.len(),
        }
    }

    fn publish(&self) {
        let next = self.snapshot();
        self.snapshot_tx.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }
}

fn percent(position: Duration, duration: Duration) -> f32 {
    if duration.is_zero() {
        return 0.0;
    }
    (position.as_secs_f32() / duration.as_secs_f32() * 100.0).clamp(0.0, 100.0)
}
