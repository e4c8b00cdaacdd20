//! Per-article paragraph audio: decoded clips, in-flight fetches and
//! failures, keyed by paragraph index.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use tracing::{debug, warn};

use crate::audio::AudioClip;
use crate::synth::{SpeechFetcher, SpeechOutput};

/// How a paragraph fetch ended.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    Decoded(Arc<AudioClip>),
    /// Remote synthesis is not configured.
    NoRemote,
    /// The provider or decoding failed.
    Failed(String),
    /// The fetch task itself died.
    Crashed(String),
}

pub type SharedFetch = Shared<BoxFuture<'static, FetchOutcome>>;

pub struct AudioCache {
    fetcher: Arc<dyn SpeechFetcher>,
    decoded: HashMap<usize, Arc<AudioClip>>,
    in_flight: HashMap<usize, SharedFetch>,
    failed: BTreeSet<usize>,
}

impl AudioCache {
    pub fn new(fetcher: Arc<dyn SpeechFetcher>) -> Self {
        Self {
            fetcher,
            decoded: HashMap::new(),
            in_flight: HashMap::new(),
            failed: BTreeSet::new(),
        }
    }

    pub fn clip(&self, index: usize) -> Option<Arc<AudioClip>> {
        self.decoded.get(&index).cloned()
    }

    pub fn is_in_flight(&self, index: usize) -> bool {
        self.in_flight.contains_key(&index)
    }

    pub fn failed(&self) -> &BTreeSet<usize> {
        &self.failed
    }

    /// Future resolving to the audio for `index`. At most one fetch per index
    /// runs at a time; concurrent callers share it.
    pub fn request(&mut self, index: usize, text: String) -> SharedFetch {
        if let Some(clip) = self.clip(index) {
            return futures::future::ready(FetchOutcome::Decoded(clip)).boxed().shared();
        }
        if let Some(pending) = self.in_flight.get(&index) {
            debug!("Joining in-flight fetch for paragraph {index}");
            return pending.clone();
        }

        let fetcher = Arc::clone(&self.fetcher);
        let task = tokio::spawn(async move { fetcher.fetch(&text).await });
        let fetch = async move {
            match task.await {
                Ok(Ok(SpeechOutput::Remote(clip))) => FetchOutcome::Decoded(Arc::new(clip)),
                Ok(Ok(SpeechOutput::Device)) => FetchOutcome::NoRemote,
                Ok(Err(e)) => FetchOutcome::Failed(format!("{e:#}")),
                Err(e) => FetchOutcome::Crashed(e.to_string()),
            }
        }
        .boxed()
        .shared();
        self.in_flight.insert(index, fetch.clone());
        fetch
    }

    /// Record the outcome of a fetch. Safe to call more than once.
    pub fn settle(&mut self, index: usize, outcome: &FetchOutcome) {
        self.in_flight.remove(&index);
        match outcome {
            FetchOutcome::Decoded(clip) => {
                self.failed.remove(&index);
                self.decoded.insert(index, Arc::clone(clip));
            }
            FetchOutcome::NoRemote => {}
            FetchOutcome::Failed(reason) | FetchOutcome::Crashed(reason) => {
                warn!("Audio for paragraph {index} failed: {reason}");
                self.failed.insert(index);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::GatedFetcher;

    #[tokio::test]
    async fn concurrent_requests_share_one_fetch() {
        let fetcher = Arc::new(GatedFetcher::default());
        let gate = fetcher.gate("a");
        let mut cache = AudioCache::new(fetcher.clone());

        let first = cache.request(0, "a".into());
        let second = cache.request(0, "a".into());
        assert!(cache.is_in_flight(0));
        gate.notify_one();

        let (x, y) = tokio::join!(first, second);
        assert!(matches!(x, FetchOutcome::Decoded(_)));
        assert!(matches!(y, FetchOutcome::Decoded(_)));
        assert_eq!(fetcher.calls("a"), 1);

        cache.settle(0, &x);
        assert!(!cache.is_in_flight(0));
        assert!(cache.clip(0).is_some());
        let again = cache.request(0, "a".into()).await;
        assert!(matches!(again, FetchOutcome::Decoded(_)));
        assert_eq!(fetcher.calls("a"), 1);
    }

    #[tokio::test]
    async fn failures_are_tracked_but_not_cached() {
        let fetcher = Arc::new(GatedFetcher::default());
        fetcher.fail("bad");
        let mut cache = AudioCache::new(fetcher.clone());

        let outcome = cache.request(3, "bad".into()).await;
        assert!(matches!(outcome, FetchOutcome::Failed(_)));
        cache.settle(3, &outcome);
        assert!(cache.failed().contains(&3));
        assert!(cache.clip(3).is_none());

        cache.request(3, "bad".into()).await;
        assert_eq!(fetcher.calls("bad"), 2);
    }
}
