//! Announce newly seen object classes.
//!
//! A phrase spoken once stays quiet until its cooldown expires, however often the class
//! shows up in between.

use std::collections::HashMap;
use tokio::time::{Duration, Instant};

use crate::module::define;
use crate::module::device::speaker::SpeechSink;
use crate::module::vision::detector::DetectionBatch;

/// Phrases spoken recently and when each becomes eligible again.
///
#[derive(Debug)]
pub struct SpokenPhraseRegistry {
    cooldown: Duration,
    entries: HashMap<String, Instant>, // phrase -> expiry
}

impl SpokenPhraseRegistry {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            entries: HashMap::new(),
        }
    }

    /// Register `phrase` unless it is still cooling down. Returns true if registered.
    pub fn try_register(&mut self, phrase: &str, now: Instant) -> bool {
        if self.is_cooling(phrase, now) {
            return false;
        }
        self.entries.insert(phrase.to_string(), now + self.cooldown);
        true
    }

    /// Forget a registration, e.g. when the phrase never made it to the speech queue.
    pub fn forget(&mut self, phrase: &str) {
        self.entries.remove(phrase);
    }

    /// Drop expired entries.
    pub fn purge(&mut self, now: Instant) {
        self.entries.retain(|_, expiry| now < *expiry);
    }

    pub fn is_cooling(&self, phrase: &str, now: Instant) -> bool {
        self.entries.get(phrase).map_or(false, |expiry| now < *expiry)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Turns detection batches into speech.
pub struct Announcer {
    sink: Box<dyn SpeechSink>,
    registry: SpokenPhraseRegistry,
}

impl Announcer {
    pub fn new(sink: Box<dyn SpeechSink>, cooldown: Duration) -> Self {
        Self {
            sink,
            registry: SpokenPhraseRegistry::new(cooldown),
        }
    }

    /// Announce every class in the batch that is not cooling down.
    /// Returns the phrases handed to the speech sink.
    pub fn announce(&mut self, batch: &DetectionBatch) -> Vec<String> {
        self.announce_at(batch, Instant::now())
    }

    pub fn announce_at(&mut self, batch: &DetectionBatch, now: Instant) -> Vec<String> {
        self.registry.purge(now);
        let mut spoken = vec![];
        for class in batch.class_names() {
            let phrase = define::speech::phrase(&class);
            if !self.registry.try_register(&phrase, now) {
                continue;
            }
            match self.sink.enqueue(&phrase) {
                Ok(()) => {
                    log::info!("Announce: {}", phrase);
                    spoken.push(phrase);
                }
                Err(e) => {
                    log::warn!("Speech enqueue failed: {}", e);
                    self.registry.forget(&phrase);
                }
            }
        }
        spoken
    }

    pub fn registry(&self) -> &SpokenPhraseRegistry {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::device::speaker::fake::RecordingSink;
    use crate::module::vision::detector::{BBox, Detection};

    fn batch(classes: &[&str]) -> DetectionBatch {
        DetectionBatch::filter(
            classes
                .iter()
                .map(|c| Detection::new(c, 0.9, BBox::new(0.0, 0.0, 10.0, 10.0)))
                .collect(),
            0.5,
        )
    }

    fn announcer() -> (Announcer, RecordingSink) {
        let sink = RecordingSink::default();
        let announcer = Announcer::new(
            Box::new(sink.clone()),
            Duration::from_millis(define::speech::COOLDOWN_MS),
        );
        (announcer, sink)
    }

    #[test]
    fn one_phrase_per_class_test() {
        let (mut announcer, sink) = announcer();
        let now = Instant::now();
        let spoken = announcer.announce_at(&batch(&["person", "person", "dog", "person"]), now);
        assert_eq!(spoken, vec!["There is a person", "There is a dog"]);
        assert_eq!(sink.spoken(), vec!["There is a person", "There is a dog"]);
    }

    #[test]
    fn cooldown_test() {
        let (mut announcer, sink) = announcer();
        let start = Instant::now();
        announcer.announce_at(&batch(&["person"]), start);
        for ms in [1, 1000, 2000, 4999] {
            let spoken = announcer.announce_at(&batch(&["person"]), start + Duration::from_millis(ms));
            assert!(spoken.is_empty(), "repeated at {} ms", ms);
        }
        // New classes are not held back by another phrase's cooldown.
        let spoken = announcer.announce_at(&batch(&["person", "cat"]), start + Duration::from_millis(3000));
        assert_eq!(spoken, vec!["There is a cat"]);

        let spoken = announcer.announce_at(&batch(&["person"]), start + Duration::from_millis(5000));
        assert_eq!(spoken, vec!["There is a person"]);
        assert_eq!(
            sink.spoken(),
            vec!["There is a person", "There is a cat", "There is a person"]
        );
    }

    #[test]
    fn purge_test() {
        let mut registry = SpokenPhraseRegistry::new(Duration::from_millis(5000));
        let start = Instant::now();
        assert!(registry.try_register("There is a dog", start));
        assert!(registry.try_register("There is a cat", start + Duration::from_millis(3000)));
        assert!(registry.is_cooling("There is a dog", start + Duration::from_millis(4999)));
        registry.purge(start + Duration::from_millis(5000));
        assert_eq!(registry.len(), 1);
        assert!(!registry.is_cooling("There is a dog", start + Duration::from_millis(5000)));
        registry.purge(start + Duration::from_millis(8000));
        assert!(registry.is_empty());
    }

    #[test]
    fn failed_enqueue_test() {
        let sink = RecordingSink {
            fail: true,
            ..Default::default()
        };
        let mut announcer = Announcer::new(Box::new(sink), Duration::from_millis(5000));
        let spoken = announcer.announce_at(&batch(&["person"]), Instant::now());
        assert!(spoken.is_empty());
        assert!(announcer.registry().is_empty());
    }

    #[test]
    fn empty_batch_test() {
        let (mut announcer, sink) = announcer();
        assert!(announcer.announce(&DetectionBatch::default()).is_empty());
        assert!(sink.spoken().is_empty());
    }
}
