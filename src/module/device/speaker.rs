//! Speech output.
//!
//! Phrases are queued and spoken one after another on a dedicated worker thread, so the
//! caller never waits for audio to finish.

use soloud::*;
use std::process::Command;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use crate::module::error::ViewerError;
use crate::module::util::conf;

/// Anything that accepts phrases to be spoken.
pub trait SpeechSink {
    fn enqueue(&self, text: &str) -> Result<(), ViewerError>;
}

/// Something that can speak one phrase to completion.
pub trait SpeechEngine {
    fn say(&mut self, text: &str) -> Result<(), ViewerError>;
}

/// FIFO of phrases drained by a worker thread.
///
/// Dropping the queue lets the worker finish what is queued and exit.
pub struct SpeechQueue {
    tx: mpsc::Sender<String>,
}

impl SpeechQueue {
    /// Start the worker. The engine is built on the worker thread and never leaves it.
    pub fn spawn<F>(factory: F) -> Self
    where
        F: FnOnce() -> Result<Box<dyn SpeechEngine>, ViewerError> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel::<String>();
        thread::spawn(move || {
            let mut engine = match factory() {
                Ok(engine) => engine,
                Err(e) => {
                    log::error!("Speech engine unavailable: {}", e);
                    for text in rx {
                        log::debug!("Dropped phrase: {}", text);
                    }
                    return;
                }
            };
            for text in rx {
                if let Err(e) = engine.say(&text) {
                    log::warn!("Failed to speak \"{}\": {}", text, e);
                }
            }
            log::debug!("Speech worker finished");
        });
        Self { tx }
    }

    /// Queue backed by the engine named in the config.
    pub fn from_conf(conf: &conf::Speech) -> Self {
        let lang = conf.lang.clone();
        match conf.engine.as_str() {
            "espeak" => Self::spawn(move || Ok(Box::new(EspeakEngine::new(&lang)) as Box<dyn SpeechEngine>)),
            other => {
                if other != "soloud" {
                    log::warn!("Unknown speech engine {}, using soloud", other);
                }
                Self::spawn(|| Ok(Box::new(SoloudEngine::new()?) as Box<dyn SpeechEngine>))
            }
        }
    }
}

impl SpeechSink for SpeechQueue {
    fn enqueue(&self, text: &str) -> Result<(), ViewerError> {
        self.tx
            .send(sanitize(text))
            .map_err(|_| ViewerError::Speech("speech worker stopped".to_string()))
    }
}

/// Built-in soloud speech synthesizer.
pub struct SoloudEngine {
    sl: Soloud,
}

impl SoloudEngine {
    pub fn new() -> Result<Self, ViewerError> {
        let sl = Soloud::default().map_err(|e| ViewerError::Speech(format!("{:?}", e)))?;
        Ok(Self { sl })
    }
}

impl SpeechEngine for SoloudEngine {
    fn say(&mut self, text: &str) -> Result<(), ViewerError> {
        let mut speech = audio::Speech::default();
        speech
            .set_text(text)
            .map_err(|e| ViewerError::Speech(format!("{:?}", e)))?;
        self.sl.play(&speech);
        while self.sl.voice_count() > 0 {
            thread::sleep(Duration::from_millis(100));
        }
        Ok(())
    }
}

/// espeak-ng command line synthesizer.
pub struct EspeakEngine {
    voice: String,
}

impl EspeakEngine {
    pub fn new(voice: &str) -> Self {
        Self {
            voice: voice.to_string(),
        }
    }
}

impl SpeechEngine for EspeakEngine {
    fn say(&mut self, text: &str) -> Result<(), ViewerError> {
        let output = Command::new("espeak-ng")
            .arg("-v")
            .arg(&self.voice)
            .arg(text)
            .output()
            .map_err(|e| ViewerError::Speech(format!("espeak-ng: {}", e)))?;
        if output.status.success() {
            Ok(())
        } else {
            Err(ViewerError::Speech(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ))
        }
    }
}

/// Strip control characters and surrounding whitespace.
pub fn sanitize(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_control())
        .collect::<String>()
        .trim()
        .to_string()
}
