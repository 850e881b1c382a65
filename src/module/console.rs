//! Terminal front end.
//!
//! Reads `start [camera]`, `switch`, `stop` and `quit` from stdin and prints what the
//! detection loop publishes.

use image::{DynamicImage, RgbaImage};
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;

use crate::module::detect_loop::{LoopHandle, ViewerControl, ViewerOutput};
use crate::module::error::ViewerError;
use crate::module::vision::camera::{Facing, Selector};
use crate::module::vision::session::CameraStatus;

const SAVE_INTERVAL: Duration = Duration::from_secs(1);

/// A parsed input line.
#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    Start(Option<Selector>),
    Switch,
    Stop,
    Quit,
    Empty,
    Unknown(String),
}

/// Parse one line typed by the user.
///
/// `start user` and `start environment` select by facing, any other argument is a device id.
pub fn parse(line: &str) -> Input {
    let mut words = line.split_whitespace();
    match (words.next(), words.next()) {
        (None, _) => Input::Empty,
        (Some("start"), None) => Input::Start(None),
        (Some("start"), Some(arg)) => match Facing::from_string(arg) {
            Facing::Unknown => Input::Start(Some(Selector::DeviceId(arg.to_string()))),
            facing => Input::Start(Some(Selector::Facing(facing))),
        },
        (Some("switch"), _) => Input::Switch,
        (Some("stop"), _) => Input::Stop,
        (Some("quit"), _) | (Some("exit"), _) => Input::Quit,
        (Some(_), _) => Input::Unknown(line.trim().to_string()),
    }
}

/// Remembers what was last shown so only changes are printed.
#[derive(Debug, Default)]
pub struct StatusLine {
    labels: Vec<String>,
    camera: CameraStatus,
    error: Option<String>,
}

impl StatusLine {
    /// Lines worth printing for a new output snapshot.
    pub fn update(&mut self, out: &ViewerOutput) -> Vec<String> {
        let mut lines = vec![];
        if out.camera != self.camera {
            lines.push(match &out.camera {
                CameraStatus::Idle => "Camera: stopped".to_string(),
                CameraStatus::Requesting => "Camera: requesting".to_string(),
                CameraStatus::Active(device) => format!("Camera: {} ({})", device.label, device.id),
            });
            self.camera = out.camera.clone();
        }
        if out.labels != self.labels {
            if !out.labels.is_empty() {
                lines.push(format!("Detected: {}", out.labels.join(", ")));
            }
            self.labels = out.labels.clone();
        }
        if out.error != self.error {
            if let Some(error) = &out.error {
                lines.push(format!("Error: {}", error));
            }
            self.error = out.error.clone();
        }
        lines
    }
}

/// Write an annotated frame as an image file. The format follows the extension.
pub fn save_frame(frame: &RgbaImage, path: &str) -> Result<(), ViewerError> {
    DynamicImage::ImageRgba8(frame.clone()).to_rgb8().save(path)?;
    Ok(())
}

/// Drive the viewer from the terminal until `quit`, ctrl-c, or the loop ends.
pub async fn run(
    control: ViewerControl,
    handle: LoopHandle,
    mut rx: watch::Receiver<ViewerOutput>,
    save_path: Option<String>,
) {
    println!("Commands: start [device|user|environment], switch, stop, quit");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut status = StatusLine::default();
    let mut last_saved: Option<Instant> = None;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                log::info!("Interrupted");
                break;
            }
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => match parse(&line) {
                    Input::Start(selector) => {
                        control.start(selector);
                    }
                    Input::Switch => {
                        control.switch_camera();
                    }
                    Input::Stop => {
                        control.stop_camera();
                    }
                    Input::Quit => break,
                    Input::Empty => (),
                    Input::Unknown(cmd) => println!("Unknown command: {}", cmd),
                },
                Ok(None) => stdin_open = false,
                Err(e) => {
                    log::warn!("Failed to read stdin: {}", e);
                    stdin_open = false;
                }
            },
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let out = rx.borrow_and_update().clone();
                for line in status.update(&out) {
                    log::info!("{}", line);
                    println!("{}", line);
                }
                if let (Some(path), Some(frame)) = (&save_path, &out.frame) {
                    if last_saved.map_or(true, |t| t.elapsed() >= SAVE_INTERVAL) {
                        if let Err(e) = save_frame(frame, path) {
                            log::warn!("Failed to save {}: {}", path, e);
                        }
                        last_saved = Some(Instant::now());
                    }
                }
            }
        }
    }

    drop(control);
    if handle.shutdown().await.is_none() {
        log::error!("Detection loop ended abnormally");
    }
}
