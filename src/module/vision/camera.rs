//! Camera Functions
//!
//! Device enumeration and frame capture. The session lifecycle on top of this lives in
//! `vision::session`.

use rscam::{Camera, Config};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use super::Frame;
use crate::module::define;
use crate::module::error::ViewerError;
use crate::module::util::conf;

/// Which way a camera points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Facing {
    User,        // front-facing
    Environment, // rear-facing
    Unknown,
}

impl Facing {
    /// Convert a config string to a facing mode.
    pub fn from_string(s: &str) -> Facing {
        match s {
            "user" => Facing::User,
            "environment" => Facing::Environment,
            _ => Facing::Unknown,
        }
    }

    /// Guess the facing mode from a device label.
    pub fn from_label(label: &str) -> Facing {
        let label = label.to_lowercase();
        if ["front", "user", "facetime"].iter().any(|k| label.contains(k)) {
            Facing::User
        } else if ["rear", "back", "environment", "world"]
            .iter()
            .any(|k| label.contains(k))
        {
            Facing::Environment
        } else {
            Facing::Unknown
        }
    }

    /// The opposite facing mode. Unknown is treated as user-facing.
    pub fn toggled(&self) -> Facing {
        match self {
            Facing::User | Facing::Unknown => Facing::Environment,
            Facing::Environment => Facing::User,
        }
    }
}

/// Snapshot of one video input device.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraDevice {
    pub id: String,
    pub label: String,
    pub facing: Facing,
}

/// How to pick the camera to open.
#[derive(Debug, Clone, PartialEq)]
pub enum Selector {
    DeviceId(String),
    Facing(Facing),
}

/// Stream settings applied when a device is opened.
#[derive(Debug, Clone)]
pub struct CaptureSettings {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub grab_times: u8, // grabs per frame, only the last one is used
}

impl CaptureSettings {
    pub fn from_conf(conf: &conf::Camera) -> Self {
        Self {
            width: conf.width as u32,
            height: conf.height as u32,
            fps: conf.fps.max(1) as u32,
            grab_times: conf.grab_times.max(1),
        }
    }
}

/// A live stream of frames from one opened device.
///
/// Sources are lent to a blocking worker for each grab, so they must be `Send`.
pub trait FrameSource: Send {
    /// Grab the current frame. `Ok(None)` means the stream is not ready yet.
    fn grab(&mut self) -> Result<Option<Frame>, ViewerError>;

    /// Release the hardware. Must be safe to call twice.
    fn stop(&mut self);
}

/// Platform capture API.
pub trait CameraBackend {
    /// List the video input devices currently present.
    fn enumerate(&self) -> Result<Vec<CameraDevice>, ViewerError>;

    /// Open a device and start streaming.
    fn open(
        &self,
        device: &CameraDevice,
        settings: &CaptureSettings,
    ) -> Result<Box<dyn FrameSource>, ViewerError>;
}

/// V4L2 capture backend.
///
pub struct V4l2Backend {
    dev_dir: PathBuf,
    sysfs_dir: PathBuf,
}

impl Default for V4l2Backend {
    fn default() -> Self {
        Self::new()
    }
}

impl V4l2Backend {
    pub fn new() -> Self {
        Self::with_dirs(define::path::DEV_DIR, define::path::V4L2_SYSFS_DIR)
    }

    /// Backend reading device nodes and names from the given directories.
    pub fn with_dirs(dev_dir: impl AsRef<Path>, sysfs_dir: impl AsRef<Path>) -> Self {
        Self {
            dev_dir: dev_dir.as_ref().to_path_buf(),
            sysfs_dir: sysfs_dir.as_ref().to_path_buf(),
        }
    }

    /// Read a sysfs attribute of a video node, if present.
    fn attr(&self, node: &str, name: &str) -> Option<String> {
        fs::read_to_string(self.sysfs_dir.join(node).join(name))
            .ok()
            .map(|s| s.trim().to_string())
    }
}

impl CameraBackend for V4l2Backend {
    fn enumerate(&self) -> Result<Vec<CameraDevice>, ViewerError> {
        let mut nodes: Vec<(u32, String)> = fs::read_dir(&self.dev_dir)?
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter_map(|name| {
                let idx = name.strip_prefix("video")?.parse::<u32>().ok()?;
                Some((idx, name))
            })
            .collect();
        nodes.sort();

        let devices = nodes
            .into_iter()
            // UVC cameras expose a metadata node next to the capture node.
            .filter(|(_, node)| self.attr(node, "index").map_or(true, |i| i == "0"))
            .map(|(_, node)| {
                let label = self.attr(&node, "name").unwrap_or_else(|| node.clone());
                CameraDevice {
                    id: self.dev_dir.join(&node).to_string_lossy().into_owned(),
                    facing: Facing::from_label(&label),
                    label,
                }
            })
            .collect::<Vec<_>>();
        log::debug!("Enumerated cameras: {:?}", devices);
        Ok(devices)
    }

    fn open(
        &self,
        device: &CameraDevice,
        settings: &CaptureSettings,
    ) -> Result<Box<dyn FrameSource>, ViewerError> {
        Ok(Box::new(V4l2Camera::new(device, settings)?))
    }
}

/// How long `grab` waits for the capture thread before reporting "not ready".
const GRAB_TIMEOUT: Duration = Duration::from_secs(1);
/// How long `stop` waits for the capture thread to release the device.
const STOP_TIMEOUT: Duration = Duration::from_millis(500);
/// Decoded frames buffered between the capture thread and `grab`.
const FRAME_QUEUE: usize = 2;

/// Represents a V4L2 camera stream.
///
/// The rscam handle lives on a dedicated capture thread and never leaves it. `grab` waits a
/// bounded time for the newest decoded frame, so a stalled device cannot hold the caller.
pub struct V4l2Camera {
    frames: Option<mpsc::Receiver<Frame>>, // None once stopped
    running: Arc<AtomicBool>,
    released: Option<mpsc::Receiver<()>>,
}

impl V4l2Camera {
    /// Opens the device and starts an MJPG stream with the given settings.
    ///
    /// Open errors are reported here even though the device is opened on the capture thread.
    pub fn new(device: &CameraDevice, settings: &CaptureSettings) -> Result<Self, ViewerError> {
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), ViewerError>>();
        let (frame_tx, frame_rx) = mpsc::sync_channel::<Frame>(FRAME_QUEUE);
        let (released_tx, released_rx) = mpsc::channel::<()>();
        let running = Arc::new(AtomicBool::new(true));

        let flag = Arc::clone(&running);
        let id = device.id.clone();
        let settings = settings.clone();
        thread::Builder::new()
            .name(format!("capture {}", device.id))
            .spawn(move || {
                let cap = match open_stream(&id, &settings) {
                    Ok(cap) => cap,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                capture_loop(cap, &flag, &frame_tx, settings.grab_times);
                log::info!("Camera {} released", id);
                let _ = released_tx.send(());
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                log::info!("Camera {} ({}) started", device.id, device.label);
                Ok(Self {
                    frames: Some(frame_rx),
                    running,
                    released: Some(released_rx),
                })
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(ViewerError::DeviceUnavailable(format!(
                "{}: capture thread exited",
                device.id
            ))),
        }
    }
}

/// Open the device node and start streaming.
fn open_stream(id: &str, settings: &CaptureSettings) -> Result<Camera, ViewerError> {
    let mut cap = Camera::new(id).map_err(|e| open_error(id, e))?;
    cap.start(&Config {
        interval: (1, settings.fps),
        resolution: (settings.width, settings.height),
        format: b"MJPG",
        nbuffers: 1,
        ..Default::default()
    })
    .map_err(|e| match e {
        rscam::Error::Io(e) => open_error(id, e),
        other => ViewerError::DeviceUnavailable(format!("{}: {:?}", id, other)),
    })?;
    Ok(cap)
}

/// Capture and decode until stopped, the receiver goes away, or the device fails.
fn capture_loop(
    mut cap: Camera,
    running: &AtomicBool,
    frames: &mpsc::SyncSender<Frame>,
    grab_times: u8,
) {
    while running.load(Ordering::Relaxed) {
        // Grab stale frames to reduce delay.
        for _ in 1..grab_times {
            let _ = cap.capture();
        }
        let raw = match cap.capture() {
            Ok(raw) => raw,
            Err(e) => {
                log::warn!("Capture failed: {}", e);
                break;
            }
        };
        if raw.is_empty() {
            continue;
        }
        // A camera that is still warming up delivers truncated JPEGs.
        let frame = match image::load_from_memory_with_format(&raw[..], image::ImageFormat::Jpeg) {
            Ok(img) => Frame::new(img.to_rgb8()),
            Err(e) => {
                log::debug!("Skipping undecodable frame: {}", e);
                continue;
            }
        };
        match frames.try_send(frame) {
            Ok(()) | Err(mpsc::TrySendError::Full(_)) => (),
            Err(mpsc::TrySendError::Disconnected(_)) => break,
        }
    }
    if let Err(e) = cap.stop() {
        log::warn!("Camera stop failed: {:?}", e);
    }
}

impl FrameSource for V4l2Camera {
    fn grab(&mut self) -> Result<Option<Frame>, ViewerError> {
        let frames = match self.frames.as_ref() {
            Some(frames) => frames,
            None => return Ok(None),
        };
        let mut frame = match frames.recv_timeout(GRAB_TIMEOUT) {
            Ok(frame) => frame,
            Err(mpsc::RecvTimeoutError::Timeout) => return Ok(None),
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                return Err(ViewerError::Capture("camera stream ended".into()))
            }
        };
        // Keep only the newest frame.
        while let Ok(newer) = frames.try_recv() {
            frame = newer;
        }
        Ok(Some(frame))
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        // Dropping the receiver also ends a capture thread that is waiting to send.
        if self.frames.take().is_none() {
            return;
        }
        if let Some(released) = self.released.take() {
            if released.recv_timeout(STOP_TIMEOUT).is_err() {
                log::warn!("Camera did not stop in time, it is released when its capture returns");
            }
        }
    }
}

impl Drop for V4l2Camera {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Classify a failure to open a device node.
fn open_error(id: &str, e: std::io::Error) -> ViewerError {
    match e.kind() {
        std::io::ErrorKind::PermissionDenied => ViewerError::PermissionDenied(format!("{id}: {e}")),
        _ => ViewerError::DeviceUnavailable(format!("{id}: {e}")),
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn facing_test() {
        assert_eq!(Facing::from_label("Integrated Front Camera"), Facing::User);
        assert_eq!(Facing::from_label("Rear camera"), Facing::Environment);
        assert_eq!(Facing::from_label("HD Webcam C270"), Facing::Unknown);
        assert_eq!(Facing::from_string("environment"), Facing::Environment);
        assert_eq!(Facing::User.toggled(), Facing::Environment);
        assert_eq!(Facing::Environment.toggled(), Facing::User);
        assert_eq!(Facing::Unknown.toggled(), Facing::Environment);
    }

    #[test]
    fn v4l2_enumerate_test() {
        let dev = tempfile::tempdir().unwrap();
        let sys = tempfile::tempdir().unwrap();
        for node in ["video0", "video1", "video2", "video10", "null"] {
            fs::write(dev.path().join(node), "").unwrap();
        }
        // video0 capture node, video1 its metadata node
        for (node, name, index) in [
            ("video0", "Integrated Front Camera", "0"),
            ("video1", "Integrated Front Camera", "1"),
            ("video2", "USB Rear Camera", "0"),
        ] {
            fs::create_dir_all(sys.path().join(node)).unwrap();
            fs::write(sys.path().join(node).join("name"), format!("{name}\n")).unwrap();
            fs::write(sys.path().join(node).join("index"), format!("{index}\n")).unwrap();
        }

        let backend = V4l2Backend::with_dirs(dev.path(), sys.path());
        let devices = backend.enumerate().unwrap();
        let ids: Vec<String> = devices.iter().map(|d| d.id.clone()).collect();
        assert_eq!(
            ids,
            vec![
                dev.path().join("video0").to_string_lossy().into_owned(),
                dev.path().join("video2").to_string_lossy().into_owned(),
                dev.path().join("video10").to_string_lossy().into_owned(),
            ]
        );
        assert_eq!(devices[0].facing, Facing::User);
        assert_eq!(devices[1].label, "USB Rear Camera");
        assert_eq!(devices[1].facing, Facing::Environment);
        // No sysfs entry: label falls back to the node name.
        assert_eq!(devices[2].label, "video10");
        assert_eq!(devices[2].facing, Facing::Unknown);
    }

    #[test]
    fn v4l2_enumerate_empty_test() {
        let dev = tempfile::tempdir().unwrap();
        let backend = V4l2Backend::with_dirs(dev.path(), dev.path());
        assert!(backend.enumerate().unwrap().is_empty());
    }

    #[test]
    fn v4l2_open_missing_test() {
        let dev = tempfile::tempdir().unwrap();
        let backend = V4l2Backend::with_dirs(dev.path(), dev.path());
        let device = CameraDevice {
            id: dev.path().join("video7").to_string_lossy().into_owned(),
            label: "gone".to_string(),
            facing: Facing::Unknown,
        };
        let settings = CaptureSettings::from_conf(&conf::Config::default().camera);
        let res = backend.open(&device, &settings);
        assert!(matches!(res, Err(ViewerError::DeviceUnavailable(_))));
    }
}
