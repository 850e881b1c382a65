//! Provide Loop for Detection.
//!
//! The loop runs on a single local task. Each tick grabs the current frame, runs the
//! detector on a blocking worker, then annotates, announces and publishes the result.
//! Commands from the presentation layer are handled between ticks on the same task.

use chrono::{DateTime, Local};
use image::RgbaImage;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::module::announce::Announcer;
use crate::module::device::speaker::SpeechQueue;
use crate::module::error::ViewerError;
use crate::module::util::init::ViewerProperty;
use crate::module::vision::annotator::Annotator;
use crate::module::vision::camera::{CameraDevice, Selector, V4l2Backend};
use crate::module::vision::detector::onnx::YoloV8;
use crate::module::vision::detector::{DetectionBatch, Detector, ModelSlot, ModelStatus};
use crate::module::vision::session::{CameraSessionManager, CameraStatus};

/// Requests from the presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub enum ViewerCommand {
    Start(Option<Selector>), // None picks the default camera
    SwitchCamera,
    StopCamera,
}

/// What the presentation layer observes.
///
#[derive(Debug, Clone, Default)]
pub struct ViewerOutput {
    pub labels: Vec<String>,           // distinct classes of the last batch
    pub frame: Option<Arc<RgbaImage>>, // frame with the overlay composited
    pub camera: CameraStatus,
    pub model: ModelStatus,
    pub devices: Vec<CameraDevice>,
    pub error: Option<String>,
    pub updated_at: Option<DateTime<Local>>,
}

/// Result of one loop iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    ModelNotReady,
    FrameNotReady,
    SurfaceMissing,
    Failed,
    Detected(usize), // detections above threshold
}

enum Step {
    ModelNotReady,
    Detected(DetectionBatch, Option<Arc<RgbaImage>>),
}

/// Everything the loop owns.
pub struct Viewer {
    camera: CameraSessionManager,
    model: ModelSlot,
    annotator: Annotator,
    announcer: Announcer,
    threshold: f32,
    out: watch::Sender<ViewerOutput>,
    cycles: u64,
}

impl Viewer {
    pub fn new(
        camera: CameraSessionManager,
        model: ModelSlot,
        annotator: Annotator,
        announcer: Announcer,
        threshold: f32,
    ) -> (Self, watch::Receiver<ViewerOutput>) {
        let (out, rx) = watch::channel(ViewerOutput::default());
        let viewer = Self {
            camera,
            model,
            annotator,
            announcer,
            threshold,
            out,
            cycles: 0,
        };
        (viewer, rx)
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub fn camera_status(&self) -> CameraStatus {
        self.camera.status()
    }

    /// Apply a command. Failures are reported in the output, never returned.
    pub fn handle(&mut self, cmd: ViewerCommand) {
        log::debug!("Command {:?}", cmd);
        let stopped = cmd == ViewerCommand::StopCamera;
        let res = match cmd {
            ViewerCommand::Start(selector) => match selector.or_else(|| self.camera.default_selector()) {
                Some(selector) => self.camera.start(selector).map(|_| ()),
                None => Err(ViewerError::DeviceUnavailable("no camera found".into())),
            },
            ViewerCommand::SwitchCamera => self.camera.switch_camera().map(|_| ()),
            ViewerCommand::StopCamera => {
                self.camera.stop();
                Ok(())
            }
        };
        let error = match res {
            Ok(()) => None,
            Err(e) => {
                if e.is_retryable() {
                    log::warn!("{}", e);
                } else {
                    log::error!("{}", e);
                }
                Some(e.to_string())
            }
        };
        let camera = self.camera.status();
        let devices = self
            .camera
            .devices()
            .map(|d| d.to_vec())
            .unwrap_or_default();
        self.out.send_modify(|o| {
            o.camera = camera;
            o.devices = devices;
            o.error = error;
            if stopped {
                o.labels.clear();
                o.frame = None;
            }
        });
    }

    /// One iteration of the loop. Never fails; problems end up in `ViewerOutput::error`.
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        self.cycles += 1;
        let step = match self.model.poll() {
            ModelStatus::Ready => self.detect_frame().await,
            _ => Ok(Step::ModelNotReady),
        };
        let camera = self.camera.status();
        let model = self.model.status();

        match step {
            Ok(Step::Detected(batch, frame)) => {
                let count = batch.len();
                let labels = batch.class_names();
                self.out.send_modify(|o| {
                    o.labels = labels;
                    o.frame = frame;
                    o.camera = camera;
                    o.model = model;
                    o.error = None;
                    o.updated_at = Some(Local::now());
                });
                CycleOutcome::Detected(count)
            }
            Ok(Step::ModelNotReady) => {
                let error = match &model {
                    ModelStatus::Failed(msg) => Some(msg.clone()),
                    _ => None,
                };
                self.publish_status(camera, model, error);
                CycleOutcome::ModelNotReady
            }
            Err(ViewerError::FrameNotReady) => {
                self.publish_status(camera, model, None);
                CycleOutcome::FrameNotReady
            }
            Err(e) => {
                let outcome = match &e {
                    ViewerError::RenderSurfaceMissing => CycleOutcome::SurfaceMissing,
                    _ => CycleOutcome::Failed,
                };
                self.publish_status(camera, model, Some(e.to_string()));
                outcome
            }
        }
    }

    /// Release the camera and the drawing surface.
    pub fn teardown(&mut self) {
        self.camera.stop();
        self.annotator.detach();
        let camera = self.camera.status();
        self.out.send_modify(|o| {
            o.camera = camera;
            o.labels.clear();
            o.frame = None;
        });
        log::info!("Viewer stopped after {} cycles", self.cycles);
    }

    async fn detect_frame(&mut self) -> Result<Step, ViewerError> {
        let frame = match self.camera.grab().await? {
            Some(frame) if frame.is_ready() => Arc::new(frame),
            _ => return Err(ViewerError::FrameNotReady),
        };
        let detections = match self.model.detect(Arc::clone(&frame)).await? {
            Some(detections) => detections,
            None => return Ok(Step::ModelNotReady),
        };
        let batch = DetectionBatch::filter(detections, self.threshold);
        self.annotator.render(&batch, frame.size())?;
        self.announcer.announce(&batch);
        let annotated = self.annotator.annotated(&frame).map(Arc::new);
        Ok(Step::Detected(batch, annotated))
    }

    /// Publish status changes only, so idle cycles do not wake observers.
    fn publish_status(&self, camera: CameraStatus, model: ModelStatus, error: Option<String>) {
        self.out.send_if_modified(|o| {
            let mut changed = false;
            if o.camera != camera {
                o.camera = camera;
                changed = true;
            }
            if o.model != model {
                o.model = model;
                changed = true;
            }
            if let Some(error) = error {
                if o.error.as_ref() != Some(&error) {
                    log::warn!("{}", error);
                    o.error = Some(error);
                    changed = true;
                }
            }
            if !matches!(o.camera, CameraStatus::Active(_)) && (!o.labels.is_empty() || o.frame.is_some()) {
                o.labels.clear();
                o.frame = None;
                changed = true;
            }
            changed
        });
    }
}

/// Sends commands to a running loop. The loop tears down once every control is dropped.
#[derive(Clone)]
pub struct ViewerControl {
    tx: mpsc::UnboundedSender<ViewerCommand>,
}

impl ViewerControl {
    /// Returns false if the loop is gone.
    pub fn start(&self, selector: Option<Selector>) -> bool {
        self.tx.send(ViewerCommand::Start(selector)).is_ok()
    }

    pub fn switch_camera(&self) -> bool {
        self.tx.send(ViewerCommand::SwitchCamera).is_ok()
    }

    pub fn stop_camera(&self) -> bool {
        self.tx.send(ViewerCommand::StopCamera).is_ok()
    }
}

/// Handle to the loop task.
pub struct LoopHandle {
    token: CancellationToken,
    join: JoinHandle<Viewer>,
}

impl LoopHandle {
    /// Wait for the loop to end on its own.
    pub async fn join(self) -> Option<Viewer> {
        self.join.await.ok()
    }

    /// Cancel and wait for teardown. An in-flight cycle is abandoned.
    pub async fn shutdown(self) -> Option<Viewer> {
        self.token.cancel();
        self.join().await
    }
}

/// Start the loop on the current `LocalSet`.
pub fn spawn(mut viewer: Viewer, refresh_hz: u32) -> (ViewerControl, LoopHandle) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let token = CancellationToken::new();
    let cancel = token.clone();
    let period = Duration::from_secs_f64(1.0 / refresh_hz.max(1) as f64);

    let join = tokio::task::spawn_local(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        log::info!("Detection loop started at {} Hz", refresh_hz);
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                cmd = rx.recv() => match cmd {
                    Some(cmd) => viewer.handle(cmd),
                    None => {
                        log::info!("All viewer controls dropped");
                        break;
                    }
                },
                _ = ticker.tick() => {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        _ = viewer.run_cycle() => (),
                    }
                }
            }
        }
        viewer.teardown();
        viewer
    });
    (ViewerControl { tx }, LoopHandle { token, join })
}

/// Build the viewer from the app config and start it. Must run inside a `LocalSet`.
pub fn launch(property: &ViewerProperty) -> (ViewerControl, LoopHandle, watch::Receiver<ViewerOutput>) {
    let conf = &property.conf;
    let camera = CameraSessionManager::from_conf(Box::new(V4l2Backend::new()), &conf.camera);

    let vision = conf.vision.clone();
    let model = ModelSlot::spawn_load(move || {
        let yolo = YoloV8::new(
            &vision.model,
            vision.input_size,
            vision.intra_threads,
            vision.iou_threshold,
        )?;
        Ok(Box::new(yolo) as Box<dyn Detector>)
    });

    let annotator = Annotator::new(
        Annotator::load_font(&conf.vision.label_font),
        conf.vision.label_size,
    );
    let announcer = Announcer::new(
        Box::new(SpeechQueue::from_conf(&conf.speech)),
        Duration::from_millis(conf.speech.cooldown_ms),
    );

    let (viewer, rx) = Viewer::new(
        camera,
        model,
        annotator,
        announcer,
        conf.vision.confidence_threshold,
    );
    let (control, handle) = spawn(viewer, conf.vision.refresh_hz);
    (control, handle, rx)
}
