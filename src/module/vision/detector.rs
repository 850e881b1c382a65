//! Provide Object Detection
//!
//! `Detector` is the seam to the pretrained model. `ModelSlot` tracks the asynchronous
//! model load and lends the detector to a blocking worker for each inference.
pub mod onnx {
    use crate::module::error::ViewerError;
    use crate::module::vision::Frame;
    use crate::module::define;
    use image::{imageops::FilterType, ImageBuffer, Pixel, Rgb};
    use ndarray::{s, Array, Axis, IxDyn};
    use ort::session::{builder::GraphOptimizationLevel, Session};
    use ort::value::Tensor;
    use std::path::Path;

    use super::{BBox, Detection, Detector};

    /// YoloV8 COCO session.
    ///
    pub struct YoloV8 {
        session: Session,
        input_name: String,
        output_name: String,
        imgsz: u32,
        iou_threshold: f32,
    }

    /// Methods for yolov8.
    ///
    impl YoloV8 {
        /// yolov8's constructor.
        ///
        pub fn new(
            model_path: &str,
            imgsz: u32,
            intra_threads: i16,
            iou_threshold: f32,
        ) -> Result<Self, ViewerError> {
            if !Path::new(model_path).is_file() {
                return Err(ViewerError::ModelLoad(format!("{model_path} not found")));
            }
            let session = Self::get_session(model_path, intra_threads)
                .map_err(|e| ViewerError::ModelLoad(e.to_string()))?;
            let input_name = session
                .inputs
                .first()
                .map(|i| i.name.clone())
                .ok_or_else(|| ViewerError::ModelLoad(format!("{model_path} has no input")))?;
            let output_name = session
                .outputs
                .first()
                .map(|o| o.name.clone())
                .ok_or_else(|| ViewerError::ModelLoad(format!("{model_path} has no output")))?;
            log::info!("Model {} loaded", model_path);
            Ok(Self {
                session,
                input_name,
                output_name,
                imgsz,
                iou_threshold,
            })
        }
        /// get session
        ///
        pub fn get_session(model_path: &str, intra_threads: i16) -> Result<Session, ort::Error> {
            let session = Session::builder()?
                .with_optimization_level(GraphOptimizationLevel::Level1)?
                .with_intra_threads(intra_threads.max(1) as usize)?
                .commit_from_file(model_path)?;
            Ok(session)
        }
        /// Infer
        ///
        pub fn infer(&mut self, frame: &Frame) -> Result<Vec<Detection>, ViewerError> {
            let sz = self.imgsz;
            let (fw, fh) = frame.size();
            // Resize to model's shape
            let img: ImageBuffer<Rgb<u8>, Vec<u8>> =
                image::imageops::resize(&frame.image, sz, sz, FilterType::Nearest);

            let input = Array::from_shape_fn((1, 3, sz as usize, sz as usize), |(_, c, j, i)| {
                let pixel = img.get_pixel(i as u32, j as u32);
                let channels = pixel.channels();
                // normalize
                // range [0, 255] -> range [0, 1]
                (channels[c] as f32) / 255.0
            });
            let shape = [1usize, 3, sz as usize, sz as usize];
            let tensor = Tensor::from_array((shape, input.into_raw_vec()))?;

            let outs = self
                .session
                .run(ort::inputs![self.input_name.as_str() => tensor])?;
            let (dims, data) = outs[self.output_name.as_str()].try_extract_tensor::<f32>()?;
            let dims: Vec<usize> = dims.iter().map(|&d| d as usize).collect();
            let out = Array::from_shape_vec(IxDyn(&dims), data.to_vec())
                .map_err(|e| ViewerError::Inference(e.to_string()))?
                .t()
                .into_owned();
            let scale = (fw as f32 / sz as f32, fh as f32 / sz as f32);
            Ok(convert_yolo_fmt(out, scale, self.iou_threshold))
        }
    }

    impl Detector for YoloV8 {
        fn name(&self) -> &'static str {
            "yolov8-coco"
        }

        fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, ViewerError> {
            self.infer(frame)
        }
    }

    /// Decode transposed YOLOv8 output rows into detections in frame coordinates.
    ///
    /// Each row holds `cx, cy, w, h` followed by one score per class.
    pub(super) fn convert_yolo_fmt(
        out: Array<f32, IxDyn>,
        scale: (f32, f32),
        iou_threshold: f32,
    ) -> Vec<Detection> {
        let (sx, sy) = scale;
        let mut bboxes = vec![];
        let output = out.slice(s![.., .., 0]);
        for row in output.axis_iter(Axis(0)) {
            let row: Vec<_> = row.iter().copied().collect();
            let best = row
                .iter()
                .skip(4)
                .enumerate()
                .map(|(index, value)| (index, *value))
                .reduce(|accum, row| if row.1 > accum.1 { row } else { accum });
            let (class_id, prob) = match best {
                Some(best) => best,
                None => continue,
            };
            if prob < define::vision::CANDIDATE_FLOOR {
                continue;
            }
            let (xc, yc, w, h) = (row[0], row[1], row[2], row[3]);
            // Clip to the frame's top-left corner, keeping the far edges in place.
            let (x1, x2) = (((xc - w / 2.0) * sx).max(0.0), (xc + w / 2.0) * sx);
            let (y1, y2) = (((yc - h / 2.0) * sy).max(0.0), (yc + h / 2.0) * sy);
            bboxes.push(Detection {
                class_name: super::class_name(class_id),
                score: prob,
                bbox: BBox {
                    x: x1,
                    y: y1,
                    width: x2 - x1,
                    height: y2 - y1,
                },
            })
        }
        bboxes.sort_by(|box1, box2| box2.score.total_cmp(&box1.score));
        merge_bboxes(bboxes, iou_threshold)
    }

    /// Function to compute the IoU of two rectangles.
    ///
    pub(super) fn iou(r1: &BBox, r2: &BBox) -> f32 {
        let x1 = r1.x.max(r2.x);
        let y1 = r1.y.max(r2.y);
        let x2 = r1.right().min(r2.right());
        let y2 = r1.bottom().min(r2.bottom());
        let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
        let union = r1.area() + r2.area() - intersection;
        if union <= 0.0 {
            0.0
        } else {
            intersection / union
        }
    }

    /// Merges same-class bounding boxes whose IoU is greater than or equal to the threshold.
    ///
    /// Input must be sorted by descending score; a merged box keeps the highest score.
    fn merge_bboxes(bboxes: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
        let mut merged_bboxes = Vec::new();
        let mut used = vec![false; bboxes.len()];
        for i in 0..bboxes.len() {
            if used[i] {
                continue;
            }
            let mut merged_bbox = bboxes[i].clone();
            used[i] = true;
            for j in 0..bboxes.len() {
                if used[j] || bboxes[i].class_name != bboxes[j].class_name {
                    continue;
                }
                if iou(&bboxes[i].bbox, &bboxes[j].bbox) >= iou_threshold {
                    let x1 = merged_bbox.bbox.x.min(bboxes[j].bbox.x);
                    let y1 = merged_bbox.bbox.y.min(bboxes[j].bbox.y);
                    let x2 = merged_bbox.bbox.right().max(bboxes[j].bbox.right());
                    let y2 = merged_bbox.bbox.bottom().max(bboxes[j].bbox.bottom());
                    merged_bbox.bbox = BBox {
                        x: x1,
                        y: y1,
                        width: x2 - x1,
                        height: y2 - y1,
                    };
                    used[j] = true;
                }
            }
            merged_bboxes.push(merged_bbox);
        }
        merged_bboxes
    }
}

use tokio::sync::oneshot;

use super::Frame;
use crate::module::define;
use crate::module::error::ViewerError;
use std::sync::Arc;

/// Axis-aligned box in frame pixel coordinates.
///
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
    pub fn right(&self) -> f32 {
        self.x + self.width
    }
    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }
    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }
}

/// Detection result
///
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub class_name: String,
    pub score: f32,
    pub bbox: BBox,
}

impl Detection {
    pub fn new(class_name: &str, score: f32, bbox: BBox) -> Self {
        Self {
            class_name: class_name.to_string(),
            score,
            bbox,
        }
    }
}

/// COCO class name of a model class id.
pub fn class_name(class_id: usize) -> String {
    define::COCO_CLASSES
        .get(class_id)
        .map(|s| s.to_string())
        .unwrap_or_else(|| format!("class {class_id}"))
}

/// Detections of one frame that passed the confidence threshold, in detector order.
///
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectionBatch {
    detections: Vec<Detection>,
}

impl DetectionBatch {
    /// Keep detections scoring at least `threshold`.
    pub fn filter(detections: Vec<Detection>, threshold: f32) -> Self {
        Self {
            detections: detections
                .into_iter()
                .filter(|det| det.score >= threshold)
                .collect(),
        }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Detection> {
        self.detections.iter()
    }

    pub fn len(&self) -> usize {
        self.detections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }

    /// Distinct class names in first-seen order.
    pub fn class_names(&self) -> Vec<String> {
        let mut names: Vec<String> = vec![];
        for det in &self.detections {
            if !names.contains(&det.class_name) {
                names.push(det.class_name.clone());
            }
        }
        names
    }
}

/// An opaque pretrained detector.
///
pub trait Detector: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a ready frame.
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, ViewerError>;
}

type LoadResult = Result<Box<dyn Detector>, ViewerError>;

/// Observable model state.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ModelStatus {
    #[default]
    Loading,
    Ready,
    Failed(String),
}

enum SlotState {
    Loading(oneshot::Receiver<LoadResult>),
    Ready(Box<dyn Detector>),
    Busy, // lent to an inference worker
    Failed(String),
}

/// Holds the detector through its asynchronous load.
///
pub struct ModelSlot {
    state: SlotState,
}

impl ModelSlot {
    /// Slot with an already loaded detector.
    pub fn ready(detector: Box<dyn Detector>) -> Self {
        Self {
            state: SlotState::Ready(detector),
        }
    }

    /// Start loading on a blocking worker. Must be called inside a tokio runtime.
    pub fn spawn_load<F>(loader: F) -> Self
    where
        F: FnOnce() -> LoadResult + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        tokio::task::spawn_blocking(move || {
            let _ = tx.send(loader());
        });
        Self {
            state: SlotState::Loading(rx),
        }
    }

    /// Pick up a finished load and report the current status.
    pub fn poll(&mut self) -> ModelStatus {
        if let SlotState::Loading(rx) = &mut self.state {
            match rx.try_recv() {
                Ok(Ok(detector)) => {
                    log::info!("Detector {} ready", detector.name());
                    self.state = SlotState::Ready(detector);
                }
                Ok(Err(e)) => {
                    log::error!("{}", e);
                    self.state = SlotState::Failed(e.to_string());
                }
                Err(oneshot::error::TryRecvError::Empty) => (),
                Err(oneshot::error::TryRecvError::Closed) => {
                    let msg = "model loader exited without a result".to_string();
                    log::error!("{}", msg);
                    self.state = SlotState::Failed(msg);
                }
            }
        }
        self.status()
    }

    pub fn status(&self) -> ModelStatus {
        match &self.state {
            SlotState::Loading(_) => ModelStatus::Loading,
            SlotState::Ready(_) | SlotState::Busy => ModelStatus::Ready,
            SlotState::Failed(msg) => ModelStatus::Failed(msg.clone()),
        }
    }

    /// Run the detector on a blocking worker and wait for it.
    ///
    /// Returns `Ok(None)` when no detector is available yet.
    pub async fn detect(&mut self, frame: Arc<Frame>) -> Result<Option<Vec<Detection>>, ViewerError> {
        let mut detector = match std::mem::replace(&mut self.state, SlotState::Busy) {
            SlotState::Ready(detector) => detector,
            other => {
                self.state = other;
                return Ok(None);
            }
        };
        let worker = tokio::task::spawn_blocking(move || {
            let res = detector.detect(&frame);
            (detector, res)
        });
        match worker.await {
            Ok((detector, res)) => {
                self.state = SlotState::Ready(detector);
                res.map(Some)
            }
            Err(e) => {
                let msg = format!("inference worker died: {e}");
                self.state = SlotState::Failed(msg.clone());
                Err(ViewerError::Inference(msg))
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::fake::FixedDetector;
    use super::*;
    use image::RgbImage;
    use ndarray::{Array, Array3};

    fn det(class_name: &str, score: f32) -> Detection {
        Detection::new(class_name, score, BBox::new(0.0, 0.0, 10.0, 10.0))
    }

    #[test]
    fn confidence_filter_test() {
        let batch = DetectionBatch::filter(
            vec![det("cat", 0.49), det("dog", 0.5), det("person", 0.92)],
            define::vision::CONFIDENCE_THRESHOLD,
        );
        let names: Vec<&str> = batch.iter().map(|d| d.class_name.as_str()).collect();
        assert_eq!(names, vec!["dog", "person"]);
    }

    #[test]
    fn class_names_test() {
        let batch = DetectionBatch::filter(
            vec![det("person", 0.9), det("dog", 0.8), det("person", 0.7)],
            0.5,
        );
        assert_eq!(batch.len(), 3);
        assert_eq!(batch.class_names(), vec!["person", "dog"]);
        assert!(DetectionBatch::default().is_empty());
    }

    #[test]
    fn class_name_lookup_test() {
        assert_eq!(class_name(0), "person");
        assert_eq!(class_name(16), "dog");
        assert_eq!(class_name(99), "class 99");
    }

    #[test]
    fn iou_test() {
        let a = BBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BBox::new(5.0, 0.0, 10.0, 10.0);
        let c = BBox::new(20.0, 20.0, 5.0, 5.0);
        assert!((onnx::iou(&a, &a) - 1.0).abs() < 1e-6);
        assert!((onnx::iou(&a, &b) - 50.0 / 150.0).abs() < 1e-6);
        assert_eq!(onnx::iou(&a, &c), 0.0);
    }

    fn row(out: &mut Array3<f32>, i: usize, bbox: [f32; 4], class_id: usize, score: f32) {
        for (k, v) in bbox.iter().enumerate() {
            out[[i, k, 0]] = *v;
        }
        out[[i, 4 + class_id, 0]] = score;
    }

    #[test]
    fn convert_yolo_fmt_test() {
        let mut out = Array::<f32, _>::zeros((4, 84, 1));
        row(&mut out, 0, [100.0, 100.0, 50.0, 50.0], 0, 0.9); // person
        row(&mut out, 1, [102.0, 101.0, 50.0, 50.0], 0, 0.8); // same person
        row(&mut out, 2, [300.0, 300.0, 40.0, 20.0], 16, 0.3); // dog
        row(&mut out, 3, [200.0, 200.0, 40.0, 20.0], 2, 0.1); // below floor

        let dets = onnx::convert_yolo_fmt(out.into_dyn(), (1.0, 1.0), 0.7);
        assert_eq!(dets.len(), 2);
        assert_eq!(dets[0].class_name, "person");
        assert_eq!(dets[0].score, 0.9);
        assert_eq!(dets[0].bbox, BBox::new(75.0, 75.0, 52.0, 51.0));
        assert_eq!(dets[1].class_name, "dog");
        assert_eq!(dets[1].bbox, BBox::new(280.0, 290.0, 40.0, 20.0));
    }

    #[test]
    fn convert_yolo_fmt_scale_test() {
        let mut out = Array::<f32, _>::zeros((1, 84, 1));
        row(&mut out, 0, [320.0, 320.0, 64.0, 64.0], 0, 0.8);
        // 640x640 model input, 1280x960 frame
        let dets = onnx::convert_yolo_fmt(out.into_dyn(), (2.0, 1.5), 0.7);
        assert_eq!(dets[0].bbox, BBox::new(576.0, 432.0, 128.0, 96.0));
    }

    #[test]
    fn convert_yolo_fmt_clip_test() {
        let mut out = Array::<f32, _>::zeros((2, 84, 1));
        row(&mut out, 0, [10.0, 100.0, 40.0, 40.0], 0, 0.9); // crosses the left edge
        row(&mut out, 1, [300.0, 5.0, 20.0, 20.0], 41, 0.8); // crosses the top edge
        let dets = onnx::convert_yolo_fmt(out.into_dyn(), (1.0, 1.0), 0.7);
        assert_eq!(dets[0].bbox, BBox::new(0.0, 80.0, 30.0, 40.0));
        assert_eq!(dets[0].bbox.right(), 30.0);
        assert_eq!(dets[1].class_name, "cup");
        assert_eq!(dets[1].bbox, BBox::new(290.0, 0.0, 20.0, 15.0));
        assert_eq!(dets[1].bbox.bottom(), 15.0);
    }

    #[test]
    fn missing_model_test() {
        let res = onnx::YoloV8::new("asset/model/missing.onnx", 640, 1, 0.7);
        assert!(matches!(res, Err(ViewerError::ModelLoad(_))));
    }

    #[tokio::test]
    async fn model_slot_test() {
        let mut slot = ModelSlot::spawn_load(|| {
            Ok(Box::new(FixedDetector::new(vec![det("person", 0.9)])) as Box<dyn Detector>)
        });
        let frame = Arc::new(Frame::new(RgbImage::new(8, 8)));
        for _ in 0..200 {
            if slot.poll() == ModelStatus::Ready {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(slot.status(), ModelStatus::Ready);
        let dets = slot.detect(frame.clone()).await.unwrap().unwrap();
        assert_eq!(dets, vec![det("person", 0.9)]);
        // The detector is handed back after each call.
        assert!(slot.detect(frame).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn model_slot_failure_test() {
        let mut slot = ModelSlot::spawn_load(|| Err(ViewerError::ModelLoad("no file".into())));
        for _ in 0..200 {
            if slot.poll() != ModelStatus::Loading {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(
            slot.status(),
            ModelStatus::Failed("Model failed to load: no file".into())
        );
        let frame = Arc::new(Frame::new(RgbImage::new(8, 8)));
        assert!(slot.detect(frame).await.unwrap().is_none());
    }
}
