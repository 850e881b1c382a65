//! Module for Constants and Paths Definitions
//!
//! This module defines various constants and paths used throughout the application.

/// System Constants
pub mod system {
    /// Name of the system
    pub const NAME: &str = "talkcam";
}

/// File Paths
pub mod path {

    // Persistent Data Directory
    pub const PERSISTENT_DIR: &str = "/data/";

    // Ephemeral Data Directory
    pub const EPHEMERAL_DIR: &str = "/run/user/1000/";

    // Image Directory
    pub const IMG_DIR: &str = "img";

    // Log Directory
    pub const LOG_DIR: &str = "log";

    // Configuration File
    pub const CONF_FILE: &str = "conf.toml";

    // Last Annotated Frame
    pub const LAST_IMAGE: &str = "vision.jpg";

    // YOLOv8 COCO Model (640x640)
    pub const COCO_640_MODEL: &str = "asset/model/yolov8n_coco_640_640.onnx";

    // Label Font
    pub const LABEL_FONT: &str = "asset/font/DejaVuSans.ttf";

    // V4L2 device nodes
    pub const DEV_DIR: &str = "/dev";

    // V4L2 sysfs class directory, holds device names
    pub const V4L2_SYSFS_DIR: &str = "/sys/class/video4linux";
}

/// Detection Constants
pub mod vision {
    /// Minimum score for a detection to be rendered or announced (inclusive).
    pub const CONFIDENCE_THRESHOLD: f32 = 0.5;

    /// Raw candidates below this score are dropped inside the detector.
    pub const CANDIDATE_FLOOR: f32 = 0.25;

    /// Same-class boxes overlapping at least this much are merged.
    pub const MERGE_IOU: f32 = 0.7;

    /// Surface size used before the first frame arrives.
    pub const DEFAULT_SURFACE: (u32, u32) = (640, 480);

    /// Labels of boxes whose top edge is within this margin go inside the box.
    pub const LABEL_TOP_MARGIN: f32 = 10.0;

    /// Box stroke width in pixels.
    pub const STROKE_WIDTH: u32 = 2;

    /// Default refresh rate of the detection loop.
    pub const REFRESH_HZ: u32 = 30;
}

/// Speech Constants
pub mod speech {
    /// How long a spoken phrase stays on cooldown.
    pub const COOLDOWN_MS: u64 = 5000;

    /// Phrase announced for each newly seen class.
    pub fn phrase(class_name: &str) -> String {
        format!("There is a {class_name}")
    }
}

/// Class names of the COCO dataset, in model output order.
pub const COCO_CLASSES: [&str; 80] = [
    "person",
    "bicycle",
    "car",
    "motorcycle",
    "airplane",
    "bus",
    "train",
    "truck",
    "boat",
    "traffic light",
    "fire hydrant",
    "stop sign",
    "parking meter",
    "bench",
    "bird",
    "cat",
    "dog",
    "horse",
    "sheep",
    "cow",
    "elephant",
    "bear",
    "zebra",
    "giraffe",
    "backpack",
    "umbrella",
    "handbag",
    "tie",
    "suitcase",
    "frisbee",
    "skis",
    "snowboard",
    "sports ball",
    "kite",
    "baseball bat",
    "baseball glove",
    "skateboard",
    "surfboard",
    "tennis racket",
    "bottle",
    "wine glass",
    "cup",
    "fork",
    "knife",
    "spoon",
    "bowl",
    "banana",
    "apple",
    "sandwich",
    "orange",
    "broccoli",
    "carrot",
    "hot dog",
    "pizza",
    "donut",
    "cake",
    "chair",
    "couch",
    "potted plant",
    "bed",
    "dining table",
    "toilet",
    "tv",
    "laptop",
    "mouse",
    "remote",
    "keyboard",
    "cell phone",
    "microwave",
    "oven",
    "toaster",
    "sink",
    "refrigerator",
    "book",
    "clock",
    "vase",
    "scissors",
    "teddy bear",
    "hair drier",
    "toothbrush",
];
