//! Narrow interfaces to the collaborators the kiosk depends on.
//!
//! Every sensor and actuator is consumed through one of these traits so the
//! orchestration core can run against ONNX models and Linux devices in
//! production and against scripted doubles in tests.

use crate::common::Result;
use image::DynamicImage;

#[derive(Debug, Clone, PartialEq)]
pub struct FaceBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
}

impl FaceBox {
    pub fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }

    /// Crop this box out of `image`, clamped to the image bounds.
    pub fn crop(&self, image: &DynamicImage) -> DynamicImage {
        let x = self.x1.max(0.0) as u32;
        let y = self.y1.max(0.0) as u32;
        let width = (self.x2 - self.x1).max(1.0) as u32;
        let height = (self.y2 - self.y1).max(1.0) as u32;
        image.crop_imm(x, y, width, height)
    }
}

/// Best candidate reported by an [`IdentityMatcher`].
#[derive(Debug, Clone, PartialEq)]
pub struct IdentityMatch {
    pub label: String,
    pub similarity: f32,
}

impl IdentityMatch {
    pub fn new(label: impl Into<String>, similarity: f32) -> Self {
        Self { label: label.into(), similarity }
    }
}

/// Normalized landmark coordinate; `x` and `y` are fractions of the frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Landmark {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y, z: 0.0 }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// One tracked hand, 21 landmarks in the usual hand-skeleton order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct HandLandmarks {
    pub points: Vec<Landmark>,
}

impl HandLandmarks {
    pub const WRIST: usize = 0;
    pub const THUMB_TIP: usize = 4;
    pub const INDEX_TIP: usize = 8;
    pub const COUNT: usize = 21;

    pub fn new(points: Vec<Landmark>) -> Self {
        Self { points }
    }

    pub fn get(&self, index: usize) -> Option<Landmark> {
        self.points.get(index).copied()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractedText {
    Text(String),
    NoText,
}

pub trait FaceDetector {
    fn detect(&self, frame: &DynamicImage) -> Result<Vec<FaceBox>>;
}

pub trait IdentityMatcher {
    /// Return the top-ranked candidate for `face`, or `None` when nothing matches.
    fn match_face(&self, face: &DynamicImage) -> Result<Option<IdentityMatch>>;
}

pub trait EmotionClassifier {
    /// Dominant emotion label for `face`.
    fn classify(&self, face: &DynamicImage) -> Result<String>;
}

pub trait TextExtractor {
    fn extract(&self, image: &DynamicImage) -> Result<ExtractedText>;
}

pub trait HandTracker {
    fn track(&self, frame: &DynamicImage) -> Result<Vec<HandLandmarks>>;
}

/// A system level expressed in percent, such as output volume or backlight.
pub trait LevelControl {
    fn name(&self) -> &str;

    fn set(&self, percent: u8) -> Result<()>;
}

/// Best-effort, non-blocking speech or log output.
pub trait Announcer {
    fn say(&self, text: &str);
}

/// Hand tracker used when no landmark model is installed.
pub struct NoHands;

impl HandTracker for NoHands {
    fn track(&self, _frame: &DynamicImage) -> Result<Vec<HandLandmarks>> {
        Ok(Vec::new())
    }
}

/// Control that accepts every level and does nothing with it.
pub struct DisabledControl(pub &'static str);

impl LevelControl for DisabledControl {
    fn name(&self) -> &str {
        self.0
    }

    fn set(&self, _percent: u8) -> Result<()> {
        Ok(())
    }
}
