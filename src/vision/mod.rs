//! Production adapters for the vision capabilities: ONNX models and the tesseract CLI.

pub mod detector;
pub mod emotion;
pub mod hands;
pub mod ocr;
pub mod onnx;
pub mod recognizer;

pub use detector::YoloFaceDetector;
pub use emotion::FerPlusClassifier;
pub use hands::OnnxHandTracker;
pub use ocr::TesseractExtractor;
pub use recognizer::{cosine_similarity, Embedding, FaceEmbedder, GalleryMatcher};
