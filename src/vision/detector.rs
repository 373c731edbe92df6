use crate::common::{Config, Result};
use crate::core::capabilities::{FaceBox, FaceDetector};
use crate::vision::onnx::OnnxModel;
use image::{imageops::FilterType, DynamicImage};
use ndarray::{Array4, ArrayD};

const MAX_FACES: usize = 5;
const MIN_BOX_SIDE: f32 = 10.0;

/// YOLO-style face detector.
pub struct YoloFaceDetector {
    model: OnnxModel,
    input_width: u32,
    input_height: u32,
    confidence: f32,
    nms_threshold: f32,
}

impl YoloFaceDetector {
    pub fn new(config: &Config) -> Result<Self> {
        let model = OnnxModel::load(
            "face_detector",
            &config.models.detector_path,
            config.performance.optimization_level,
        )?;
        Ok(Self {
            model,
            input_width: config.detector.input_width,
            input_height: config.detector.input_height,
            confidence: config.detector.confidence,
            nms_threshold: config.detector.nms_threshold,
        })
    }

    fn image_to_array(&self, img: &DynamicImage) -> Array4<f32> {
        let gray = img.to_luma8();
        let width = gray.width() as usize;
        let height = gray.height() as usize;
        let mut array = Array4::<f32>::zeros((1, 3, height, width));
        let norm_factor = 1.0 / 255.0;

        for (x, y, pixel) in gray.enumerate_pixels() {
            let value = pixel[0] as f32 * norm_factor;
            for c in 0..3 {
                array[[0, c, y as usize, x as usize]] = value;
            }
        }
        array
    }
}

impl FaceDetector for YoloFaceDetector {
    fn detect(&self, image: &DynamicImage) -> Result<Vec<FaceBox>> {
        let orig_width = image.width() as f32;
        let orig_height = image.height() as f32;

        let input = if image.width() == self.input_width && image.height() == self.input_height {
            self.image_to_array(image)
        } else {
            let resized = image.resize_exact(self.input_width, self.input_height, FilterType::Nearest);
            self.image_to_array(&resized)
        };

        let outputs = self.model.run(input)?;
        let Some(output) = outputs.first() else {
            return Ok(Vec::new());
        };

        let mut faces = parse_predictions(output, self.input_width as f32, self.input_height as f32);
        faces.retain(|face| face.confidence >= self.confidence);
        let mut faces = apply_nms(faces, self.nms_threshold);
        faces.truncate(MAX_FACES);

        let scale_x = orig_width / self.input_width as f32;
        let scale_y = orig_height / self.input_height as f32;
        for face in &mut faces {
            face.x1 *= scale_x;
            face.x2 *= scale_x;
            face.y1 *= scale_y;
            face.y2 *= scale_y;
        }

        Ok(faces)
    }
}

/// Decode `[1, N, 5+]`, `[1, 5+, N]` or `[N, 5+]` rows of
/// `(cx, cy, w, h, score, ...)` into corner boxes in input pixel space.
pub(crate) fn parse_predictions(output: &ArrayD<f32>, input_width: f32, input_height: f32) -> Vec<FaceBox> {
    let shape = output.shape();
    let (num_predictions, row_len, transposed) = match shape.len() {
        3 if shape[1] < shape[2] => (shape[2], shape[1], true),
        3 => (shape[1], shape[2], false),
        2 => (shape[0], shape[1], false),
        _ => {
            tracing::warn!("Unexpected detector output shape: {:?}", shape);
            return Vec::new();
        }
    };
    if row_len < 5 {
        tracing::warn!("Detector output rows too short: {:?}", shape);
        return Vec::new();
    }

    let data: Vec<f32> = output.iter().copied().collect();
    let at = |i: usize, k: usize| {
        if transposed { data[k * num_predictions + i] } else { data[i * row_len + k] }
    };

    let mut faces = Vec::new();
    for i in 0..num_predictions {
        let confidence = at(i, 4);
        if confidence <= 0.001 {
            continue;
        }

        let (mut cx, mut cy, mut w, mut h) = (at(i, 0), at(i, 1), at(i, 2), at(i, 3));
        // Normalized coordinates are scaled up to the input size.
        if cx <= 1.0 && cy <= 1.0 && w <= 1.0 && h <= 1.0 {
            cx *= input_width;
            w *= input_width;
            cy *= input_height;
            h *= input_height;
        }

        let x1 = (cx - w / 2.0).max(0.0);
        let y1 = (cy - h / 2.0).max(0.0);
        let x2 = (cx + w / 2.0).min(input_width);
        let y2 = (cy + h / 2.0).min(input_height);

        if x2 - x1 > MIN_BOX_SIDE && y2 - y1 > MIN_BOX_SIDE {
            faces.push(FaceBox { x1, y1, x2, y2, confidence });
        }
    }
    faces
}

pub(crate) fn apply_nms(mut boxes: Vec<FaceBox>, iou_threshold: f32) -> Vec<FaceBox> {
    boxes.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<FaceBox> = Vec::new();
    for candidate in boxes {
        if keep.iter().all(|kept| iou(kept, &candidate) < iou_threshold) {
            keep.push(candidate);
        }
    }
    keep
}

fn iou(a: &FaceBox, b: &FaceBox) -> f32 {
    let x1 = a.x1.max(b.x1);
    let y1 = a.y1.max(b.y1);
    let x2 = a.x2.min(b.x2);
    let y2 = a.y2.min(b.y2);

    let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union = a.area() + b.area() - intersection;
    if union > 0.0 { intersection / union } else { 0.0 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::IxDyn;

    #[test]
    fn parses_standard_and_transposed_layouts() {
        let mut rows = vec![
            100.0, 100.0, 40.0, 60.0, 0.9,
            0.5, 0.5, 0.25, 0.25, 0.8,
            10.0, 10.0, 4.0, 4.0, 0.95,
        ];
        rows.extend_from_slice(&[0.0; 25]);
        let standard = ArrayD::from_shape_vec(IxDyn(&[1, 8, 5]), rows.clone()).unwrap();
        let faces = parse_predictions(&standard, 640.0, 640.0);
        assert_eq!(faces.len(), 2);
        assert_eq!(faces[0], FaceBox { x1: 80.0, y1: 70.0, x2: 120.0, y2: 130.0, confidence: 0.9 });
        assert_eq!(faces[1].x1, 240.0);

        let mut columns = vec![0.0; 40];
        for i in 0..8 {
            for k in 0..5 {
                columns[k * 8 + i] = rows[i * 5 + k];
            }
        }
        let transposed = ArrayD::from_shape_vec(IxDyn(&[1, 5, 8]), columns).unwrap();
        assert_eq!(parse_predictions(&transposed, 640.0, 640.0), faces);
    }

    #[test]
    fn nms_keeps_strongest_of_overlapping_boxes() {
        let a = FaceBox { x1: 0.0, y1: 0.0, x2: 100.0, y2: 100.0, confidence: 0.7 };
        let b = FaceBox { x1: 5.0, y1: 5.0, x2: 105.0, y2: 105.0, confidence: 0.9 };
        let c = FaceBox { x1: 300.0, y1: 300.0, x2: 350.0, y2: 350.0, confidence: 0.6 };
        let kept = apply_nms(vec![a, b.clone(), c.clone()], 0.45);
        assert_eq!(kept, vec![b, c]);
    }
}
