use crate::common::{Config, Result};
use crate::core::capabilities::{HandLandmarks, HandTracker, Landmark};
use crate::vision::onnx::OnnxModel;
use image::{imageops::FilterType, DynamicImage};
use ndarray::Array4;

/// Hand landmark model run on the whole frame; reports at most one hand.
///
/// Outputs are `[1, 63]` landmark coordinates `(x, y, z)` in input pixels
/// followed by a `[1, 1]` hand presence score.
pub struct OnnxHandTracker {
    model: OnnxModel,
    input_size: u32,
    presence_threshold: f32,
}

impl OnnxHandTracker {
    pub fn new(config: &Config) -> Result<Self> {
        let model = OnnxModel::load(
            "hand_landmark",
            &config.models.hand_path,
            config.performance.optimization_level,
        )?;
        Ok(Self {
            model,
            input_size: config.gesture.hand_input_size,
            presence_threshold: config.gesture.presence_threshold,
        })
    }

    fn image_to_array(&self, frame: &DynamicImage) -> Array4<f32> {
        let rgb = frame
            .resize_exact(self.input_size, self.input_size, FilterType::Triangle)
            .to_rgb8();
        let size = self.input_size as usize;
        let mut array = Array4::<f32>::zeros((1, 3, size, size));
        for (x, y, pixel) in rgb.enumerate_pixels() {
            for c in 0..3 {
                array[[0, c, y as usize, x as usize]] = pixel[c] as f32 / 255.0;
            }
        }
        array
    }
}

impl HandTracker for OnnxHandTracker {
    fn track(&self, frame: &DynamicImage) -> Result<Vec<HandLandmarks>> {
        let outputs = self.model.run(self.image_to_array(frame))?;
        let (Some(coords), Some(presence)) = (outputs.first(), outputs.get(1)) else {
            tracing::warn!("Hand model returned {} outputs, expected 2", outputs.len());
            return Ok(Vec::new());
        };

        let coords: Vec<f32> = coords.iter().copied().collect();
        let presence = presence.iter().next().copied().unwrap_or(0.0);
        Ok(decode_hand(&coords, presence, self.presence_threshold, self.input_size as f32)
            .into_iter()
            .collect())
    }
}

/// Convert raw model output to normalized landmarks, or `None` when no hand is present.
pub(crate) fn decode_hand(coords: &[f32], presence: f32, threshold: f32, input_size: f32) -> Option<HandLandmarks> {
    // Some exports emit a logit instead of a probability.
    let presence = if (0.0..=1.0).contains(&presence) {
        presence
    } else {
        1.0 / (1.0 + (-presence).exp())
    };
    if presence < threshold || coords.len() < HandLandmarks::COUNT * 3 {
        return None;
    }

    let points = coords
        .chunks_exact(3)
        .take(HandLandmarks::COUNT)
        .map(|p| Landmark { x: p[0] / input_size, y: p[1] / input_size, z: p[2] / input_size })
        .collect();
    Some(HandLandmarks::new(points))
}
