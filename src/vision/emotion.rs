use crate::common::{Config, KioskError, Result};
use crate::core::capabilities::EmotionClassifier;
use crate::vision::onnx::OnnxModel;
use image::{imageops::FilterType, DynamicImage};
use ndarray::Array4;

const INPUT_SIZE: u32 = 64;

/// Output order of the FER+ emotion model.
pub const EMOTION_LABELS: [&str; 8] = [
    "neutral", "happy", "surprise", "sad", "angry", "disgust", "fear", "contempt",
];

pub struct FerPlusClassifier {
    model: OnnxModel,
}

impl FerPlusClassifier {
    pub fn new(config: &Config) -> Result<Self> {
        let model = OnnxModel::load(
            "emotion",
            &config.models.emotion_path,
            config.performance.optimization_level,
        )?;
        Ok(Self { model })
    }

    fn preprocess(face: &DynamicImage) -> Array4<f32> {
        let gray = face
            .resize_exact(INPUT_SIZE, INPUT_SIZE, FilterType::Triangle)
            .to_luma8();
        let size = INPUT_SIZE as usize;
        let mut array = Array4::<f32>::zeros((1, 1, size, size));
        // FER+ expects raw 0-255 intensities
        for (x, y, pixel) in gray.enumerate_pixels() {
            array[[0, 0, y as usize, x as usize]] = pixel[0] as f32;
        }
        array
    }
}

impl EmotionClassifier for FerPlusClassifier {
    fn classify(&self, face: &DynamicImage) -> Result<String> {
        let outputs = self.model.run(Self::preprocess(face))?;
        let scores: Vec<f32> = outputs
            .first()
            .map(|o| o.iter().copied().collect())
            .unwrap_or_default();

        dominant_emotion(&scores)
            .map(str::to_string)
            .ok_or_else(|| KioskError::Model(format!(
                "{} model returned {} scores", self.model.name(), scores.len()
            )))
    }
}

/// Label with the highest score. Logits and probabilities rank the same.
pub fn dominant_emotion(scores: &[f32]) -> Option<&'static str> {
    if scores.len() < EMOTION_LABELS.len() {
        return None;
    }
    scores
        .iter()
        .take(EMOTION_LABELS.len())
        .enumerate()
        .filter(|(_, s)| s.is_finite())
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, _)| EMOTION_LABELS[i])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_highest_score() {
        let scores = [0.1, 2.5, 0.3, -1.0, 0.0, 0.2, 0.4, 0.1];
        assert_eq!(dominant_emotion(&scores), Some("happy"));
        let scores = [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 9.0];
        assert_eq!(dominant_emotion(&scores), Some("contempt"));
    }

    #[test]
    fn short_or_invalid_output_is_rejected() {
        assert_eq!(dominant_emotion(&[1.0, 2.0]), None);
        assert_eq!(dominant_emotion(&[f32::NAN; 8]), None);
    }
}
