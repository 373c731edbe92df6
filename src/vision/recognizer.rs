use crate::common::{Config, Result};
use crate::core::capabilities::{FaceDetector, IdentityMatch, IdentityMatcher};
use crate::storage::Gallery;
use crate::vision::onnx::OnnxModel;
use image::{imageops::FilterType, DynamicImage};
use ndarray::Array4;

pub type Embedding = Vec<f32>;

/// Single-channel face embedding model.
pub struct FaceEmbedder {
    model: OnnxModel,
    input_size: u32,
    normalization_value: f32,
}

impl FaceEmbedder {
    pub fn new(config: &Config) -> Result<Self> {
        let model = OnnxModel::load(
            "face_recognizer",
            &config.models.recognizer_path,
            config.performance.optimization_level,
        )?;
        Ok(Self {
            model,
            input_size: config.recognizer.input_size,
            normalization_value: config.recognizer.normalization_value,
        })
    }

    /// Embed an already cropped face.
    pub fn embed(&self, face: &DynamicImage) -> Result<Embedding> {
        let resized = face.resize_exact(self.input_size, self.input_size, FilterType::Triangle);
        let input = self.preprocess_face(&resized);
        let outputs = self.model.run(input)?;
        Ok(outputs.into_iter().next().map(|o| o.into_raw_vec()).unwrap_or_default())
    }

    /// Embed the largest detected face of a reference photo, or the whole
    /// photo when no face is found in it.
    pub fn embed_reference(&self, detector: &dyn FaceDetector, photo: &DynamicImage) -> Result<Option<Embedding>> {
        let faces = detector.detect(photo)?;
        let largest = faces.iter().max_by(|a, b| a.area().total_cmp(&b.area()));
        let embedding = match largest {
            Some(face) => self.embed(&face.crop(photo))?,
            None => self.embed(photo)?,
        };
        Ok(if embedding.is_empty() { None } else { Some(embedding) })
    }

    fn preprocess_face(&self, img: &DynamicImage) -> Array4<f32> {
        let gray = img.to_luma8();
        let size = self.input_size as usize;
        let mut array = Array4::<f32>::zeros((1, 1, size, size));
        let norm = self.normalization_value;

        for (x, y, pixel) in gray.enumerate_pixels() {
            array[[0, 0, y as usize, x as usize]] = (pixel[0] as f32 - norm) / norm;
        }
        array
    }
}

/// Matches faces against the enrolled gallery by cosine similarity.
pub struct GalleryMatcher {
    embedder: FaceEmbedder,
    gallery: Gallery,
    threshold: f32,
}

impl GalleryMatcher {
    pub fn new(embedder: FaceEmbedder, gallery: Gallery, threshold: f32) -> Self {
        Self { embedder, gallery, threshold }
    }

    pub fn gallery(&self) -> &Gallery {
        &self.gallery
    }
}

impl IdentityMatcher for GalleryMatcher {
    fn match_face(&self, face: &DynamicImage) -> Result<Option<IdentityMatch>> {
        if self.gallery.is_empty() {
            return Ok(None);
        }
        let embedding = self.embedder.embed(face)?;
        let best = self.gallery.best_match(&embedding, self.threshold);
        if let Some(hit) = &best {
            tracing::debug!("Matched {} (similarity {:.3})", hit.label, hit.similarity);
        }
        Ok(best)
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_similarity_basics() {
        assert!((cosine_similarity(&[1.0, 2.0], &[2.0, 4.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn zero_vector_has_no_similarity() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }
}
