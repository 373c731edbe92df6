use crate::common::{KioskError, Result};
use crate::core::capabilities::IdentityMatch;
use crate::vision::recognizer::{cosine_similarity, Embedding};
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

const CACHE_VERSION: u32 = 1;
const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GalleryEntry {
    pub label: String,
    pub source: PathBuf,
    pub modified_secs: u64,
    pub embedding: Embedding,
}

#[derive(Serialize, Deserialize)]
struct GalleryCache {
    version: u32,
    entries: Vec<GalleryEntry>,
}

/// Reference embeddings for everyone allowed to authenticate.
///
/// The dataset directory holds either `<label>.<ext>` files or one
/// `<label>/` directory per person with any number of images inside.
#[derive(Debug, Default)]
pub struct Gallery {
    entries: Vec<GalleryEntry>,
}

impl Gallery {
    pub fn from_entries(mut entries: Vec<GalleryEntry>) -> Self {
        entries.sort_by(|a, b| a.label.cmp(&b.label).then_with(|| a.source.cmp(&b.source)));
        Self { entries }
    }

    pub fn entries(&self) -> &[GalleryEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn labels(&self) -> Vec<&str> {
        let mut labels: Vec<&str> = self.entries.iter().map(|e| e.label.as_str()).collect();
        labels.dedup();
        labels
    }

    /// Best entry above `threshold`. Ties keep the first entry in label order.
    pub fn best_match(&self, embedding: &[f32], threshold: f32) -> Option<IdentityMatch> {
        let mut best: Option<(&GalleryEntry, f32)> = None;
        for entry in &self.entries {
            let similarity = cosine_similarity(embedding, &entry.embedding);
            if best.map_or(true, |(_, s)| similarity > s) {
                best = Some((entry, similarity));
            }
        }

        best.filter(|(_, s)| *s > threshold)
            .map(|(entry, s)| IdentityMatch::new(entry.label.clone(), s))
    }

    /// Scan `dataset_dir`, embedding new or modified images and reusing cached ones.
    pub fn build<F>(dataset_dir: &Path, cache_path: &Path, mut embed: F) -> Result<Self>
    where
        F: FnMut(&DynamicImage) -> Result<Option<Embedding>>,
    {
        if !dataset_dir.is_dir() {
            return Err(KioskError::Storage(format!(
                "Dataset directory not found: {}", dataset_dir.display()
            )));
        }

        let cached = load_cache(cache_path);
        let mut entries = Vec::new();
        let mut computed = 0usize;

        for (label, source) in scan_dataset(dataset_dir)? {
            let modified_secs = fs::metadata(&source)?
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map_or(0, |d| d.as_secs());

            if let Some(hit) = cached.iter().find(|e| {
                e.source == source && e.modified_secs == modified_secs && e.label == label
            }) {
                entries.push(hit.clone());
                continue;
            }

            let image = match image::open(&source) {
                Ok(img) => img,
                Err(e) => {
                    tracing::warn!("Skipping unreadable reference image {}: {}", source.display(), e);
                    continue;
                }
            };
            match embed(&image) {
                Ok(Some(embedding)) => {
                    computed += 1;
                    entries.push(GalleryEntry { label, source, modified_secs, embedding });
                }
                Ok(None) => tracing::warn!("No face found in reference image {}", source.display()),
                Err(e) => tracing::warn!("Failed to embed {}: {}", source.display(), e),
            }
        }

        let gallery = Self::from_entries(entries);
        if computed > 0 || gallery.entries.len() != cached.len() {
            if let Err(e) = save_cache(cache_path, &gallery.entries) {
                tracing::warn!("Failed to save gallery cache: {}", e);
            }
        }

        if gallery.is_empty() {
            tracing::warn!("Gallery is empty; no one will be able to authenticate");
        } else {
            tracing::info!(
                "Gallery ready: {} images for {} people ({} newly embedded)",
                gallery.entries.len(), gallery.labels().len(), computed
            );
        }
        Ok(gallery)
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn file_label(path: &Path) -> Option<String> {
    path.file_stem().and_then(|s| s.to_str()).map(|s| s.to_string())
}

fn scan_dataset(dir: &Path) -> Result<Vec<(String, PathBuf)>> {
    let mut found = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            let Some(label) = file_label(&path) else { continue };
            for inner in fs::read_dir(&path)? {
                let inner = inner?.path();
                if inner.is_file() && is_image(&inner) {
                    found.push((label.clone(), inner));
                }
            }
        } else if is_image(&path) {
            if let Some(label) = file_label(&path) {
                found.push((label, path));
            }
        }
    }
    found.sort();
    Ok(found)
}

fn load_cache(path: &Path) -> Vec<GalleryEntry> {
    let Ok(data) = fs::read(path) else { return Vec::new() };
    match bincode::deserialize::<GalleryCache>(&data) {
        Ok(cache) if cache.version == CACHE_VERSION => cache.entries,
        Ok(cache) => {
            tracing::info!("Discarding gallery cache version {}", cache.version);
            Vec::new()
        }
        Err(e) => {
            tracing::warn!("Ignoring corrupt gallery cache {}: {}", path.display(), e);
            Vec::new()
        }
    }
}

fn save_cache(path: &Path, entries: &[GalleryEntry]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let cache = GalleryCache { version: CACHE_VERSION, entries: entries.to_vec() };
    let encoded = bincode::serialize(&cache)
        .map_err(|e| KioskError::Storage(format!("Failed to serialize: {}", e)))?;
    fs::write(path, encoded)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;
    use std::cell::Cell;

    fn entry(label: &str, embedding: Vec<f32>) -> GalleryEntry {
        GalleryEntry {
            label: label.into(),
            source: PathBuf::from(format!("{}.png", label)),
            modified_secs: 0,
            embedding,
        }
    }

    #[test]
    fn best_match_respects_threshold() {
        let gallery = Gallery::from_entries(vec![
            entry("bob", vec![1.0, 0.0]),
            entry("alice", vec![0.0, 1.0]),
        ]);
        let hit = gallery.best_match(&[0.1, 0.9], 0.5).unwrap();
        assert_eq!(hit.label, "alice");
        assert!(gallery.best_match(&[0.7, 0.7], 0.8).is_none());
    }

    #[test]
    fn ties_go_to_first_label() {
        let gallery = Gallery::from_entries(vec![
            entry("zed", vec![1.0, 0.0]),
            entry("amy", vec![1.0, 0.0]),
        ]);
        assert_eq!(gallery.best_match(&[1.0, 0.0], 0.5).unwrap().label, "amy");
    }

    #[test]
    fn build_reads_files_and_folders_and_reuses_cache() {
        let dir = tempfile::tempdir().unwrap();
        let dataset = dir.path().join("dataset");
        fs::create_dir_all(dataset.join("carol")).unwrap();
        RgbImage::new(4, 4).save(dataset.join("bob.png")).unwrap();
        RgbImage::new(4, 4).save(dataset.join("carol").join("1.png")).unwrap();
        RgbImage::new(4, 4).save(dataset.join("carol").join("2.jpg")).unwrap();
        fs::write(dataset.join("notes.txt"), "ignored").unwrap();
        let cache = dir.path().join("cache/gallery.bincode");

        let calls = Cell::new(0);
        let embed = |_: &DynamicImage| -> Result<Option<Embedding>> {
            calls.set(calls.get() + 1);
            Ok(Some(vec![1.0, 0.0]))
        };

        let gallery = Gallery::build(&dataset, &cache, embed).unwrap();
        assert_eq!(gallery.labels(), vec!["bob", "carol"]);
        assert_eq!(gallery.entries().len(), 3);
        assert_eq!(calls.get(), 3);
        assert!(cache.exists());

        let again = Gallery::build(&dataset, &cache, embed).unwrap();
        assert_eq!(again.entries(), gallery.entries());
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn images_without_faces_are_left_out() {
        let dir = tempfile::tempdir().unwrap();
        RgbImage::new(4, 4).save(dir.path().join("ghost.png")).unwrap();
        let gallery = Gallery::build(dir.path(), &dir.path().join("c.bin"), |_| Ok(None)).unwrap();
        assert!(gallery.is_empty());
    }

    #[test]
    fn missing_dataset_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = Gallery::build(&dir.path().join("none"), &dir.path().join("c.bin"), |_| Ok(None));
        assert!(matches!(result, Err(KioskError::Storage(_))));
    }
}
