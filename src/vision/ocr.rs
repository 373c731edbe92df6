use crate::common::config::OcrConfig;
use crate::common::{KioskError, Result};
use crate::core::capabilities::{ExtractedText, TextExtractor};
use image::{DynamicImage, ImageOutputFormat};
use std::io::{Cursor, Write};
use std::process::{Command, Stdio};

/// Runs the `tesseract` CLI on a histogram-equalized grayscale copy of the frame.
pub struct TesseractExtractor {
    program: String,
    language: String,
}

impl TesseractExtractor {
    pub fn new(config: &OcrConfig) -> Self {
        Self {
            program: config.program.clone(),
            language: config.language.clone(),
        }
    }

    fn encode(image: &DynamicImage) -> Result<Vec<u8>> {
        let gray = imageproc::contrast::equalize_histogram(&image.to_luma8());
        let mut png = Cursor::new(Vec::new());
        DynamicImage::ImageLuma8(gray).write_to(&mut png, ImageOutputFormat::Png)?;
        Ok(png.into_inner())
    }
}

impl TextExtractor for TesseractExtractor {
    fn extract(&self, image: &DynamicImage) -> Result<ExtractedText> {
        let png = Self::encode(image)?;

        let mut child = Command::new(&self.program)
            .args(["stdin", "stdout", "-l", &self.language])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| KioskError::Device(format!("Failed to start {}: {}", self.program, e)))?;

        // The child is reaped even when it stops reading early.
        let written = child.stdin.take().map_or(Ok(()), |mut stdin| stdin.write_all(&png));
        let output = child.wait_with_output()?;
        if !output.status.success() {
            return Err(KioskError::Device(format!(
                "{} exited with {}", self.program, output.status
            )));
        }
        written?;

        let text = normalize_text(&String::from_utf8_lossy(&output.stdout));
        if let ExtractedText::Text(t) = &text {
            tracing::info!("OCR: {}", t);
        }
        Ok(text)
    }
}

/// Collapse recognized lines into one space-separated string.
pub fn normalize_text(raw: &str) -> ExtractedText {
    let joined = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if joined.is_empty() {
        ExtractedText::NoText
    } else {
        ExtractedText::Text(joined)
    }
}
