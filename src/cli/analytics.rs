use crate::common::Result;
use crate::storage::AttendanceLedger;
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_circle_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;
use std::collections::BTreeMap;
use std::f32::consts::{FRAC_PI_2, TAU};
use std::fs;
use std::path::{Path, PathBuf};

const CHART_WIDTH: u32 = 600;
const CHART_HEIGHT: u32 = 400;
const RADIUS: i32 = 170;
const BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);
const OUTLINE: Rgb<u8> = Rgb([40, 40, 40]);
const FALLBACK_COLORS: [Rgb<u8>; 4] = [
    Rgb([0, 150, 136]),
    Rgb([233, 30, 99]),
    Rgb([63, 81, 181]),
    Rgb([205, 220, 57]),
];

#[derive(Debug, Clone, PartialEq)]
pub struct EmotionShare {
    pub emotion: String,
    pub count: usize,
    pub percent: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnalyticsExport {
    pub chart: PathBuf,
    pub summary: PathBuf,
    pub total: usize,
}

pub fn summarize(counts: &BTreeMap<String, usize>) -> Vec<EmotionShare> {
    let total: usize = counts.values().sum();
    if total == 0 {
        return Vec::new();
    }
    counts
        .iter()
        .map(|(emotion, &count)| EmotionShare {
            emotion: emotion.clone(),
            count,
            percent: count as f32 * 100.0 / total as f32,
        })
        .collect()
}

pub fn summary_text(shares: &[EmotionShare]) -> String {
    shares
        .iter()
        .map(|s| format!("{}: {} ({:.1}%)\n", s.emotion, s.count, s.percent))
        .collect()
}

fn color_for(emotion: &str, index: usize) -> Rgb<u8> {
    match emotion {
        "happy" => Rgb([255, 193, 7]),
        "sad" => Rgb([33, 150, 243]),
        "angry" => Rgb([244, 67, 54]),
        "neutral" => Rgb([158, 158, 158]),
        "surprise" => Rgb([255, 112, 67]),
        "fear" => Rgb([156, 39, 176]),
        "disgust" => Rgb([76, 175, 80]),
        "contempt" => Rgb([121, 85, 72]),
        _ => FALLBACK_COLORS[index % FALLBACK_COLORS.len()],
    }
}

/// Pie chart starting at twelve o'clock and running clockwise, with a swatch
/// legend in the same order as the text summary.
pub fn render_pie(shares: &[EmotionShare]) -> RgbImage {
    let mut img = RgbImage::from_pixel(CHART_WIDTH, CHART_HEIGHT, BACKGROUND);
    let (cx, cy) = (CHART_HEIGHT as i32 / 2, CHART_HEIGHT as i32 / 2);
    let colors: Vec<Rgb<u8>> = shares
        .iter()
        .enumerate()
        .map(|(i, s)| color_for(&s.emotion, i))
        .collect();

    let mut bounds = Vec::with_capacity(shares.len());
    let mut cumulative = 0.0;
    for share in shares {
        cumulative += share.percent / 100.0;
        bounds.push(cumulative);
    }

    for y in (cy - RADIUS)..=(cy + RADIUS) {
        for x in (cx - RADIUS)..=(cx + RADIUS) {
            let (dx, dy) = ((x - cx) as f32, (y - cy) as f32);
            if dx * dx + dy * dy > (RADIUS * RADIUS) as f32 {
                continue;
            }
            let angle = (dy.atan2(dx) + FRAC_PI_2).rem_euclid(TAU);
            let fraction = angle / TAU;
            let slice = bounds
                .iter()
                .position(|&end| fraction < end)
                .unwrap_or(shares.len().saturating_sub(1));
            if let Some(color) = colors.get(slice) {
                img.put_pixel(x as u32, y as u32, *color);
            }
        }
    }
    draw_hollow_circle_mut(&mut img, (cx, cy), RADIUS, OUTLINE);

    for (i, color) in colors.iter().enumerate() {
        let swatch = Rect::at(CHART_HEIGHT as i32 + 30, 40 + 30 * i as i32).of_size(20, 20);
        draw_filled_rect_mut(&mut img, swatch, *color);
        draw_hollow_rect_mut(&mut img, swatch, OUTLINE);
    }
    img
}

/// Write the emotion pie chart to `chart_path` and a text summary beside it.
///
/// Returns `Ok(None)` without touching the filesystem when the ledger is empty.
pub fn export(ledger: &AttendanceLedger, chart_path: &Path) -> Result<Option<AnalyticsExport>> {
    let shares = summarize(&ledger.emotion_counts());
    if shares.is_empty() {
        tracing::info!("No attendance records yet; skipping analytics export");
        return Ok(None);
    }

    if let Some(parent) = chart_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    render_pie(&shares).save(chart_path)?;

    let summary = chart_path.with_extension("txt");
    fs::write(&summary, summary_text(&shares))?;

    tracing::info!("Saved {}", chart_path.display());
    Ok(Some(AnalyticsExport {
        chart: chart_path.to_path_buf(),
        summary,
        total: ledger.len(),
    }))
}
