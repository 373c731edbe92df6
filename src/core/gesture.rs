use crate::common::config::GestureConfig;
use crate::core::capabilities::{HandLandmarks, LevelControl};
use crate::core::session::SessionSnapshot;

/// Values produced for one frame of hand input.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GestureSignal {
    pub pinch_distance: i32,
    pub scale: f32,
    pub brightness: u8,
    pub volume: u8,
}

#[derive(Debug, Clone, Copy)]
struct GestureState {
    previous_pinch_distance: Option<f32>,
    scale: f32,
}

/// Turns hand geometry into a pinch scale and absolute brightness/volume levels.
pub struct GestureMapper {
    config: GestureConfig,
    state: GestureState,
    volume: Box<dyn LevelControl>,
    brightness: Box<dyn LevelControl>,
    applied_volume: Option<u8>,
    applied_brightness: Option<u8>,
}

impl GestureMapper {
    pub fn new(
        config: GestureConfig,
        volume: Box<dyn LevelControl>,
        brightness: Box<dyn LevelControl>,
    ) -> Self {
        Self {
            config,
            state: GestureState { previous_pinch_distance: None, scale: 1.0 },
            volume,
            brightness,
            applied_volume: None,
            applied_brightness: None,
        }
    }

    pub fn scale(&self) -> f32 {
        self.state.scale
    }

    /// Map this frame's hands, driving the volume and brightness controls.
    ///
    /// Returns `None` when the session is not authenticated or no usable hand
    /// was tracked. Only the first `max_hands` hands are considered and the
    /// last one processed determines the result.
    pub fn map(
        &mut self,
        session: &SessionSnapshot,
        hands: &[HandLandmarks],
        frame_width: u32,
        frame_height: u32,
    ) -> Option<GestureSignal> {
        if !session.authenticated {
            tracing::debug!("Gesture control blocked: no authenticated user");
            return None;
        }

        let mut signal = None;
        for hand in hands.iter().take(self.config.max_hands) {
            if let Some(s) = self.map_hand(hand, frame_width, frame_height) {
                signal = Some(s);
            }
        }
        signal
    }

    fn map_hand(&mut self, hand: &HandLandmarks, width: u32, height: u32) -> Option<GestureSignal> {
        let thumb = hand.get(HandLandmarks::THUMB_TIP)?;
        let index = hand.get(HandLandmarks::INDEX_TIP)?;
        let wrist = hand.get(HandLandmarks::WRIST)?;
        if !(thumb.is_finite() && index.is_finite() && wrist.is_finite()) {
            tracing::debug!("Skipping hand with non-finite landmarks");
            return None;
        }

        let to_pixels = |x: f32, y: f32| {
            ((x * width as f32) as i32, (y * height as f32) as i32)
        };
        let (tx, ty) = to_pixels(thumb.x, thumb.y);
        let (ix, iy) = to_pixels(index.x, index.y);
        let distance = ((ix - tx) as f32).hypot((iy - ty) as f32);

        self.smooth_scale(distance);

        let brightness = to_percent((1.0 - wrist.y) * 100.0);
        let volume = to_percent(wrist.x * 100.0);
        self.apply_levels(brightness, volume);

        Some(GestureSignal {
            pinch_distance: distance as i32,
            scale: self.state.scale,
            brightness,
            volume,
        })
    }

    fn smooth_scale(&mut self, distance: f32) {
        if let Some(previous) = self.state.previous_pinch_distance {
            let delta = distance - previous;
            if delta.abs() > self.config.hysteresis_px {
                let step = self.config.scale_step * delta.signum();
                self.state.scale = (self.state.scale + step)
                    .clamp(self.config.scale_min, self.config.scale_max);
            }
        }
        self.state.previous_pinch_distance = Some(distance);
    }

    fn apply_levels(&mut self, brightness: u8, volume: u8) {
        if self.applied_brightness != Some(brightness) {
            apply(self.brightness.as_ref(), brightness);
            self.applied_brightness = Some(brightness);
        }
        if self.applied_volume != Some(volume) {
            apply(self.volume.as_ref(), volume);
            self.applied_volume = Some(volume);
        }
    }
}

fn to_percent(value: f32) -> u8 {
    value.clamp(0.0, 100.0) as u8
}

fn apply(control: &dyn LevelControl, percent: u8) {
    if let Err(e) = control.set(percent) {
        tracing::warn!("Failed to set {} to {}%: {}", control.name(), percent, e);
    }
}
