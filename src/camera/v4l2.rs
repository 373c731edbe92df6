use crate::common::config::CameraConfig;
use crate::common::{KioskError, Result};
use image::{DynamicImage, ImageBuffer, ImageFormat, Luma, Rgb, RgbImage};
use std::time::Duration;
use v4l::buffer::Type;
use v4l::io::traits::CaptureStream;
use v4l::video::Capture;
use v4l::{Device, FourCC};

pub struct Camera {
    device: Device,
    config: CameraConfig,
}

/// A running capture stream borrowed from a [`Camera`].
pub struct CameraSession<'a> {
    stream: v4l::io::mmap::Stream<'a>,
    format: v4l::Format,
}

impl Camera {
    pub fn open(config: &CameraConfig) -> Result<Self> {
        let index = config.device_index;
        tracing::info!("Opening camera device {}...", index);

        let device = Device::new(index as usize)
            .map_err(|e| KioskError::Camera(format!("Failed to open camera {}: {}", index, e)))?;

        let caps = device.query_caps()
            .map_err(|e| KioskError::Camera(format!("Failed to query capabilities: {}", e)))?;
        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            tracing::warn!("Device {} ({}) may not support standard video capture", index, caps.card);
        }

        let mut fmt = device.format()
            .map_err(|e| KioskError::Camera(format!("Failed to get format: {}", e)))?;
        fmt.width = config.width;
        fmt.height = config.height;
        // Keep GREY for infrared sensors, otherwise ask for MJPG
        if fmt.fourcc != FourCC::new(b"GREY") {
            fmt.fourcc = FourCC::new(b"MJPG");
        }

        if let Err(e) = device.set_format(&fmt) {
            tracing::warn!("Could not set exact format: {}. Using device defaults.", e);
        }

        let actual = device.format()
            .map_err(|e| KioskError::Camera(format!("Failed to get final format: {}", e)))?;
        tracing::info!(
            "Camera {} ready: {}x{} {}",
            caps.card, actual.width, actual.height, fourcc_name(actual.fourcc)
        );
        if actual.width != config.width || actual.height != config.height {
            tracing::warn!(
                "Camera resolution {}x{} differs from requested {}x{}",
                actual.width, actual.height, config.width, config.height
            );
        }

        Ok(Self { device, config: config.clone() })
    }

    /// Start streaming, discarding the configured number of warmup frames.
    pub fn start_session(&mut self) -> Result<CameraSession<'_>> {
        let format = self.device.format()
            .map_err(|e| KioskError::Camera(format!("Failed to get format: {}", e)))?;

        let mut stream = v4l::io::mmap::Stream::with_buffers(&self.device, Type::VideoCapture, 4)
            .map_err(|e| KioskError::Camera(format!("Failed to create stream: {}", e)))?;

        for i in 0..self.config.warmup_frames {
            stream.next()
                .map_err(|e| KioskError::Camera(format!("Failed to capture warmup frame {}: {}", i, e)))?;
            std::thread::sleep(Duration::from_millis(self.config.warmup_delay_ms));
        }
        tracing::debug!("Camera warmed up");

        Ok(CameraSession { stream, format })
    }
}

impl CameraSession<'_> {
    /// Next frame as the sensor delivers it, without mirroring.
    pub fn capture_frame(&mut self) -> Result<DynamicImage> {
        let (buf, meta) = self.stream.next()
            .map_err(|e| KioskError::Camera(format!("Failed to capture: {}", e)))?;
        let used = (meta.bytesused as usize).min(buf.len());
        let data = if used > 0 { &buf[..used] } else { buf };

        decode_frame(self.format.fourcc, data, self.format.width, self.format.height)
    }
}

fn fourcc_name(fourcc: FourCC) -> String {
    fourcc.str().map(str::to_string).unwrap_or_else(|_| format!("{:?}", fourcc.repr))
}

pub(crate) fn decode_frame(fourcc: FourCC, data: &[u8], width: u32, height: u32) -> Result<DynamicImage> {
    match &fourcc.repr {
        b"GREY" => grey_to_image(data, width, height),
        b"YUYV" => yuyv_to_image(data, width, height),
        b"MJPG" => Ok(image::load_from_memory_with_format(data, ImageFormat::Jpeg)?),
        _ => Err(KioskError::Camera(format!("Unsupported format {}", fourcc_name(fourcc)))),
    }
}

fn grey_to_image(data: &[u8], width: u32, height: u32) -> Result<DynamicImage> {
    let len = (width * height) as usize;
    let pixels = data.get(..len)
        .ok_or_else(|| KioskError::Camera("Short grayscale frame".into()))?;
    let img_buffer = ImageBuffer::<Luma<u8>, _>::from_raw(width, height, pixels.to_vec())
        .ok_or_else(|| KioskError::Camera("Failed to create grayscale image buffer".into()))?;

    Ok(DynamicImage::ImageLuma8(img_buffer))
}

fn yuyv_to_image(data: &[u8], width: u32, height: u32) -> Result<DynamicImage> {
    let len = (width * height * 2) as usize;
    if data.len() < len || width % 2 != 0 {
        return Err(KioskError::Camera("Malformed YUYV frame".into()));
    }

    let mut img = RgbImage::new(width, height);
    for (i, chunk) in data[..len].chunks_exact(4).enumerate() {
        let [y0, u, y1, v] = [chunk[0], chunk[1], chunk[2], chunk[3]];
        let pixel = (i * 2) as u32;
        let (x, y) = (pixel % width, pixel / width);
        img.put_pixel(x, y, yuv_to_rgb(y0, u, v));
        img.put_pixel(x + 1, y, yuv_to_rgb(y1, u, v));
    }
    Ok(DynamicImage::ImageRgb8(img))
}

// BT.601 limited range
fn yuv_to_rgb(y: u8, u: u8, v: u8) -> Rgb<u8> {
    let c = (y as f32 - 16.0) * 1.164;
    let d = u as f32 - 128.0;
    let e = v as f32 - 128.0;
    let clamp = |x: f32| x.round().clamp(0.0, 255.0) as u8;
    Rgb([
        clamp(c + 1.596 * e),
        clamp(c - 0.392 * d - 0.813 * e),
        clamp(c + 2.017 * d),
    ])
}
