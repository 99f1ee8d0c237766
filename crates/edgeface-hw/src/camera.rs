//! V4L2 color capture via the `v4l` crate.

use crate::frame::{Frame, FrameError};
use image::RgbImage;
use std::io;
use std::path::Path;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::capability::Flags as CapFlags;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::{Format, FourCC};

/// Indices tried after the configured one fails.
pub const FALLBACK_INDICES: [u32; 3] = [0, 1, 2];

const STREAM_BUFFERS: u32 = 4;
const MAX_SCANNED_DEVICES: u32 = 16;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("{path}: {reason}")]
    Unavailable { path: String, reason: String },
    #[error("{0} is busy")]
    Busy(String),
    #[error("{0} is not a video capture device")]
    NotCapture(String),
    #[error("no usable camera (tried indices {tried:?})")]
    NoCamera { tried: Vec<u32> },
    #[error("format negotiation: {0}")]
    Format(io::Error),
    #[error("driver offered {0}, need YUYV, GREY or Y16")]
    UnsupportedFormat(FourCC),
    #[error("capture stream: {0}")]
    Stream(io::Error),
    #[error("frame decode: {0}")]
    Decode(#[from] FrameError),
}

/// A V4L2 node that advertises video capture.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub card: String,
    pub driver: String,
    pub bus_info: String,
}

/// Raw layouts the camera can deliver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// Packed 4:2:2, two bytes per pixel.
    Yuyv,
    /// One byte per pixel, monochrome sensors.
    Grey,
    /// Two bytes per pixel little-endian, monochrome sensors.
    Y16,
}

impl PixelFormat {
    fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        match &fourcc.repr {
            b"YUYV" => Some(Self::Yuyv),
            b"GREY" => Some(Self::Grey),
            b"Y16 " | b"Y16\0" => Some(Self::Y16),
            _ => None,
        }
    }

    /// Decode one raw driver buffer into an RGB image.
    pub fn decode(self, buf: &[u8], width: u32, height: u32) -> Result<RgbImage, FrameError> {
        match self {
            Self::Yuyv => crate::frame::yuyv_to_rgb(buf, width, height),
            Self::Grey => crate::frame::grey_to_rgb(buf, width, height),
            Self::Y16 => crate::frame::y16_to_rgb(buf, width, height),
        }
    }
}

/// Device node for a numeric camera index.
pub fn device_path(index: u32) -> String {
    format!("/dev/video{index}")
}

fn connect(path: &str) -> Result<Device, CameraError> {
    if !Path::new(path).exists() {
        return Err(CameraError::Unavailable {
            path: path.to_string(),
            reason: "no such device".into(),
        });
    }
    Device::with_path(path).map_err(|e| {
        if e.raw_os_error() == Some(16) || e.to_string().contains("busy") {
            CameraError::Busy(path.to_string())
        } else {
            CameraError::Unavailable {
                path: path.to_string(),
                reason: e.to_string(),
            }
        }
    })
}

/// Request YUYV at `width`x`height` and accept whatever usable layout the
/// driver settles on.
fn negotiate(device: &Device, width: u32, height: u32) -> Result<(Format, PixelFormat), CameraError> {
    let mut wanted = device.format().map_err(CameraError::Format)?;
    wanted.fourcc = FourCC::new(b"YUYV");
    wanted.width = width;
    wanted.height = height;

    let format = device.set_format(&wanted).map_err(CameraError::Format)?;
    let pixel_format =
        PixelFormat::from_fourcc(format.fourcc).ok_or(CameraError::UnsupportedFormat(format.fourcc))?;
    Ok((format, pixel_format))
}

/// Capture-capable device info for `path`, or `None` if it is not one.
fn capture_info(path: String) -> Option<DeviceInfo> {
    let caps = Device::with_path(&path).ok()?.query_caps().ok()?;
    caps.capabilities
        .contains(CapFlags::VIDEO_CAPTURE)
        .then(|| DeviceInfo {
            path,
            card: caps.card,
            driver: caps.driver,
            bus_info: caps.bus,
        })
}

/// An open V4L2 capture device.
///
/// The mmap stream starts on the first capture and lives as long as the
/// handle, so consecutive frames reuse the same buffers.
pub struct Camera {
    device: Device,
    stream: Option<MmapStream<'static>>,
    pub device_path: String,
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
}

impl Camera {
    /// Open a device node (e.g. "/dev/video0") and ask for `width`x`height`.
    /// The driver may settle on a different size.
    pub fn open(path: &str, width: u32, height: u32) -> Result<Self, CameraError> {
        let device = connect(path)?;
        let caps = device.query_caps().map_err(|e| CameraError::Unavailable {
            path: path.to_string(),
            reason: format!("capability query: {e}"),
        })?;
        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            return Err(CameraError::NotCapture(path.to_string()));
        }

        let (format, pixel_format) = negotiate(&device, width, height)?;
        tracing::info!(
            device = path,
            card = %caps.card,
            width = format.width,
            height = format.height,
            ?pixel_format,
            "camera ready"
        );

        Ok(Self {
            device,
            stream: None,
            device_path: path.to_string(),
            width: format.width,
            height: format.height,
            pixel_format,
        })
    }

    /// Open `/dev/video{index}`, falling back to [`FALLBACK_INDICES`].
    pub fn open_with_fallback(index: u32, width: u32, height: u32) -> Result<Self, CameraError> {
        let mut tried = vec![index];
        let first = Self::open(&device_path(index), width, height);
        let mut last = match first {
            Ok(camera) => return Ok(camera),
            Err(e) => e,
        };

        for candidate in FALLBACK_INDICES.into_iter().filter(|&i| i != index) {
            tracing::debug!(index = tried[tried.len() - 1], error = %last, "camera unavailable");
            tried.push(candidate);
            match Self::open(&device_path(candidate), width, height) {
                Ok(camera) => {
                    tracing::warn!(requested = index, opened = candidate, "using fallback camera");
                    return Ok(camera);
                }
                Err(e) => last = e,
            }
        }

        tracing::debug!(error = %last, "last camera candidate failed");
        Err(CameraError::NoCamera { tried })
    }

    /// Dequeue the next buffer and decode it to RGB.
    pub fn capture_frame(&mut self) -> Result<Frame, CameraError> {
        let stream = match self.stream.take() {
            Some(stream) => stream,
            None => MmapStream::with_buffers(&self.device, BufType::VideoCapture, STREAM_BUFFERS)
                .map_err(CameraError::Stream)?,
        };
        let stream = self.stream.insert(stream);

        let (buf, meta) = stream.next().map_err(CameraError::Stream)?;
        let image = self.pixel_format.decode(buf, self.width, self.height)?;
        Ok(Frame {
            image,
            sequence: meta.sequence,
            timestamp: std::time::Instant::now(),
        })
    }

    /// Capture-capable devices among `/dev/video0` to `/dev/video15`.
    pub fn list_devices() -> Vec<DeviceInfo> {
        (0..MAX_SCANNED_DEVICES)
            .map(device_path)
            .filter(|path| Path::new(path).exists())
            .filter_map(capture_info)
            .collect()
    }
}
