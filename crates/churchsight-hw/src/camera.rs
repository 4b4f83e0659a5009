//! V4L2 color camera capture via the `v4l` crate.

use crate::frame::{self, Frame};
use crate::source::FrameSource;
use image::RgbImage;
use std::path::Path;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

const REQUESTED_WIDTH: u32 = 640;
const REQUESTED_HEIGHT: u32 = 480;
const STREAM_BUFFERS: u32 = 4;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("video capture not supported")]
    CaptureNotSupported,
}

/// Negotiated pixel format for the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed, the usual webcam format.
    Yuyv,
    /// 8-bit grayscale.
    Grey,
    /// 16-bit little-endian grayscale.
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
}

/// A resource opened on first use and kept until it fails.
///
/// After `reset` the next `get_or_open` opens a fresh one.
struct Reopening<T> {
    inner: Option<T>,
}

impl<T> Reopening<T> {
    fn new() -> Self {
        Self { inner: None }
    }

    fn get_or_open<E>(&mut self, open: impl FnOnce() -> Result<T, E>) -> Result<&mut T, E> {
        let inner = match self.inner.take() {
            Some(inner) => inner,
            None => open()?,
        };
        Ok(self.inner.insert(inner))
    }

    fn reset(&mut self) {
        self.inner = None;
    }
}

/// V4L2 camera device handle.
///
/// The mmap stream is started on the first capture and reused for every
/// following frame; it is restarted only after a dequeue failure.
pub struct Camera {
    stream: Reopening<MmapStream<'static>>,
    device: Device,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pub pixel_format: PixelFormat,
}

impl Camera {
    /// Open a V4L2 camera device by path (e.g., "/dev/video0").
    pub fn open(device_path: &str) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceNotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| {
            if e.to_string().contains("busy") || e.to_string().contains("EBUSY") {
                CameraError::DeviceBusy
            } else {
                CameraError::DeviceNotFound(format!("{device_path}: {e}"))
            }
        })?;

        let caps = device.query_caps().map_err(|e| {
            CameraError::CaptureFailed(format!("failed to query capabilities: {e}"))
        })?;

        tracing::info!(
            device = device_path,
            driver = %caps.driver,
            card = %caps.card,
            "opened camera"
        );

        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CameraError::CaptureNotSupported);
        }

        let mut fmt = device.format().map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to get format: {e}"))
        })?;
        fmt.fourcc = FourCC::new(b"YUYV");
        fmt.width = REQUESTED_WIDTH;
        fmt.height = REQUESTED_HEIGHT;

        let negotiated = device.set_format(&fmt).map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to set format: {e}"))
        })?;

        let pixel_format = PixelFormat::from_fourcc(negotiated.fourcc).ok_or_else(|| {
            CameraError::FormatNegotiationFailed(format!(
                "unsupported pixel format: {:?} (need YUYV, GREY, or Y16)",
                negotiated.fourcc
            ))
        })?;

        tracing::info!(
            width = negotiated.width,
            height = negotiated.height,
            format = ?pixel_format,
            "negotiated format"
        );

        Ok(Self {
            stream: Reopening::new(),
            device,
            width: negotiated.width,
            height: negotiated.height,
            device_path: device_path.to_string(),
            pixel_format,
        })
    }

    /// Capture the next color frame from the running stream.
    pub fn capture_frame(&mut self) -> Result<Frame, CameraError> {
        let (format, width, height) = (self.pixel_format, self.width, self.height);
        let device = &self.device;
        let stream = self.stream.get_or_open(|| {
            tracing::debug!(device = %self.device_path, "starting capture stream");
            MmapStream::with_buffers(device, BufType::VideoCapture, STREAM_BUFFERS)
                .map_err(|e| CameraError::CaptureFailed(format!("failed to create mmap stream: {e}")))
        })?;

        let dequeued = stream
            .next()
            .map(|(buf, meta)| (buf_to_rgb(format, width, height, buf), meta.sequence));

        match dequeued {
            Ok((image, sequence)) => Ok(Frame::new(image?, sequence)),
            Err(e) => {
                self.stream.reset();
                Err(CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}")))
            }
        }
    }
}

fn buf_to_rgb(format: PixelFormat, width: u32, height: u32, buf: &[u8]) -> Result<RgbImage, CameraError> {
    let converted = match format {
        PixelFormat::Yuyv => frame::yuyv_to_rgb(buf, width, height),
        PixelFormat::Grey => frame::grey_to_rgb(buf, width, height),
        PixelFormat::Y16 => frame::y16_to_rgb(buf, width, height),
    };
    converted.map_err(|e| CameraError::CaptureFailed(format!("{format:?} conversion failed: {e}")))
}

impl FrameSource for Camera {
    fn next_frame(&mut self) -> Option<Frame> {
        match self.capture_frame() {
            Ok(frame) => Some(frame),
            Err(e) => {
                tracing::debug!(device = %self.device_path, error = %e, "no frame this tick");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixel_format_from_fourcc() {
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"YUYV")), Some(PixelFormat::Yuyv));
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"GREY")), Some(PixelFormat::Grey));
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"Y16 ")), Some(PixelFormat::Y16));
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"MJPG")), None);
    }

    #[test]
    fn test_stream_opened_once_and_reused() {
        let mut stream: Reopening<u32> = Reopening::new();
        let mut opens = 0;
        for _ in 0..3 {
            let value = stream
                .get_or_open(|| {
                    opens += 1;
                    Ok::<_, CameraError>(7)
                })
                .unwrap();
            assert_eq!(*value, 7);
        }
        assert_eq!(opens, 1);
    }

    #[test]
    fn test_stream_reopened_after_reset() {
        let mut stream: Reopening<u32> = Reopening::new();
        let mut opens = 0;
        let mut open = || {
            opens += 1;
            Ok::<_, CameraError>(opens)
        };
        assert_eq!(*stream.get_or_open(&mut open).unwrap(), 1);
        stream.reset();
        assert_eq!(*stream.get_or_open(&mut open).unwrap(), 2);
        assert_eq!(*stream.get_or_open(&mut open).unwrap(), 2);
    }

    #[test]
    fn test_failed_open_leaves_stream_closed() {
        let mut stream: Reopening<u32> = Reopening::new();
        let err = stream.get_or_open(|| Err(CameraError::CaptureFailed("no buffers".into())));
        assert!(err.is_err());
        assert_eq!(*stream.get_or_open(|| Ok::<_, CameraError>(3)).unwrap(), 3);
    }

    #[test]
    fn test_buf_to_rgb_rejects_short_buffer() {
        assert!(matches!(
            buf_to_rgb(PixelFormat::Yuyv, 4, 2, &[0u8; 4]),
            Err(CameraError::CaptureFailed(_))
        ));
        let grey = buf_to_rgb(PixelFormat::Grey, 2, 1, &[10, 200]).unwrap();
        assert_eq!(grey.get_pixel(1, 0).0, [200, 200, 200]);
    }

    #[test]
    fn test_open_missing_device() {
        assert!(matches!(
            Camera::open("/dev/churchsight-no-such-camera"),
            Err(CameraError::DeviceNotFound(_))
        ));
    }
}
