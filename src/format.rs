//! Frame descriptors.
//!
//! These are small `Copy` value types carried by frames: audio and raw video
//! formats, coded video parameters, and the per-frame info structs that
//! frames store and hand back. The library never interprets them beyond
//! what buffer layout needs (plane count and plane geometry for raw video).

use crate::memory::defaults::MAX_PLANES;
use std::time::Duration;

// ============================================================================
// Raw video
// ============================================================================

/// Pixel formats (color space and memory layout).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
#[repr(u8)]
pub enum PixelFormat {
    // ========================================================================
    // YUV 4:2:0
    // ========================================================================
    /// YUV 4:2:0 planar (Y plane, then U plane, then V plane).
    #[default]
    I420 = 0,
    /// YUV 4:2:0 semi-planar (Y plane, then interleaved UV plane).
    Nv12,
    /// YUV 4:2:0 planar, 10-bit little endian in 16-bit words.
    I420_10Le,
    /// YUV 4:2:0 semi-planar, 10-bit in 16-bit words.
    P010,

    // ========================================================================
    // YUV 4:2:2 / 4:4:4
    // ========================================================================
    /// YUV 4:2:2 planar.
    I422,
    /// YUV 4:2:2 packed (Y0 U Y1 V).
    Yuyv,
    /// YUV 4:2:2 packed (U Y0 V Y1).
    Uyvy,
    /// YUV 4:4:4 planar.
    I444,

    // ========================================================================
    // RGB / grayscale
    // ========================================================================
    /// RGB 8-bit per channel, packed (24 bits/pixel).
    Rgb24,
    /// BGR 8-bit per channel, packed (24 bits/pixel).
    Bgr24,
    /// RGBA 8-bit per channel, packed (32 bits/pixel).
    Rgba,
    /// BGRA 8-bit per channel, packed (32 bits/pixel).
    Bgra,
    /// 8-bit grayscale.
    Gray8,
    /// 16-bit grayscale little endian.
    Gray16Le,
}

impl PixelFormat {
    /// Number of planes a frame of this format carries.
    pub const fn plane_count(self) -> usize {
        match self {
            Self::I420 | Self::I420_10Le | Self::I422 | Self::I444 => 3,
            Self::Nv12 | Self::P010 => 2,
            Self::Yuyv | Self::Uyvy | Self::Rgb24 | Self::Bgr24 => 1,
            Self::Rgba | Self::Bgra | Self::Gray8 | Self::Gray16Le => 1,
        }
    }

    /// Contiguous `(row_bytes, rows)` of `plane` for a `width` x `height`
    /// frame, or `None` past the last plane.
    pub const fn plane_layout(
        self,
        plane: usize,
        width: usize,
        height: usize,
    ) -> Option<(usize, usize)> {
        if plane >= self.plane_count() {
            return None;
        }
        let half_w = width.div_ceil(2);
        let half_h = height.div_ceil(2);
        let chroma = plane > 0;
        Some(match self {
            Self::I420 if chroma => (half_w, half_h),
            Self::I420_10Le if chroma => (half_w * 2, half_h),
            Self::I420 => (width, height),
            Self::I420_10Le => (width * 2, height),
            Self::Nv12 if chroma => (half_w * 2, half_h),
            Self::P010 if chroma => (half_w * 4, half_h),
            Self::Nv12 => (width, height),
            Self::P010 => (width * 2, height),
            Self::I422 if chroma => (half_w, height),
            Self::I422 | Self::I444 | Self::Gray8 => (width, height),
            Self::Yuyv | Self::Uyvy => (half_w * 4, height),
            Self::Rgb24 | Self::Bgr24 => (width * 3, height),
            Self::Rgba | Self::Bgra => (width * 4, height),
            Self::Gray16Le => (width * 2, height),
        })
    }
}

/// Raw video format.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct VideoFormat {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Pixel format (color space and layout).
    pub pixel_format: PixelFormat,
}

impl VideoFormat {
    /// Create a new video format.
    pub const fn new(width: u32, height: u32, pixel_format: PixelFormat) -> Self {
        Self {
            width,
            height,
            pixel_format,
        }
    }

    /// Number of planes.
    pub const fn plane_count(&self) -> usize {
        self.pixel_format.plane_count()
    }

    /// Row length in bytes of `plane` without padding (0 past the last plane).
    pub const fn contiguous_stride(&self, plane: usize) -> usize {
        match self.layout(plane) {
            Some((row, _)) => row,
            None => 0,
        }
    }

    /// Number of rows of `plane` (0 past the last plane).
    pub const fn plane_rows(&self, plane: usize) -> usize {
        match self.layout(plane) {
            Some((_, rows)) => rows,
            None => 0,
        }
    }

    /// Size in bytes of `plane` without padding.
    pub const fn plane_size(&self, plane: usize) -> usize {
        self.contiguous_stride(plane) * self.plane_rows(plane)
    }

    /// Size in bytes of the whole frame without padding.
    pub const fn frame_size(&self) -> usize {
        let mut size = 0;
        let mut plane = 0;
        while plane < self.plane_count() {
            size += self.plane_size(plane);
            plane += 1;
        }
        size
    }

    const fn layout(&self, plane: usize) -> Option<(usize, usize)> {
        self.pixel_format
            .plane_layout(plane, self.width as usize, self.height as usize)
    }
}

/// Per-frame description of a raw video frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct RawFrameInfo {
    /// Frame format.
    pub format: VideoFormat,
    /// Row stride of each plane in bytes (unused entries are 0).
    pub plane_stride: [usize; MAX_PLANES],
    /// Presentation timestamp.
    pub pts: Duration,
    /// Frame index within the stream.
    pub index: u64,
}

impl RawFrameInfo {
    /// Info for `format` with contiguous (unpadded) strides.
    pub fn new(format: VideoFormat) -> Self {
        let mut plane_stride = [0; MAX_PLANES];
        for (plane, stride) in plane_stride.iter_mut().enumerate() {
            *stride = format.contiguous_stride(plane);
        }
        Self {
            format,
            plane_stride,
            pts: Duration::ZERO,
            index: 0,
        }
    }

    /// Set the stride of one plane.
    pub fn with_stride(mut self, plane: usize, stride: usize) -> Self {
        if let Some(slot) = self.plane_stride.get_mut(plane) {
            *slot = stride;
        }
        self
    }

    /// Set the presentation timestamp.
    pub fn with_pts(mut self, pts: Duration) -> Self {
        self.pts = pts;
        self
    }

    /// Size in bytes of `plane` with its configured stride.
    pub fn plane_size(&self, plane: usize) -> usize {
        let stride = self.plane_stride.get(plane).copied().unwrap_or(0);
        stride.saturating_mul(self.format.plane_rows(plane))
    }
}

// ============================================================================
// Coded video
// ============================================================================

/// Video codecs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum VideoCodec {
    /// H.264 / AVC.
    #[default]
    H264,
    /// H.265 / HEVC.
    H265,
    /// VP9.
    Vp9,
    /// AV1.
    Av1,
}

/// Coded frame type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum CodedFrameType {
    /// Unknown or unspecified.
    #[default]
    Unknown,
    /// Instantaneous decoder refresh.
    Idr,
    /// Intra frame.
    I,
    /// Predicted frame.
    P,
    /// Bidirectionally predicted frame.
    B,
}

/// Per-frame description of a coded video frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct CodedFrameInfo {
    /// Codec of the bitstream.
    pub codec: VideoCodec,
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Frame type.
    pub frame_type: CodedFrameType,
    /// Presentation timestamp.
    pub pts: Duration,
    /// Frame index within the stream.
    pub index: u64,
}

impl CodedFrameInfo {
    /// Info for a `width` x `height` stream of `codec`.
    pub fn new(codec: VideoCodec, width: u32, height: u32) -> Self {
        Self {
            codec,
            width,
            height,
            ..Default::default()
        }
    }

    /// Set the frame type.
    pub fn with_frame_type(mut self, frame_type: CodedFrameType) -> Self {
        self.frame_type = frame_type;
        self
    }

    /// Set the presentation timestamp.
    pub fn with_pts(mut self, pts: Duration) -> Self {
        self.pts = pts;
        self
    }
}

/// Description of one NAL unit in a coded frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct NaluInfo {
    /// Size of the NAL unit in bytes, including any start code.
    pub size: usize,
    /// Codec-specific NAL unit type.
    pub nal_type: u8,
    /// Importance for drop decisions (0 = droppable).
    pub importance: u8,
}

impl NaluInfo {
    /// Describe a NAL unit of `size` bytes.
    pub const fn new(size: usize, nal_type: u8) -> Self {
        Self {
            size,
            nal_type,
            importance: 0,
        }
    }
}

// ============================================================================
// Audio
// ============================================================================

/// Audio sample formats.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
#[repr(u8)]
pub enum SampleFormat {
    /// Signed 16-bit integer.
    #[default]
    S16 = 0,
    /// Signed 32-bit integer.
    S32,
    /// 32-bit floating point.
    F32,
    /// Unsigned 8-bit integer.
    U8,
}

impl SampleFormat {
    /// Bytes per sample.
    pub const fn bytes(&self) -> usize {
        match self {
            Self::S16 => 2,
            Self::S32 | Self::F32 => 4,
            Self::U8 => 1,
        }
    }
}

/// Raw audio format.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct AudioFormat {
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Number of channels.
    pub channels: u16,
    /// Sample format.
    pub sample_format: SampleFormat,
}

impl AudioFormat {
    /// Create a new audio format.
    pub const fn new(sample_rate: u32, channels: u16, sample_format: SampleFormat) -> Self {
        Self {
            sample_rate,
            channels,
            sample_format,
        }
    }

    /// Bytes for one sample time across all channels.
    pub const fn bytes_per_frame(&self) -> usize {
        self.sample_format.bytes() * self.channels as usize
    }
}

/// Per-frame description of an audio frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct AudioFrameInfo {
    /// Sample format.
    pub format: AudioFormat,
    /// Presentation timestamp.
    pub pts: Duration,
    /// Frame index within the stream.
    pub index: u64,
}

impl AudioFrameInfo {
    /// Info for `format` at time zero.
    pub fn new(format: AudioFormat) -> Self {
        Self {
            format,
            ..Default::default()
        }
    }

    /// Set the presentation timestamp.
    pub fn with_pts(mut self, pts: Duration) -> Self {
        self.pts = pts;
        self
    }
}
