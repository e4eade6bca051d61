//! Scan parameter planner
//!
//! Converts a user-facing scan request (millimeter area, DPI, color mode,
//! depth, source) into device-native geometry and derived buffer sizing.
//! Pure computation; rejected requests never reach the device.

use crate::error::{Error, Result};
use crate::protocol::capability::DeviceCapabilities;

const MM_PER_INCH: f64 = 25.4;

/// Color mode of a scan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorMode {
    /// 1-bit black and white
    Binary,
    /// Single-channel grayscale
    Gray,
    /// Three-channel RGB
    Color,
    /// Four-channel RGB + infrared (experimental, film dust removal)
    Infrared,
}

impl ColorMode {
    /// Channel count on the wire
    pub fn channels(&self) -> usize {
        match self {
            ColorMode::Binary | ColorMode::Gray => 1,
            ColorMode::Color => 3,
            ColorMode::Infrared => 4,
        }
    }

    /// Wire byte for the set-color-mode command
    pub fn wire_byte(&self) -> u8 {
        match self {
            ColorMode::Binary => 0x00,
            ColorMode::Gray => 0x02,
            ColorMode::Color => 0x03,
            ColorMode::Infrared => 0x04,
        }
    }
}

/// Input source selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Flatbed,
    /// Automatic document feeder
    Adf,
    /// Transparency unit, primary film area
    TpuPrimary,
    /// Transparency unit, secondary film area
    TpuSecondary,
}

impl Source {
    /// Wire byte for the set-source command
    pub fn wire_byte(&self) -> u8 {
        match self {
            Source::Flatbed => 0x00,
            Source::Adf => 0x01,
            Source::TpuPrimary => 0x02,
            Source::TpuSecondary => 0x03,
        }
    }
}

/// Requested scan area in millimeters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RectMm {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

/// User-facing scan request
#[derive(Debug, Clone)]
pub struct ScanRequest {
    /// Resolution in DPI
    pub resolution: u32,
    pub mode: ColorMode,
    /// Requested bit depth (1, 8, 16; >8 values are promoted to 16)
    pub depth: u8,
    pub area: RectMm,
    pub source: Source,
}

/// Scan rectangle in device pixels at the requested resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RectPx {
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
}

/// Device-native scan parameters, consumed once per scan start
#[derive(Debug, Clone)]
pub struct ScanParameters {
    pub resolution: u32,
    pub mode: ColorMode,
    /// Depth actually programmed (after promotion)
    pub depth: u8,
    pub rect: RectPx,
    pub source: Source,
    pub pixels_per_line: u32,
    pub bytes_per_line: usize,
    pub lines: u32,
    /// Vertical sensor offset in scan lines at this resolution; non-zero
    /// activates the color-shuffle stage
    pub line_distance: u32,
}

impl ScanParameters {
    /// Total payload length the device will be asked for
    pub fn total_bytes(&self) -> usize {
        self.bytes_per_line * self.lines as usize
    }
}

/// Convert a request into device parameters, or reject it before any I/O
pub fn plan(request: &ScanRequest, caps: &DeviceCapabilities) -> Result<ScanParameters> {
    let dpi = request.resolution;
    if dpi < caps.min_resolution || dpi > caps.max_resolution {
        return Err(Error::InvalidParameter(format!(
            "resolution {} outside supported range {}-{}",
            dpi, caps.min_resolution, caps.max_resolution
        )));
    }

    let extent = match request.source {
        Source::Flatbed => caps.flatbed,
        Source::Adf => {
            caps.adf
                .ok_or_else(|| Error::NotSupported("no document feeder installed".to_string()))?
                .extent
        }
        Source::TpuPrimary | Source::TpuSecondary => {
            caps.tpu
                .ok_or_else(|| {
                    Error::NotSupported("no transparency unit installed".to_string())
                })?
                .extent
        }
    };
    if request.mode == ColorMode::Infrared && caps.tpu.is_none() {
        return Err(Error::NotSupported(
            "infrared channel requires the transparency unit".to_string(),
        ));
    }

    let depth = match (request.mode, request.depth) {
        (ColorMode::Binary, 1) => 1,
        (ColorMode::Binary, d) => {
            return Err(Error::InvalidParameter(format!(
                "binary mode requires depth 1, got {}",
                d
            )))
        }
        (_, 1) => {
            return Err(Error::InvalidParameter(
                "depth 1 is only valid in binary mode".to_string(),
            ))
        }
        (_, d) if d <= 8 => 8,
        // No 10/12-bit pass-through: anything over 8 becomes 16
        (_, _) if caps.max_depth > 8 => 16,
        (_, d) => {
            return Err(Error::NotSupported(format!(
                "depth {} exceeds device maximum {}",
                d, caps.max_depth
            )))
        }
    };

    let to_px = |mm: f64| -> u32 {
        if mm <= 0.0 {
            0
        } else {
            (mm * dpi as f64 / MM_PER_INCH) as u32
        }
    };

    // Source extents are stored at the optical resolution; scale the limits
    // to the requested one.
    let max_w = (extent.width as u64 * dpi as u64 / caps.optical_resolution as u64) as u32;
    let max_h = (extent.height as u64 * dpi as u64 / caps.optical_resolution as u64) as u32;

    let left = to_px(request.area.left).min(max_w);
    let top = to_px(request.area.top).min(max_h);
    // Transfer granularity: the device only moves whole groups of 8 pixels
    let width = to_px(request.area.width).min(max_w - left) & !7;
    let height = to_px(request.area.height).min(max_h - top);

    if width == 0 || height == 0 {
        return Err(Error::EmptyArea);
    }

    let channels = request.mode.channels();
    let bytes_per_line = match depth {
        1 => width as usize / 8 * channels,
        8 => width as usize * channels,
        _ => width as usize * 2 * channels,
    };

    let line_distance = if caps.needs_color_reorder && request.mode == ColorMode::Color {
        caps.max_line_distance * dpi / caps.optical_resolution
    } else {
        0
    };

    Ok(ScanParameters {
        resolution: dpi,
        mode: request.mode,
        depth,
        rect: RectPx {
            left,
            top,
            width,
            height,
        },
        source: request.source,
        pixels_per_line: width,
        bytes_per_line,
        lines: height,
        line_distance,
    })
}
