//! Display geometry and capture agent parameters

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Physical screen orientation as reported by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Orientation {
    #[default]
    Portrait,
    Landscape,
    ReversePortrait,
    ReverseLandscape,
}

impl Orientation {
    /// Parse a rotation code in `0..=3`
    pub fn from_code(code: u32) -> Result<Self> {
        match code {
            0 => Ok(Orientation::Portrait),
            1 => Ok(Orientation::Landscape),
            2 => Ok(Orientation::ReversePortrait),
            3 => Ok(Orientation::ReverseLandscape),
            _ => Err(Error::InvalidState(format!("invalid rotation code: {}", code))),
        }
    }

    /// Parse a rotation expressed in degrees (0, 90, 180 or 270)
    pub fn from_degrees(degrees: u32) -> Result<Self> {
        match degrees {
            0 => Ok(Orientation::Portrait),
            90 => Ok(Orientation::Landscape),
            180 => Ok(Orientation::ReversePortrait),
            270 => Ok(Orientation::ReverseLandscape),
            _ => Err(Error::InvalidState(format!("invalid rotation degrees: {}", degrees))),
        }
    }

    /// Rotation code in `0..=3`
    pub fn code(&self) -> u32 {
        match self {
            Orientation::Portrait => 0,
            Orientation::Landscape => 1,
            Orientation::ReversePortrait => 2,
            Orientation::ReverseLandscape => 3,
        }
    }

    /// Rotation in degrees
    pub fn degrees(&self) -> u32 {
        self.code() * 90
    }
}

impl fmt::Display for Orientation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}°", self.degrees())
    }
}

/// Display metadata supplied by the device metadata provider
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DisplayInfo {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Screen density (dpi scale factor)
    pub density: f32,
    /// Current orientation
    pub orientation: Orientation,
}

impl DisplayInfo {
    pub fn new(width: u32, height: u32, density: f32, orientation: Orientation) -> Self {
        Self {
            width,
            height,
            density,
            orientation,
        }
    }

    /// The same display with width and height swapped so that `width <= height`
    pub fn portrait(&self) -> Self {
        let (width, height) = if self.width > self.height {
            (self.height, self.width)
        } else {
            (self.width, self.height)
        };
        Self {
            width,
            height,
            ..*self
        }
    }
}

/// Projection parameters passed to the capture agent with `-P`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureParams {
    pub real_width: u32,
    pub real_height: u32,
    pub virtual_width: u32,
    pub virtual_height: u32,
    pub rotation: Orientation,
}

impl CaptureParams {
    /// Build parameters from display metadata.
    ///
    /// The display is normalized to its portrait baseline first; rotation is
    /// carried separately and never folded into the dimensions.
    pub fn new(info: &DisplayInfo, rotation: Orientation, scale: f32) -> Result<Self> {
        if info.width == 0 || info.height == 0 {
            return Err(Error::InvalidState(format!(
                "display has no size: {}x{}",
                info.width, info.height
            )));
        }
        if !(scale > 0.0 && scale <= 1.0) {
            return Err(Error::Config(format!("scale must be in (0, 1], got {}", scale)));
        }

        let base = info.portrait();
        let virtual_width = ((base.width as f32 * scale).round() as u32).max(1);
        let virtual_height = ((base.height as f32 * scale).round() as u32).max(1);

        Ok(Self {
            real_width: base.width,
            real_height: base.height,
            virtual_width,
            virtual_height,
            rotation,
        })
    }
}

impl fmt::Display for CaptureParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{}@{}x{}/{}",
            self.real_width,
            self.real_height,
            self.virtual_width,
            self.virtual_height,
            self.rotation.degrees()
        )
    }
}
