use serde::{Deserialize, Serialize};
use std::borrow::Cow;

use crate::error::{FrameCutError, FrameCutResult};
use crate::Color;

/// Sample depth a picture was produced at.
///
/// Samples are always stored in `u16` planes; an 8-bit picture simply never
/// exceeds 255. Compositing happens at 16 bits, see [`Picture::to_depth`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BitDepth {
    Eight,
    Sixteen,
}

impl BitDepth {
    /// Largest sample value representable at this depth.
    pub fn max_value(&self) -> u16 {
        match self {
            BitDepth::Eight => 255,
            BitDepth::Sixteen => 65535,
        }
    }

    pub fn bits(&self) -> u8 {
        match self {
            BitDepth::Eight => 8,
            BitDepth::Sixteen => 16,
        }
    }
}

/// One color plane of a picture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    R,
    G,
    B,
}

/// A planar pixel buffer: one `u16` plane per color channel plus an optional
/// `f32` alpha plane in `0.0..=1.0`. A picture without alpha is opaque.
#[derive(Debug, Clone, PartialEq)]
pub struct Picture {
    pub width: u32,
    pub height: u32,
    pub depth: BitDepth,
    pub r: Vec<u16>,
    pub g: Vec<u16>,
    pub b: Vec<u16>,
    pub a: Option<Vec<f32>>,
}

impl Picture {
    /// Create an opaque black picture.
    pub fn new(width: u32, height: u32, depth: BitDepth) -> Self {
        let n = (width as usize) * (height as usize);
        Self {
            width,
            height,
            depth,
            r: vec![0; n],
            g: vec![0; n],
            b: vec![0; n],
            a: None,
        }
    }

    /// Create a 16-bit picture filled with one color. The alpha plane exists
    /// only when the color carries an explicit alpha.
    pub fn solid(width: u32, height: u32, color: &Color) -> Self {
        let n = (width as usize) * (height as usize);
        Self {
            width,
            height,
            depth: BitDepth::Sixteen,
            r: vec![color.r; n],
            g: vec![color.g; n],
            b: vec![color.b; n],
            a: color.a.map(|a| vec![a; n]),
        }
    }

    /// Build a picture from interleaved 8-bit RGBA bytes.
    pub fn from_rgba8(width: u32, height: u32, data: &[u8]) -> FrameCutResult<Self> {
        let n = (width as usize) * (height as usize);
        if data.len() != n * 4 {
            return Err(FrameCutError::invalid(format!(
                "expected {} RGBA bytes for {}x{}, got {}",
                n * 4,
                width,
                height,
                data.len()
            )));
        }
        let mut pic = Picture::new(width, height, BitDepth::Eight);
        let mut alpha = Vec::with_capacity(n);
        let mut opaque = true;
        for (i, px) in data.chunks_exact(4).enumerate() {
            pic.r[i] = px[0] as u16;
            pic.g[i] = px[1] as u16;
            pic.b[i] = px[2] as u16;
            opaque &= px[3] == 255;
            alpha.push(px[3] as f32 / 255.0);
        }
        if !opaque {
            pic.a = Some(alpha);
        }
        Ok(pic)
    }

    /// Build a picture from interleaved 16-bit RGBA samples.
    pub fn from_rgba16(width: u32, height: u32, data: &[u16]) -> FrameCutResult<Self> {
        let n = (width as usize) * (height as usize);
        if data.len() != n * 4 {
            return Err(FrameCutError::invalid(format!(
                "expected {} RGBA samples for {}x{}, got {}",
                n * 4,
                width,
                height,
                data.len()
            )));
        }
        let mut pic = Picture::new(width, height, BitDepth::Sixteen);
        let mut alpha = Vec::with_capacity(n);
        let mut opaque = true;
        for (i, px) in data.chunks_exact(4).enumerate() {
            pic.r[i] = px[0];
            pic.g[i] = px[1];
            pic.b[i] = px[2];
            opaque &= px[3] == u16::MAX;
            alpha.push(px[3] as f32 / 65535.0);
        }
        if !opaque {
            pic.a = Some(alpha);
        }
        Ok(pic)
    }

    /// Total number of pixels.
    pub fn pixel_count(&self) -> usize {
        (self.width as usize) * (self.height as usize)
    }

    pub fn has_alpha(&self) -> bool {
        self.a.is_some()
    }

    /// Check that every plane holds exactly one sample per pixel.
    pub fn validate(&self) -> FrameCutResult<()> {
        let n = self.pixel_count();
        let alpha_ok = self.a.as_ref().map_or(true, |a| a.len() == n);
        if self.r.len() != n || self.g.len() != n || self.b.len() != n || !alpha_ok {
            return Err(FrameCutError::invalid(format!(
                "picture planes do not match {}x{}",
                self.width, self.height
            )));
        }
        Ok(())
    }

    pub fn plane(&self, channel: Channel) -> &[u16] {
        match channel {
            Channel::R => &self.r,
            Channel::G => &self.g,
            Channel::B => &self.b,
        }
    }

    pub fn plane_mut(&mut self, channel: Channel) -> &mut Vec<u16> {
        match channel {
            Channel::R => &mut self.r,
            Channel::G => &mut self.g,
            Channel::B => &mut self.b,
        }
    }

    /// One color plane widened to `f32`, the operand format of the accelerators.
    pub fn plane_f32(&self, channel: Channel) -> Vec<f32> {
        self.plane(channel).iter().map(|&v| v as f32).collect()
    }

    /// The alpha plane, or a plane of ones when the picture is opaque.
    pub fn alpha_or_opaque(&self) -> Cow<'_, [f32]> {
        match &self.a {
            Some(a) => Cow::Borrowed(a.as_slice()),
            None => Cow::Owned(vec![1.0; self.pixel_count()]),
        }
    }

    /// Replace a color plane from accelerator output, clamping into the
    /// depth's range and truncating toward zero.
    pub fn set_plane_f32(&mut self, channel: Channel, values: &[f32]) -> FrameCutResult<()> {
        if values.len() != self.pixel_count() {
            return Err(FrameCutError::invalid(format!(
                "plane has {} samples, picture has {} pixels",
                values.len(),
                self.pixel_count()
            )));
        }
        let max = self.depth.max_value() as f32;
        let plane = self.plane_mut(channel);
        for (dst, &v) in plane.iter_mut().zip(values) {
            *dst = v.clamp(0.0, max) as u16;
        }
        Ok(())
    }

    /// Pixel at `(x, y)` as `([r, g, b], alpha)`. Returns None if out of bounds.
    pub fn get_pixel(&self, x: u32, y: u32) -> Option<([u16; 3], f32)> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = (y as usize) * (self.width as usize) + (x as usize);
        let alpha = self.a.as_ref().map_or(1.0, |a| a[i]);
        Some(([self.r[i], self.g[i], self.b[i]], alpha))
    }

    /// Set the pixel at `(x, y)`. No-op if out of bounds. Creates the alpha
    /// plane on demand when a non-opaque alpha is written.
    pub fn set_pixel(&mut self, x: u32, y: u32, rgb: [u16; 3], alpha: f32) {
        if x >= self.width || y >= self.height {
            return;
        }
        let i = (y as usize) * (self.width as usize) + (x as usize);
        self.r[i] = rgb[0];
        self.g[i] = rgb[1];
        self.b[i] = rgb[2];
        if alpha < 1.0 || self.a.is_some() {
            self.alpha_mut()[i] = alpha.clamp(0.0, 1.0);
        }
    }

    /// Mutable alpha plane, materializing an opaque plane if there was none.
    pub fn alpha_mut(&mut self) -> &mut Vec<f32> {
        let n = self.pixel_count();
        self.a.get_or_insert_with(|| vec![1.0; n])
    }

    /// Convert samples to another depth. Widening scales `0..=255` onto
    /// `0..=65535`; narrowing rounds to the nearest 8-bit value.
    pub fn to_depth(mut self, depth: BitDepth) -> Picture {
        match (self.depth, depth) {
            (BitDepth::Eight, BitDepth::Sixteen) => {
                for plane in [&mut self.r, &mut self.g, &mut self.b] {
                    plane.iter_mut().for_each(|v| *v = Color::widen(*v as u8));
                }
            }
            (BitDepth::Sixteen, BitDepth::Eight) => {
                for plane in [&mut self.r, &mut self.g, &mut self.b] {
                    plane.iter_mut().for_each(|v| *v = Color::narrow(*v) as u16);
                }
            }
            _ => {}
        }
        self.depth = depth;
        self
    }

    /// Nearest-neighbour resize. Returns `self` untouched when the size already matches.
    pub fn resize(self, width: u32, height: u32) -> Picture {
        if self.width == width && self.height == height {
            return self;
        }
        let n = (width as usize) * (height as usize);
        let mut out = Picture {
            width,
            height,
            depth: self.depth,
            r: Vec::with_capacity(n),
            g: Vec::with_capacity(n),
            b: Vec::with_capacity(n),
            a: self.a.as_ref().map(|_| Vec::with_capacity(n)),
        };
        if self.width == 0 || self.height == 0 {
            return Picture::new(width, height, self.depth);
        }
        for y in 0..height {
            let sy = ((y as u64 * self.height as u64) / height as u64) as usize;
            for x in 0..width {
                let sx = ((x as u64 * self.width as u64) / width as u64) as usize;
                let si = sy * self.width as usize + sx;
                out.r.push(self.r[si]);
                out.g.push(self.g[si]);
                out.b.push(self.b[si]);
                if let (Some(dst), Some(src)) = (out.a.as_mut(), self.a.as_ref()) {
                    dst.push(src[si]);
                }
            }
        }
        out
    }

    /// Copy out the rectangle `(x, y, width, height)`, clipped to the picture bounds.
    pub fn crop(&self, x: u32, y: u32, width: u32, height: u32) -> Picture {
        let x0 = x.min(self.width);
        let y0 = y.min(self.height);
        let w = width.min(self.width - x0);
        let h = height.min(self.height - y0);
        let mut out = Picture::new(w, h, self.depth);
        if self.a.is_some() {
            out.a = Some(Vec::with_capacity((w as usize) * (h as usize)));
        }
        let mut di = 0;
        for row in y0..y0 + h {
            for col in x0..x0 + w {
                let si = (row as usize) * (self.width as usize) + col as usize;
                out.r[di] = self.r[si];
                out.g[di] = self.g[si];
                out.b[di] = self.b[si];
                if let (Some(dst), Some(src)) = (out.a.as_mut(), self.a.as_ref()) {
                    dst.push(src[si]);
                }
                di += 1;
            }
        }
        out
    }

    /// Interleaved 8-bit RGB bytes with alpha dropped.
    pub fn to_rgb8(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.pixel_count() * 3);
        for i in 0..self.pixel_count() {
            match self.depth {
                BitDepth::Eight => {
                    out.extend_from_slice(&[self.r[i] as u8, self.g[i] as u8, self.b[i] as u8]);
                }
                BitDepth::Sixteen => out.extend_from_slice(&[
                    Color::narrow(self.r[i]),
                    Color::narrow(self.g[i]),
                    Color::narrow(self.b[i]),
                ]),
            }
        }
        out
    }
}
