//! Off-screen RGBA surface and the drawing primitives the compositor uses.
//!
//! All drawing is straight-alpha source-over with nearest-neighbour
//! sampling, so identical inputs produce identical pixels.

use image::{imageops, Rgba, RgbaImage};

use framewright_media_source::Bitmap;

/// Axis-aligned rectangle in surface pixels, before rotation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn centered_at(cx: f32, cy: f32, width: f32, height: f32) -> Self {
        Self::new(cx - width / 2.0, cy - height / 2.0, width, height)
    }

    pub fn center(&self) -> (f32, f32) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// Largest rectangle with the source aspect ratio that fits inside
    /// `dst_w x dst_h`, centered.
    pub fn fit(src_w: u32, src_h: u32, dst_w: u32, dst_h: u32) -> Self {
        let scale = (dst_w as f32 / src_w.max(1) as f32).min(dst_h as f32 / src_h.max(1) as f32);
        let w = src_w as f32 * scale;
        let h = src_h as f32 * scale;
        Self::centered_at(dst_w as f32 / 2.0, dst_h as f32 / 2.0, w, h)
    }

    /// Smallest rectangle with the source aspect ratio that covers
    /// `dst_w x dst_h`, then scaled by `scale` about the center.
    pub fn cover(src_w: u32, src_h: u32, dst_w: u32, dst_h: u32, scale: f32) -> Self {
        let base = (dst_w as f32 / src_w.max(1) as f32).max(dst_h as f32 / src_h.max(1) as f32);
        let w = src_w as f32 * base * scale;
        let h = src_h as f32 * base * scale;
        Self::centered_at(dst_w as f32 / 2.0, dst_h as f32 / 2.0, w, h)
    }
}

/// A mutable RGBA8 canvas.
#[derive(Debug, Clone)]
pub struct Surface {
    image: RgbaImage,
}

impl Surface {
    /// Fully transparent surface.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            image: RgbaImage::new(width, height),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        self.image.get_pixel_checked(x, y).map(|p| p.0)
    }

    pub fn as_image(&self) -> &RgbaImage {
        &self.image
    }

    /// Replace every pixel with `rgba`.
    pub fn fill(&mut self, rgba: [u8; 4]) {
        for pixel in self.image.pixels_mut() {
            *pixel = Rgba(rgba);
        }
    }

    /// Blend a solid rectangle rotated `rotation_deg` about its center.
    pub fn fill_rect(&mut self, dest: Rect, rotation_deg: f32, rgba: [u8; 4], opacity: f32) {
        self.paint(dest, rotation_deg, opacity, |_, _| Some(rgba));
    }

    /// Blend a bitmap scaled into `dest` and rotated about its center.
    pub fn draw_bitmap(&mut self, bitmap: &Bitmap, dest: Rect, rotation_deg: f32, opacity: f32) {
        self.draw_rgba(
            bitmap.width(),
            bitmap.height(),
            bitmap.pixels(),
            dest,
            rotation_deg,
            opacity,
        );
    }

    /// Blend another surface scaled into `dest` and rotated about its center.
    pub fn draw_surface(&mut self, other: &Surface, dest: Rect, rotation_deg: f32, opacity: f32) {
        self.draw_rgba(
            other.width(),
            other.height(),
            other.image.as_raw(),
            dest,
            rotation_deg,
            opacity,
        );
    }

    /// Blend a raw RGBA buffer of `src_w x src_h` into `dest`.
    pub fn draw_rgba(
        &mut self,
        src_w: u32,
        src_h: u32,
        pixels: &[u8],
        dest: Rect,
        rotation_deg: f32,
        opacity: f32,
    ) {
        if src_w == 0 || src_h == 0 || pixels.len() < src_w as usize * src_h as usize * 4 {
            return;
        }
        self.paint(dest, rotation_deg, opacity, |u, v| {
            let sx = ((u * src_w as f32) as u32).min(src_w - 1);
            let sy = ((v * src_h as f32) as u32).min(src_h - 1);
            let i = (sy as usize * src_w as usize + sx as usize) * 4;
            Some([pixels[i], pixels[i + 1], pixels[i + 2], pixels[i + 3]])
        });
    }

    /// Blend `rgba` through an 8-bit coverage mask placed at `(x, y)`.
    pub fn draw_coverage(
        &mut self,
        mask_w: u32,
        mask_h: u32,
        coverage: &[u8],
        x: i64,
        y: i64,
        rgba: [u8; 4],
    ) {
        if coverage.len() < mask_w as usize * mask_h as usize {
            return;
        }
        for my in 0..mask_h {
            let py = y + my as i64;
            if py < 0 || py >= self.height() as i64 {
                continue;
            }
            for mx in 0..mask_w {
                let px = x + mx as i64;
                if px < 0 || px >= self.width() as i64 {
                    continue;
                }
                let value = coverage[my as usize * mask_w as usize + mx as usize];
                if value == 0 {
                    continue;
                }
                let dst = self.image.get_pixel_mut(px as u32, py as u32);
                blend(&mut dst.0, rgba, value as f32 / 255.0);
            }
        }
    }

    /// Gaussian-approximating blur of the whole surface.
    pub fn blur(&mut self, sigma: f32) {
        if sigma > 0.0 && sigma.is_finite() {
            self.image = imageops::fast_blur(&self.image, sigma);
        }
    }

    /// Immutable copy of the current pixels.
    pub fn snapshot(&self) -> Bitmap {
        Bitmap::from(self.image.clone())
    }

    pub fn into_bitmap(self) -> Bitmap {
        Bitmap::from(self.image)
    }

    /// Visit every surface pixel covered by the rotated `dest` and blend
    /// the color `sample(u, v)` returns for its normalized position.
    fn paint<F>(&mut self, dest: Rect, rotation_deg: f32, opacity: f32, mut sample: F)
    where
        F: FnMut(f32, f32) -> Option<[u8; 4]>,
    {
        let opacity = if opacity.is_finite() {
            opacity.clamp(0.0, 1.0)
        } else {
            0.0
        };
        if opacity <= 0.0 || !(dest.width > 0.0 && dest.height > 0.0) {
            return;
        }

        let (cx, cy) = dest.center();
        let theta = if rotation_deg.is_finite() {
            rotation_deg.to_radians()
        } else {
            0.0
        };
        let (sin, cos) = theta.sin_cos();
        let half_w = dest.width / 2.0;
        let half_h = dest.height / 2.0;

        // Bounding box of the rotated rectangle.
        let ext_x = half_w * cos.abs() + half_h * sin.abs();
        let ext_y = half_w * sin.abs() + half_h * cos.abs();
        let x0 = (cx - ext_x).floor().max(0.0) as u32;
        let y0 = (cy - ext_y).floor().max(0.0) as u32;
        let x1 = ((cx + ext_x).ceil().max(0.0) as u32).min(self.width());
        let y1 = ((cy + ext_y).ceil().max(0.0) as u32).min(self.height());

        for py in y0..y1 {
            for px in x0..x1 {
                let dx = px as f32 + 0.5 - cx;
                let dy = py as f32 + 0.5 - cy;
                // Inverse rotation back into the rectangle's frame.
                let lx = dx * cos + dy * sin + half_w;
                let ly = -dx * sin + dy * cos + half_h;
                if lx < 0.0 || ly < 0.0 || lx >= dest.width || ly >= dest.height {
                    continue;
                }
                if let Some(src) = sample(lx / dest.width, ly / dest.height) {
                    let dst = self.image.get_pixel_mut(px, py);
                    blend(&mut dst.0, src, opacity);
                }
            }
        }
    }
}

/// Straight-alpha source-over.
fn blend(dst: &mut [u8; 4], src: [u8; 4], opacity: f32) {
    let sa = src[3] as f32 / 255.0 * opacity;
    if sa <= 0.0 {
        return;
    }
    if sa >= 1.0 {
        *dst = [src[0], src[1], src[2], 255];
        return;
    }
    let da = dst[3] as f32 / 255.0;
    let out_a = sa + da * (1.0 - sa);
    for c in 0..3 {
        let value = (src[c] as f32 * sa + dst[c] as f32 * da * (1.0 - sa)) / out_a;
        dst[c] = value.round().clamp(0.0, 255.0) as u8;
    }
    dst[3] = (out_a * 255.0).round().clamp(0.0, 255.0) as u8;
}
