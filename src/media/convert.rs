//! Pixel format conversion into planar 4:2:0.
//!
//! Every codec backend consumes a [`YuvPicture`]. The conversions here are pure
//! functions over borrowed buffers so the caller's frame is never retained.

use crate::error::{Error, Result};
use crate::media::types::{PixelFormat, RawVideoFrame};

/// An owned I420 picture. Chroma planes are `ceil(w/2) x ceil(h/2)`.
#[derive(Clone, PartialEq, Eq)]
pub struct YuvPicture {
    pub width: usize,
    pub height: usize,
    pub y: Vec<u8>,
    pub u: Vec<u8>,
    pub v: Vec<u8>,
}

impl YuvPicture {
    pub fn chroma_width(&self) -> usize {
        self.width.div_ceil(2)
    }

    pub fn chroma_height(&self) -> usize {
        self.height.div_ceil(2)
    }

    /// Luma sample at `(x, y)`, edge-extended outside the picture.
    #[inline]
    pub fn luma_at(&self, x: usize, y: usize) -> u8 {
        let x = x.min(self.width - 1);
        let y = y.min(self.height - 1);
        self.y[y * self.width + x]
    }

    /// Chroma samples `(u, v)` at chroma coordinates, edge-extended.
    #[inline]
    pub fn chroma_at(&self, x: usize, y: usize) -> (u8, u8) {
        let cw = self.chroma_width();
        let x = x.min(cw - 1);
        let y = y.min(self.chroma_height() - 1);
        (self.u[y * cw + x], self.v[y * cw + x])
    }
}

impl std::fmt::Debug for YuvPicture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("YuvPicture")
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

/// Convert any supported raw frame into an I420 picture.
pub fn to_i420(frame: &RawVideoFrame<'_>) -> Result<YuvPicture> {
    if frame.width == 0 || frame.height == 0 {
        return Err(Error::Encode(format!(
            "invalid frame size {}x{}",
            frame.width, frame.height
        )));
    }
    let expected = frame.format.frame_size(frame.width, frame.height);
    if frame.data.len() < expected {
        return Err(Error::Encode(format!(
            "{:?} buffer too small: {} bytes for {}x{} (need {})",
            frame.format,
            frame.data.len(),
            frame.width,
            frame.height,
            expected
        )));
    }

    let (w, h) = (frame.width as usize, frame.height as usize);
    Ok(match frame.format {
        PixelFormat::Bgra => packed_rgb_to_i420(frame.data, w, h, [2, 1, 0]),
        PixelFormat::Rgba => packed_rgb_to_i420(frame.data, w, h, [0, 1, 2]),
        PixelFormat::Nv12 => nv12_to_i420(frame.data, w, h),
        PixelFormat::I420 => {
            let (cw, ch) = (w.div_ceil(2), h.div_ceil(2));
            let luma = w * h;
            YuvPicture {
                width: w,
                height: h,
                y: frame.data[..luma].to_vec(),
                u: frame.data[luma..luma + cw * ch].to_vec(),
                v: frame.data[luma + cw * ch..luma + 2 * cw * ch].to_vec(),
            }
        }
    })
}

/// BT.601 limited range. `order` gives the byte offsets of R, G and B in a pixel.
fn packed_rgb_to_i420(data: &[u8], w: usize, h: usize, order: [usize; 3]) -> YuvPicture {
    let (cw, ch) = (w.div_ceil(2), h.div_ceil(2));
    let mut y_plane = Vec::with_capacity(w * h);
    let mut u_plane = vec![0u8; cw * ch];
    let mut v_plane = vec![0u8; cw * ch];

    let rgb = |x: usize, y: usize| -> (i32, i32, i32) {
        let p = (y * w + x) * 4;
        (
            data[p + order[0]] as i32,
            data[p + order[1]] as i32,
            data[p + order[2]] as i32,
        )
    };

    for y in 0..h {
        for x in 0..w {
            let (r, g, b) = rgb(x, y);
            y_plane.push((((66 * r + 129 * g + 25 * b + 128) >> 8) + 16) as u8);
        }
    }

    for cy in 0..ch {
        for cx in 0..cw {
            let (mut r, mut g, mut b, mut n) = (0, 0, 0, 0);
            for y in (cy * 2)..(cy * 2 + 2).min(h) {
                for x in (cx * 2)..(cx * 2 + 2).min(w) {
                    let (pr, pg, pb) = rgb(x, y);
                    r += pr;
                    g += pg;
                    b += pb;
                    n += 1;
                }
            }
            let (r, g, b) = (r / n, g / n, b / n);
            u_plane[cy * cw + cx] = (((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128) as u8;
            v_plane[cy * cw + cx] = (((112 * r - 94 * g - 18 * b + 128) >> 8) + 128) as u8;
        }
    }

    YuvPicture {
        width: w,
        height: h,
        y: y_plane,
        u: u_plane,
        v: v_plane,
    }
}

fn nv12_to_i420(data: &[u8], w: usize, h: usize) -> YuvPicture {
    let (cw, ch) = (w.div_ceil(2), h.div_ceil(2));
    let luma = w * h;
    let uv = &data[luma..luma + 2 * cw * ch];
    let mut u = Vec::with_capacity(cw * ch);
    let mut v = Vec::with_capacity(cw * ch);
    for pair in uv.chunks_exact(2) {
        u.push(pair[0]);
        v.push(pair[1]);
    }
    YuvPicture {
        width: w,
        height: h,
        y: data[..luma].to_vec(),
        u,
        v,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bgra_primaries() {
        // one white and one black 2x1 strip, stacked into a 2x2 frame
        let mut data = Vec::new();
        data.extend_from_slice(&[255, 255, 255, 255, 255, 255, 255, 255]);
        data.extend_from_slice(&[0, 0, 0, 255, 0, 0, 0, 255]);
        let frame = RawVideoFrame::new(2, 2, PixelFormat::Bgra, &data, 0);
        let pic = to_i420(&frame).unwrap();

        assert_eq!(pic.y, vec![235, 235, 16, 16]);
        assert_eq!(pic.u, vec![128]);
        assert_eq!(pic.v, vec![128]);
    }

    #[test]
    fn test_bgra_and_rgba_channel_order() {
        let blue_bgra = [255u8, 0, 0, 255];
        let blue_rgba = [0u8, 0, 255, 255];
        let a = to_i420(&RawVideoFrame::new(1, 1, PixelFormat::Bgra, &blue_bgra, 0)).unwrap();
        let b = to_i420(&RawVideoFrame::new(1, 1, PixelFormat::Rgba, &blue_rgba, 0)).unwrap();
        assert_eq!(a, b);
        // blue pushes U up and V down
        assert!(a.u[0] > 200);
        assert!(a.v[0] < 128);
    }

    #[test]
    fn test_nv12_deinterleave() {
        let mut data = vec![10u8; 4 * 2];
        data.extend_from_slice(&[1, 2, 3, 4]);
        let pic = to_i420(&RawVideoFrame::new(4, 2, PixelFormat::Nv12, &data, 0)).unwrap();
        assert_eq!(pic.y, vec![10; 8]);
        assert_eq!(pic.u, vec![1, 3]);
        assert_eq!(pic.v, vec![2, 4]);
    }

    #[test]
    fn test_short_buffer_rejected() {
        let data = vec![0u8; 10];
        let frame = RawVideoFrame::new(640, 480, PixelFormat::Bgra, &data, 0);
        assert!(matches!(to_i420(&frame), Err(Error::Encode(_))));
    }

    #[test]
    fn test_edge_extension() {
        let data = vec![0u8, 50, 100, 150, 200, 250, 128, 128, 128, 128];
        let pic = to_i420(&RawVideoFrame::new(3, 2, PixelFormat::I420, &data, 0)).unwrap();
        assert_eq!(pic.luma_at(5, 0), 100);
        assert_eq!(pic.luma_at(0, 9), 150);
        assert_eq!(pic.chroma_at(7, 7), (128, 128));
    }
}
