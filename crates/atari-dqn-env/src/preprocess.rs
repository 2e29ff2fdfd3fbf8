//! Frame preprocessing helpers

use image::imageops::{self, FilterType};
use image::{GrayImage, RgbImage};
use ndarray::{Array2, Array3, Axis, Zip};
use std::path::Path;

use atari_dqn_core::{RLError, Result};

/// Luminance of an RGB screen using ITU-R 601 weights
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn to_grayscale(rgb: &Array3<u8>) -> Array2<u8> {
    rgb.map_axis(Axis(2), |px| {
        let luma = 0.299 * f32::from(px[0]) + 0.587 * f32::from(px[1]) + 0.114 * f32::from(px[2]);
        luma.round().clamp(0.0, 255.0) as u8
    })
}

/// Resize a gray frame to `height x width` with bilinear (triangle) filtering
pub fn resize(gray: &Array2<u8>, height: usize, width: usize) -> Result<Array2<u8>> {
    let (h, w) = gray.dim();
    let image = GrayImage::from_raw(to_u32(w)?, to_u32(h)?, gray.iter().copied().collect())
        .ok_or_else(|| RLError::Image(format!("frame buffer does not match {h}x{w}")))?;
    let resized = imageops::resize(&image, to_u32(width)?, to_u32(height)?, FilterType::Triangle);
    Array2::from_shape_vec((height, width), resized.into_raw())
        .map_err(|e| RLError::Image(e.to_string()))
}

/// Pixel-wise maximum of two frames, written into `acc`
pub fn max_into(acc: &mut Array3<u8>, other: &Array3<u8>) -> Result<()> {
    if acc.dim() != other.dim() {
        return Err(RLError::DimensionMismatch {
            expected: acc.len(),
            actual: other.len(),
        });
    }
    Zip::from(acc).and(other).for_each(|a, &b| *a = (*a).max(b));
    Ok(())
}

/// Write an RGB screen as a PNG file
pub fn save_png(rgb: &Array3<u8>, path: &Path) -> Result<()> {
    let (h, w, _) = rgb.dim();
    let image = RgbImage::from_raw(to_u32(w)?, to_u32(h)?, rgb.iter().copied().collect())
        .ok_or_else(|| RLError::Image(format!("screen buffer does not match {h}x{w}")))?;
    image.save(path).map_err(|e| RLError::Image(e.to_string()))
}

fn to_u32(n: usize) -> Result<u32> {
    u32::try_from(n).map_err(|_| RLError::Image(format!("dimension {n} too large")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    #[test]
    fn test_grayscale_weights() {
        let mut rgb = Array3::zeros((1, 3, 3));
        rgb[[0, 0, 0]] = 255;
        rgb[[0, 1, 1]] = 255;
        rgb.slice_mut(ndarray::s![0, 2, ..]).fill(200);
        let gray = to_grayscale(&rgb);
        assert_eq!(gray[[0, 0]], 76);
        assert_eq!(gray[[0, 1]], 150);
        assert_eq!(gray[[0, 2]], 200);
    }

    #[test]
    fn test_resize_uniform_frame() {
        let gray = Array2::from_elem((210, 160), 87u8);
        let small = resize(&gray, 84, 84).unwrap();
        assert_eq!(small.dim(), (84, 84));
        assert!(small.iter().all(|&p| p == 87));
    }

    #[test]
    fn test_max_into() {
        let mut a = Array3::from_elem((2, 2, 3), 10u8);
        let mut b = Array3::from_elem((2, 2, 3), 5u8);
        b[[1, 1, 2]] = 99;
        max_into(&mut a, &b).unwrap();
        assert_eq!(a[[0, 0, 0]], 10);
        assert_eq!(a[[1, 1, 2]], 99);
        assert!(max_into(&mut a, &Array3::zeros((1, 1, 3))).is_err());
    }

    #[test]
    fn test_save_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.png");
        save_png(&Array3::from_elem((4, 5, 3), 128u8), &path).unwrap();
        assert!(path.exists());
    }
}
