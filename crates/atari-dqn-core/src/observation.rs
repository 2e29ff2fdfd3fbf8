//! Observation representations
//!
//! Atari observations are screen frames. Preprocessed gray frames are shared
//! behind [`Arc`] so consecutive stacked observations (and the replay memory
//! holding them) reference the same pixel buffers instead of copying them.

use ndarray::{Array2, Array3};
use std::fmt::Debug;
use std::sync::Arc;

/// Trait for observations from an environment
pub trait Observation: Clone + Debug + Send + Sync {
    /// Get the shape of the observation
    fn shape(&self) -> Vec<usize>;

    /// Append the observation to `out` with every value scaled into `[0, 1]`
    fn write_normalized(&self, out: &mut Vec<f32>);

    /// Number of scalar values in the observation
    fn numel(&self) -> usize {
        self.shape().iter().product()
    }
}

/// Raw RGB screen, laid out as height x width x 3
#[derive(Debug, Clone, PartialEq)]
pub struct RgbFrame(pub Array3<u8>);

impl RgbFrame {
    /// Height in pixels
    #[must_use]
    pub fn height(&self) -> usize {
        self.0.dim().0
    }

    /// Width in pixels
    #[must_use]
    pub fn width(&self) -> usize {
        self.0.dim().1
    }
}

impl Observation for RgbFrame {
    fn shape(&self) -> Vec<usize> {
        self.0.shape().to_vec()
    }

    fn write_normalized(&self, out: &mut Vec<f32>) {
        out.extend(self.0.iter().map(|&p| f32::from(p) / 255.0));
    }
}

/// Single-channel frame, laid out as height x width
#[derive(Debug, Clone, PartialEq)]
pub struct GrayFrame(pub Arc<Array2<u8>>);

impl GrayFrame {
    /// Wrap a pixel array
    #[must_use]
    pub fn new(pixels: Array2<u8>) -> Self {
        Self(Arc::new(pixels))
    }

    /// Borrow the pixels
    #[must_use]
    pub fn pixels(&self) -> &Array2<u8> {
        &self.0
    }
}

impl Observation for GrayFrame {
    fn shape(&self) -> Vec<usize> {
        self.0.shape().to_vec()
    }

    fn write_normalized(&self, out: &mut Vec<f32>) {
        out.extend(self.0.iter().map(|&p| f32::from(p) / 255.0));
    }
}

/// The last `k` gray frames, oldest first
#[derive(Debug, Clone, PartialEq)]
pub struct StackedFrames {
    frames: Vec<GrayFrame>,
}

impl StackedFrames {
    /// Build a stack from frames ordered oldest first.
    ///
    /// Returns an error when the stack is empty or the frames disagree in shape.
    pub fn new(frames: Vec<GrayFrame>) -> crate::Result<Self> {
        let first = frames
            .first()
            .ok_or_else(|| crate::RLError::InvalidConfig("empty frame stack".into()))?;
        let dim = first.pixels().dim();
        if let Some(bad) = frames.iter().find(|f| f.pixels().dim() != dim) {
            return Err(crate::RLError::DimensionMismatch {
                expected: dim.0 * dim.1,
                actual: bad.pixels().len(),
            });
        }
        Ok(Self { frames })
    }

    /// Frames in the stack, oldest first
    #[must_use]
    pub fn frames(&self) -> &[GrayFrame] {
        &self.frames
    }

    /// Number of stacked frames
    #[must_use]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Always false for a constructed stack
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl Observation for StackedFrames {
    fn shape(&self) -> Vec<usize> {
        let (h, w) = self.frames[0].pixels().dim();
        vec![self.frames.len(), h, w]
    }

    fn write_normalized(&self, out: &mut Vec<f32>) {
        for frame in &self.frames {
            frame.write_normalized(out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn gray(value: u8) -> GrayFrame {
        GrayFrame::new(Array2::from_elem((2, 3), value))
    }

    #[test]
    fn test_stack_shape_and_order() {
        let stack = StackedFrames::new(vec![gray(0), gray(51), gray(255)]).unwrap();
        assert_eq!(stack.shape(), vec![3, 2, 3]);

        let mut values = Vec::new();
        stack.write_normalized(&mut values);
        assert_eq!(values.len(), 18);
        assert_relative_eq!(values[0], 0.0);
        assert_relative_eq!(values[6], 0.2);
        assert_relative_eq!(values[17], 1.0);
        assert_eq!(stack.frames()[1].pixels()[[1, 2]], 51);
    }

    #[test]
    fn test_stack_shares_frames() {
        let frame = gray(9);
        let stack = StackedFrames::new(vec![frame.clone(), frame.clone()]).unwrap();
        assert!(Arc::ptr_eq(&stack.frames()[0].0, &frame.0));
    }

    #[test]
    fn test_stack_rejects_mismatched_frames() {
        let other = GrayFrame::new(Array2::zeros((4, 4)));
        assert!(StackedFrames::new(vec![gray(1), other]).is_err());
        assert!(StackedFrames::new(Vec::new()).is_err());
    }
}
