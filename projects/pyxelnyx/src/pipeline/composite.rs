// Mask compositing: merge per-instance masks and blend a transform into a frame.

use crate::error::{MediaError, MediaResult};
use crate::pipeline::cv::{frame_to_mat, mat_to_frame};
use crate::pipeline::types::{Frame, MaskBuffer};
use opencv::core::{Mat, Size};
use opencv::imgproc;

/// What detected regions are replaced with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaskTransform {
    /// `passes` sequential Gaussian passes with an odd `kernel_size`.
    Blur { kernel_size: u32, passes: u32 },
    /// Solid zero fill.
    Black,
}

impl MaskTransform {
    /// Blur transform. The kernel size is forced odd and passes to at least one.
    pub fn blur(kernel_size: u32, passes: u32) -> Self {
        MaskTransform::Blur {
            kernel_size: force_odd(kernel_size),
            passes: passes.max(1),
        }
    }

    /// Applies the transform to a whole buffer, returning a new one.
    pub fn apply(&self, frame: &Frame) -> MediaResult<Frame> {
        match *self {
            MaskTransform::Blur {
                kernel_size,
                passes,
            } => {
                let mut out = gaussian_blur(frame, kernel_size)?;
                for _ in 1..passes {
                    out = gaussian_blur(&out, kernel_size)?;
                }
                Ok(out)
            }
            MaskTransform::Black => Ok(Frame::new(frame.width(), frame.height())),
        }
    }
}

/// Rounds an even size up to the next odd one.
pub fn force_odd(size: u32) -> u32 {
    if size % 2 == 0 {
        size + 1
    } else {
        size
    }
}

/// Elementwise OR (max) of all masks; `None` when there are none.
pub fn combine(masks: &[MaskBuffer]) -> MediaResult<Option<MaskBuffer>> {
    let Some((first, rest)) = masks.split_first() else {
        return Ok(None);
    };

    let mut combined = first.clone();
    for mask in rest {
        if mask.dimensions() != combined.dimensions() {
            return Err(MediaError::DimensionMismatch {
                expected: combined.dimensions(),
                actual: mask.dimensions(),
            });
        }
        for (dst, &src) in combined.as_raw_mut().iter_mut().zip(mask.as_raw()) {
            *dst = (*dst).max(src);
        }
    }

    Ok(Some(combined))
}

/// `out = frame * (1 - mask) + transform(frame) * mask`, per channel in f32,
/// rounded and clamped to 0..=255.
///
/// The transform is not invoked when the mask is empty.
pub fn blend<F>(frame: &Frame, mask: &MaskBuffer, transform: F) -> MediaResult<Frame>
where
    F: FnOnce(&Frame) -> MediaResult<Frame>,
{
    if mask.dimensions() != frame.dimensions() {
        return Err(MediaError::DimensionMismatch {
            expected: frame.dimensions(),
            actual: mask.dimensions(),
        });
    }

    if mask.coverage() == 0 {
        return Ok(frame.clone());
    }

    let transformed = transform(frame)?;
    if transformed.dimensions() != frame.dimensions() {
        return Err(MediaError::DimensionMismatch {
            expected: frame.dimensions(),
            actual: transformed.dimensions(),
        });
    }

    let mut out = frame.clone();
    let alphas = mask.as_raw();
    for ((dst, src), &a) in out
        .chunks_exact_mut(3)
        .zip(transformed.as_raw().chunks_exact(3))
        .zip(alphas)
    {
        let alpha = a as f32;
        for c in 0..3 {
            let v = dst[c] as f32 * (1.0 - alpha) + src[c] as f32 * alpha;
            dst[c] = v.round().clamp(0.0, 255.0) as u8;
        }
    }

    Ok(out)
}

/// Full-frame Gaussian blur. Sigma is derived from the kernel size and the
/// border mode is reflect-101 (OpenCV's default).
pub fn gaussian_blur(frame: &Frame, kernel_size: u32) -> MediaResult<Frame> {
    let (width, height) = frame.dimensions();
    if kernel_size <= 1 || width == 0 || height == 0 {
        return Ok(frame.clone());
    }

    let k = force_odd(kernel_size) as i32;
    let src = frame_to_mat(frame)?;
    let mut dst = Mat::default();
    imgproc::gaussian_blur_def(&src, &mut dst, Size::new(k, k), 0.0)?;
    mat_to_frame(&dst)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::testing::random_frame;
    use crate::pipeline::types::BoundingBox;

    #[test]
    fn test_combine_empty_and_single() {
        assert!(combine(&[]).unwrap().is_none());

        let m = MaskBuffer::from_box(20, 20, BoundingBox::new(2, 3, 9, 12));
        assert_eq!(combine(std::slice::from_ref(&m)).unwrap(), Some(m));
    }

    #[test]
    fn test_combine_is_order_independent() {
        let a = MaskBuffer::from_box(30, 30, BoundingBox::new(0, 0, 10, 10));
        let b = MaskBuffer::from_box(30, 30, BoundingBox::new(5, 5, 20, 20));
        let c = MaskBuffer::from_box(30, 30, BoundingBox::new(25, 0, 30, 30));

        let reference = combine(&[a.clone(), b.clone(), c.clone()]).unwrap().unwrap();
        let permutations = [
            [a.clone(), c.clone(), b.clone()],
            [b.clone(), a.clone(), c.clone()],
            [b.clone(), c.clone(), a.clone()],
            [c.clone(), a.clone(), b.clone()],
            [c.clone(), b.clone(), a.clone()],
        ];
        for p in permutations {
            assert_eq!(combine(&p).unwrap().unwrap(), reference);
        }
        assert!(a.is_subset_of(&reference));
        assert!(b.is_subset_of(&reference));
        assert!(c.is_subset_of(&reference));
    }

    #[test]
    fn test_combine_rejects_mismatched_sizes() {
        let a = MaskBuffer::new(10, 10);
        let b = MaskBuffer::new(10, 11);
        assert!(matches!(
            combine(&[a, b]),
            Err(MediaError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_blend_zero_mask_is_identity() {
        let frame = random_frame(40, 30, 1);
        let mask = MaskBuffer::new(40, 30);
        let out = blend(&frame, &mask, |f| MaskTransform::Black.apply(f)).unwrap();
        assert_eq!(out.as_raw(), frame.as_raw());
    }

    #[test]
    fn test_blend_full_mask_equals_transform() {
        let frame = random_frame(40, 30, 2);
        let mask = MaskBuffer::from_fn(40, 30, |_, _| true);
        let transform = MaskTransform::blur(7, 2);

        let expected = transform.apply(&frame).unwrap();
        let out = blend(&frame, &mask, |f| transform.apply(f)).unwrap();
        for (a, b) in out.as_raw().iter().zip(expected.as_raw()) {
            assert!((*a as i16 - *b as i16).abs() <= 1);
        }
    }

    #[test]
    fn test_blend_hard_edges() {
        let frame = random_frame(20, 20, 3);
        let mask = MaskBuffer::from_box(20, 20, BoundingBox::new(0, 0, 10, 20));
        let out = blend(&frame, &mask, |f| MaskTransform::Black.apply(f)).unwrap();
        for (x, y, p) in out.enumerate_pixels() {
            if x < 10 {
                assert_eq!(p.0, [0, 0, 0]);
            } else {
                assert_eq!(p, frame.get_pixel(x, y));
            }
        }
    }

    #[test]
    fn test_blend_rejects_mismatched_mask() {
        let frame = random_frame(20, 20, 4);
        let mask = MaskBuffer::new(21, 20);
        assert!(blend(&frame, &mask, |f| Ok(f.clone())).is_err());
    }

    #[test]
    fn test_force_odd() {
        assert_eq!(force_odd(150), 151);
        assert_eq!(force_odd(151), 151);
        assert_eq!(force_odd(0), 1);
        match MaskTransform::blur(100, 0) {
            MaskTransform::Blur {
                kernel_size,
                passes,
            } => {
                assert_eq!(kernel_size, 101);
                assert_eq!(passes, 1);
            }
            MaskTransform::Black => unreachable!(),
        }
    }

    #[test]
    fn test_blur_preserves_flat_color() {
        let frame = Frame::from_pixel(16, 12, image::Rgb([120, 30, 200]));
        let out = gaussian_blur(&frame, 9).unwrap();
        assert_eq!(out.as_raw(), frame.as_raw());
    }

    #[test]
    fn test_blur_kernel_larger_than_frame() {
        let frame = random_frame(5, 4, 5);
        let out = MaskTransform::blur(151, 3).apply(&frame).unwrap();
        assert_eq!(out.dimensions(), (5, 4));
    }

    #[test]
    fn test_blur_smooths_impulse() {
        let mut frame = Frame::new(21, 21);
        frame.put_pixel(10, 10, image::Rgb([255, 255, 255]));
        let out = gaussian_blur(&frame, 5).unwrap();
        assert!(out.get_pixel(10, 10)[0] < 255);
        assert!(out.get_pixel(11, 10)[0] > 0);
        assert_eq!(out.get_pixel(0, 0)[0], 0);
        // symmetric around the impulse
        assert_eq!(out.get_pixel(9, 10), out.get_pixel(11, 10));
    }

    #[test]
    fn test_blur_reflects_at_borders() {
        // A bright left column stays brightest at the edge under reflect-101.
        let frame = Frame::from_fn(9, 5, |x, _| {
            if x == 0 {
                image::Rgb([200, 200, 200])
            } else {
                image::Rgb([0, 0, 0])
            }
        });
        let out = gaussian_blur(&frame, 3).unwrap();
        assert!(out.get_pixel(0, 2)[0] > out.get_pixel(1, 2)[0]);
        assert!(out.get_pixel(1, 2)[0] > 0);
        assert_eq!(out.get_pixel(4, 2)[0], 0);
    }

    #[test]
    fn test_even_kernel_rounded_up() {
        let frame = random_frame(12, 12, 8);
        assert_eq!(gaussian_blur(&frame, 4).unwrap(), gaussian_blur(&frame, 5).unwrap());
    }

    #[test]
    fn test_black_ignores_content() {
        let frame = random_frame(6, 3, 9);
        let out = MaskTransform::Black.apply(&frame).unwrap();
        assert!(out.pixels().all(|p| p.0 == [0, 0, 0]));
    }
}
