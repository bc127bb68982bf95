// Conversions between `image` buffers and OpenCV matrices.
//
// Frames stay RGB on both sides; callers that hand a Mat to OpenCV video I/O
// convert to BGR themselves.

use crate::error::{MediaError, MediaResult};
use crate::pipeline::types::{Frame, MaskBuffer};
use opencv::core::{self, Mat, Scalar};
use opencv::prelude::*;

/// Copies a frame into a continuous `CV_8UC3` matrix.
pub fn frame_to_mat(frame: &Frame) -> MediaResult<Mat> {
    let (w, h) = frame.dimensions();
    let mut mat =
        Mat::new_rows_cols_with_default(h as i32, w as i32, core::CV_8UC3, Scalar::all(0.0))?;
    mat.data_bytes_mut()?.copy_from_slice(frame.as_raw());
    Ok(mat)
}

/// Copies a `CV_8UC3` matrix back into a frame.
pub fn mat_to_frame(mat: &Mat) -> MediaResult<Frame> {
    let size = mat.size()?;
    let (w, h) = (size.width as u32, size.height as u32);
    if mat.typ() != core::CV_8UC3 {
        return Err(MediaError::UnsupportedFormat(format!(
            "expected an 8-bit 3-channel matrix, got type {}",
            mat.typ()
        )));
    }
    let data = continuous_bytes(mat)?;
    Frame::from_raw(w, h, data).ok_or(MediaError::DimensionMismatch {
        expected: (w, h),
        actual: (size.width as u32, size.height as u32),
    })
}

/// Copies a mask into a `CV_8UC1` matrix holding 0/1.
pub fn mask_to_mat(mask: &MaskBuffer) -> MediaResult<Mat> {
    let (w, h) = mask.dimensions();
    let mut mat =
        Mat::new_rows_cols_with_default(h as i32, w as i32, core::CV_8UC1, Scalar::all(0.0))?;
    mat.data_bytes_mut()?.copy_from_slice(mask.as_raw());
    Ok(mat)
}

/// Copies a `CV_8UC1` matrix into a mask; any non-zero value is set.
pub fn mat_to_mask(mat: &Mat) -> MediaResult<MaskBuffer> {
    let size = mat.size()?;
    let (w, h) = (size.width as u32, size.height as u32);
    if mat.typ() != core::CV_8UC1 {
        return Err(MediaError::UnsupportedFormat(format!(
            "expected an 8-bit single-channel matrix, got type {}",
            mat.typ()
        )));
    }
    let data = continuous_bytes(mat)?;
    MaskBuffer::from_raw(w, h, data).ok_or(MediaError::DimensionMismatch {
        expected: (w, h),
        actual: (size.width as u32, size.height as u32),
    })
}

fn continuous_bytes(mat: &Mat) -> MediaResult<Vec<u8>> {
    if mat.is_continuous() {
        return Ok(mat.data_bytes()?.to_vec());
    }
    let mut copy = Mat::default();
    mat.copy_to(&mut copy)?;
    Ok(copy.data_bytes()?.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::testing::random_frame;
    use crate::pipeline::types::BoundingBox;

    #[test]
    fn test_frame_survives_mat_conversion() {
        let frame = random_frame(13, 7, 21);
        let mat = frame_to_mat(&frame).unwrap();
        assert_eq!((mat.cols(), mat.rows()), (13, 7));
        assert_eq!(mat_to_frame(&mat).unwrap(), frame);
    }

    #[test]
    fn test_mask_survives_mat_conversion() {
        let mask = MaskBuffer::from_box(9, 11, BoundingBox::new(2, 3, 6, 8));
        let mat = mask_to_mat(&mask).unwrap();
        assert_eq!(mat_to_mask(&mat).unwrap(), mask);
    }

    #[test]
    fn test_wrong_channel_count_rejected() {
        let mask = MaskBuffer::new(4, 4);
        let mat = mask_to_mat(&mask).unwrap();
        assert!(matches!(
            mat_to_frame(&mat),
            Err(MediaError::UnsupportedFormat(_))
        ));
    }
}
