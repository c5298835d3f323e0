//! Quality gates applied before any matching is attempted.
//!
//! Each gate is a pure scoring function plus a pass/fail check. The scores
//! are cheap and side-effect free, so the pipeline runs them on the worker
//! pool; the checks are applied afterwards in a fixed order.

use image::RgbImage;

use crate::types::BoundingBox;

/// Why a frame was turned away before matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateFailure {
    /// Mean luminance below the minimum.
    LowLight,
    /// Texture too flat for a live face (print or screen).
    Liveness,
    /// Eye line rotated beyond the maximum angle, or no eyes to measure.
    Pose,
}

impl GateFailure {
    pub fn message(self) -> &'static str {
        match self {
            GateFailure::LowLight => "Please increase the light",
            GateFailure::Liveness => "Liveness check failed: fake face detected",
            GateFailure::Pose => "Face angle is too extreme for recognition",
        }
    }
}

/// Per-image scores gathered while gating. Not persisted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QualityAssessment {
    pub brightness: f32,
    pub faces: Vec<FaceQuality>,
}

/// Scores for one detected face.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceQuality {
    pub liveness: f32,
    /// Eye-line angle in degrees, `None` when the face has no landmarks.
    pub eye_angle: Option<f32>,
}

/// Luma of one RGB pixel with BT.601 weights, rounded to 8 bits.
fn luma(rgb: &image::Rgb<u8>) -> u8 {
    let [r, g, b] = rgb.0;
    (0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32)
        .round()
        .clamp(0.0, 255.0) as u8
}

/// Mean luminance of the whole frame on a 0–255 scale.
pub fn mean_luminance(frame: &RgbImage) -> f32 {
    let count = frame.width() as u64 * frame.height() as u64;
    if count == 0 {
        return 0.0;
    }
    let sum: u64 = frame.pixels().map(|p| luma(p) as u64).sum();
    (sum as f64 / count as f64) as f32
}

/// In-plane rotation of the line from the left eye to the right eye, in degrees.
pub fn eye_line_angle(left_eye: (f32, f32), right_eye: (f32, f32)) -> f32 {
    let dx = right_eye.0 - left_eye.0;
    let dy = right_eye.1 - left_eye.1;
    dy.atan2(dx).to_degrees()
}

/// Eye-line angle of a detected face, if it carries landmarks.
pub fn face_angle(face: &BoundingBox) -> Option<f32> {
    face.eyes().map(|(left, right)| eye_line_angle(left, right))
}

/// Pixel rectangle `(x, y, width, height)` inside a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Upper half of a face box (eyes and forehead), clipped to the frame.
///
/// Returns `None` if nothing of it lies inside the frame.
pub fn upper_face_region(face: &BoundingBox, frame_width: u32, frame_height: u32) -> Option<Region> {
    let clip = |v: f32, max: u32| -> u32 { v.max(0.0).min(max as f32) as u32 };

    let left = clip(face.x, frame_width);
    let right = clip(face.x + face.width, frame_width);
    let top = clip(face.y, frame_height);
    let bottom = clip(face.y + (face.height / 2.0).trunc(), frame_height);

    if right <= left || bottom <= top {
        return None;
    }
    Some(Region {
        x: left,
        y: top,
        width: right - left,
        height: bottom - top,
    })
}

/// Reflect an out-of-range index back inside `0..n` without repeating the edge.
fn reflect101(i: i64, n: i64) -> usize {
    if n == 1 {
        return 0;
    }
    let mut i = i;
    while i < 0 || i >= n {
        i = if i < 0 { -i } else { 2 * n - 2 - i };
    }
    i as usize
}

/// Variance of the 4-neighbour Laplacian over a grayscale patch.
///
/// `gray` is row-major `width * height`. Borders reflect without repeating the
/// edge pixel. Returns 0 for an empty patch.
pub fn laplacian_variance(gray: &[u8], width: usize, height: usize) -> f32 {
    let n = width * height;
    if n == 0 || gray.len() < n {
        return 0.0;
    }

    let (w, h) = (width as i64, height as i64);
    let at = |x: i64, y: i64| gray[reflect101(y, h) * width + reflect101(x, w)] as f64;

    let mut sum = 0.0f64;
    let mut sum_sq = 0.0f64;
    for y in 0..h {
        for x in 0..w {
            let lap = at(x - 1, y) + at(x + 1, y) + at(x, y - 1) + at(x, y + 1) - 4.0 * at(x, y);
            sum += lap;
            sum_sq += lap * lap;
        }
    }

    let mean = sum / n as f64;
    ((sum_sq / n as f64) - mean * mean).max(0.0) as f32
}

/// Liveness score of a face: Laplacian variance over its upper half.
///
/// Printed photos and screens flatten the fine texture around the eyes and
/// forehead, which pulls this score down.
pub fn liveness_score(frame: &RgbImage, face: &BoundingBox) -> f32 {
    let Some(region) = upper_face_region(face, frame.width(), frame.height()) else {
        return 0.0;
    };

    let mut gray = Vec::with_capacity(region.width as usize * region.height as usize);
    for y in region.y..region.y + region.height {
        for x in region.x..region.x + region.width {
            gray.push(luma(frame.get_pixel(x, y)));
        }
    }
    laplacian_variance(&gray, region.width as usize, region.height as usize)
}

pub fn brightness_gate(brightness: f32, min_brightness: f32) -> Result<(), GateFailure> {
    if brightness < min_brightness {
        Err(GateFailure::LowLight)
    } else {
        Ok(())
    }
}

/// A score at or below the threshold is treated as a presentation attack.
pub fn liveness_gate(score: f32, threshold: f32) -> Result<(), GateFailure> {
    if score <= threshold {
        Err(GateFailure::Liveness)
    } else {
        Ok(())
    }
}

/// Faces outside the angle band are rejected, never corrected.
///
/// A face without eye landmarks has no measurable angle and is treated as
/// level. A NaN angle rejects.
pub fn pose_gate(angle: Option<f32>, max_angle_deg: f32) -> Result<(), GateFailure> {
    let angle = angle.unwrap_or(0.0);
    if angle.abs() <= max_angle_deg {
        Ok(())
    } else {
        Err(GateFailure::Pose)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn face(x: f32, y: f32, w: f32, h: f32) -> BoundingBox {
        BoundingBox {
            x, y, width: w, height: h,
            confidence: 0.9, landmarks: None,
        }
    }

    #[test]
    fn test_mean_luminance_uniform() {
        let frame = RgbImage::from_pixel(8, 8, Rgb([100, 100, 100]));
        assert!((mean_luminance(&frame) - 100.0).abs() < 1e-4);
    }

    #[test]
    fn test_mean_luminance_weights_green() {
        let green = RgbImage::from_pixel(4, 4, Rgb([0, 255, 0]));
        let blue = RgbImage::from_pixel(4, 4, Rgb([0, 0, 255]));
        assert!((mean_luminance(&green) - 150.0).abs() < 1.0);
        assert!((mean_luminance(&blue) - 29.0).abs() < 1.0);
    }

    #[test]
    fn test_mean_luminance_empty() {
        assert_eq!(mean_luminance(&RgbImage::new(0, 0)), 0.0);
    }

    #[test]
    fn test_eye_line_angle() {
        assert!(eye_line_angle((0.0, 0.0), (10.0, 0.0)).abs() < 1e-6);
        assert!((eye_line_angle((0.0, 0.0), (10.0, 10.0)) - 45.0).abs() < 1e-4);
        assert!((eye_line_angle((0.0, 10.0), (10.0, 0.0)) + 45.0).abs() < 1e-4);
    }

    #[test]
    fn test_face_angle_needs_landmarks() {
        assert!(face_angle(&face(0.0, 0.0, 10.0, 10.0)).is_none());
        let mut f = face(0.0, 0.0, 10.0, 10.0);
        f.landmarks = Some([(2.0, 4.0), (8.0, 4.0), (5.0, 6.0), (3.0, 8.0), (7.0, 8.0)]);
        assert_eq!(face_angle(&f), Some(0.0));
    }

    #[test]
    fn test_upper_face_region_clips() {
        let r = upper_face_region(&face(10.0, 20.0, 40.0, 60.0), 100, 100).unwrap();
        assert_eq!(r, Region { x: 10, y: 20, width: 40, height: 30 });

        let r = upper_face_region(&face(-5.0, -5.0, 20.0, 20.0), 100, 100).unwrap();
        assert_eq!(r, Region { x: 0, y: 0, width: 15, height: 5 });

        assert!(upper_face_region(&face(200.0, 200.0, 10.0, 10.0), 100, 100).is_none());
        assert!(upper_face_region(&face(10.0, 10.0, 10.0, 1.0), 100, 100).is_none());
    }

    #[test]
    fn test_laplacian_variance_flat_is_zero() {
        let gray = vec![90u8; 16 * 16];
        assert_eq!(laplacian_variance(&gray, 16, 16), 0.0);
    }

    #[test]
    fn test_laplacian_variance_checkerboard_is_high() {
        let (w, h) = (16usize, 16usize);
        let gray: Vec<u8> = (0..w * h)
            .map(|i| if (i % w + i / w) % 2 == 0 { 0 } else { 255 })
            .collect();
        // Every Laplacian response is ±1020 with reflected borders, so the
        // variance is 1020^2.
        let v = laplacian_variance(&gray, w, h);
        assert!((v - 1_040_400.0).abs() < 1.0, "variance = {v}");
    }

    #[test]
    fn test_laplacian_variance_empty() {
        assert_eq!(laplacian_variance(&[], 0, 0), 0.0);
    }

    #[test]
    fn test_liveness_score_textured_beats_flat() {
        let flat = RgbImage::from_pixel(64, 64, Rgb([120, 120, 120]));
        let textured = RgbImage::from_fn(64, 64, |x, y| {
            let v = ((x * 37 + y * 91) % 256) as u8;
            Rgb([v, v, v])
        });
        let f = face(8.0, 8.0, 48.0, 48.0);
        assert_eq!(liveness_score(&flat, &f), 0.0);
        assert!(liveness_score(&textured, &f) > 100.0);
    }

    #[test]
    fn test_liveness_score_outside_frame() {
        let frame = RgbImage::from_pixel(16, 16, Rgb([200, 10, 10]));
        assert_eq!(liveness_score(&frame, &face(50.0, 50.0, 10.0, 10.0)), 0.0);
    }

    #[test]
    fn test_reflect101() {
        assert_eq!(reflect101(-1, 5), 1);
        assert_eq!(reflect101(5, 5), 3);
        assert_eq!(reflect101(2, 5), 2);
        assert_eq!(reflect101(-1, 1), 0);
    }

    #[test]
    fn test_gates() {
        assert_eq!(brightness_gate(49.9, 50.0), Err(GateFailure::LowLight));
        assert_eq!(brightness_gate(50.0, 50.0), Ok(()));

        assert_eq!(liveness_gate(0.0, 0.0), Err(GateFailure::Liveness));
        assert_eq!(liveness_gate(0.1, 0.0), Ok(()));

        assert_eq!(pose_gate(Some(15.0), 15.0), Ok(()));
        assert_eq!(pose_gate(Some(-15.5), 15.0), Err(GateFailure::Pose));
        assert_eq!(pose_gate(Some(f32::NAN), 15.0), Err(GateFailure::Pose));
        assert_eq!(pose_gate(None, 15.0), Ok(()));
        assert_eq!(pose_gate(None, 0.0), Ok(()));
    }
}
