//! Five-point face alignment onto the ArcFace 112×112 template.

use image::{Rgb, RgbImage};

/// InsightFace reference landmarks for a 112×112 crop:
/// left eye, right eye, nose tip, left and right mouth corners.
const ARCFACE_TEMPLATE: [(f32, f32); 5] = [
    (38.2946, 51.6963),
    (73.5318, 51.5014),
    (56.0252, 71.7366),
    (41.5493, 92.3655),
    (70.7299, 92.2041),
];

pub const ALIGNED_SIZE: u32 = 112;

/// 2-D similarity transform: `x' = a·x − b·y + tx`, `y' = b·x + a·y + ty`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Similarity {
    pub a: f32,
    pub b: f32,
    pub tx: f32,
    pub ty: f32,
}

impl Similarity {
    pub const IDENTITY: Self = Self {
        a: 1.0,
        b: 0.0,
        tx: 0.0,
        ty: 0.0,
    };

    /// Least-squares similarity mapping `src` points onto `dst` points.
    ///
    /// Degenerate input (all source points coincident) yields the identity.
    pub fn fit(src: &[(f32, f32)], dst: &[(f32, f32)]) -> Self {
        let n = src.len().min(dst.len());
        if n == 0 {
            return Self::IDENTITY;
        }
        let mean = |pts: &[(f32, f32)]| {
            let (sx, sy) = pts[..n]
                .iter()
                .fold((0.0f32, 0.0f32), |(ax, ay), &(x, y)| (ax + x, ay + y));
            (sx / n as f32, sy / n as f32)
        };
        let (msx, msy) = mean(src);
        let (mdx, mdy) = mean(dst);

        let (mut dot, mut cross, mut norm) = (0.0f32, 0.0f32, 0.0f32);
        for (&(sx, sy), &(dx, dy)) in src.iter().zip(dst).take(n) {
            let (sx, sy) = (sx - msx, sy - msy);
            let (dx, dy) = (dx - mdx, dy - mdy);
            dot += sx * dx + sy * dy;
            cross += sx * dy - sy * dx;
            norm += sx * sx + sy * sy;
        }
        if norm < 1e-12 {
            return Self::IDENTITY;
        }

        let a = dot / norm;
        let b = cross / norm;
        Self {
            a,
            b,
            tx: mdx - (a * msx - b * msy),
            ty: mdy - (b * msx + a * msy),
        }
    }

    pub fn apply(&self, (x, y): (f32, f32)) -> (f32, f32) {
        (
            self.a * x - self.b * y + self.tx,
            self.b * x + self.a * y + self.ty,
        )
    }

    pub fn invert(&self) -> Option<Self> {
        let det = self.a * self.a + self.b * self.b;
        if det < 1e-12 {
            return None;
        }
        let a = self.a / det;
        let b = -self.b / det;
        Some(Self {
            a,
            b,
            tx: -(a * self.tx - b * self.ty),
            ty: -(b * self.tx + a * self.ty),
        })
    }
}

/// Warp the face described by `landmarks` (frame pixels) into an aligned
/// 112×112 RGB crop.
pub fn align_face(frame: &RgbImage, landmarks: &[(f32, f32); 5]) -> RgbImage {
    let forward = Similarity::fit(landmarks, &ARCFACE_TEMPLATE);
    let inverse = forward.invert().unwrap_or(Similarity::IDENTITY);

    RgbImage::from_fn(ALIGNED_SIZE, ALIGNED_SIZE, |x, y| {
        let (sx, sy) = inverse.apply((x as f32, y as f32));
        sample_bilinear(frame, sx, sy)
    })
}

/// Bilinear sample; points outside the frame read as black.
fn sample_bilinear(frame: &RgbImage, x: f32, y: f32) -> Rgb<u8> {
    let (w, h) = (frame.width() as f32, frame.height() as f32);
    if x < 0.0 || y < 0.0 || x > w - 1.0 || y > h - 1.0 {
        return Rgb([0, 0, 0]);
    }

    let (x0, y0) = (x.floor() as u32, y.floor() as u32);
    let x1 = (x0 + 1).min(frame.width() - 1);
    let y1 = (y0 + 1).min(frame.height() - 1);
    let (fx, fy) = (x - x0 as f32, y - y0 as f32);

    let (p00, p10) = (frame.get_pixel(x0, y0).0, frame.get_pixel(x1, y0).0);
    let (p01, p11) = (frame.get_pixel(x0, y1).0, frame.get_pixel(x1, y1).0);

    Rgb(std::array::from_fn(|c| {
        let top = p00[c] as f32 * (1.0 - fx) + p10[c] as f32 * fx;
        let bottom = p01[c] as f32 * (1.0 - fx) + p11[c] as f32 * fx;
        (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-3
    }

    #[test]
    fn test_fit_identity() {
        let t = Similarity::fit(&ARCFACE_TEMPLATE, &ARCFACE_TEMPLATE);
        assert!(close(t.a, 1.0) && close(t.b, 0.0));
        assert!(close(t.tx, 0.0) && close(t.ty, 0.0));
    }

    #[test]
    fn test_fit_scale_half() {
        let doubled = ARCFACE_TEMPLATE.map(|(x, y)| (x * 2.0, y * 2.0));
        let t = Similarity::fit(&doubled, &ARCFACE_TEMPLATE);
        assert!(close(t.a, 0.5) && close(t.b, 0.0));
    }

    #[test]
    fn test_fit_recovers_rotation() {
        let angle = 30f32.to_radians();
        let src = ARCFACE_TEMPLATE;
        let dst = src.map(|(x, y)| {
            (
                x * angle.cos() - y * angle.sin() + 10.0,
                x * angle.sin() + y * angle.cos() - 4.0,
            )
        });
        let t = Similarity::fit(&src, &dst);
        assert!(close(t.b.atan2(t.a), angle));
        for (s, d) in src.iter().zip(dst.iter()) {
            let (x, y) = t.apply(*s);
            assert!(close(x, d.0) && close(y, d.1));
        }
    }

    #[test]
    fn test_invert_round_trip() {
        let t = Similarity { a: 0.8, b: 0.3, tx: 5.0, ty: -2.0 };
        let inv = t.invert().unwrap();
        let (x, y) = inv.apply(t.apply((17.0, 42.0)));
        assert!(close(x, 17.0) && close(y, 42.0));
        assert!(Similarity { a: 0.0, b: 0.0, tx: 1.0, ty: 1.0 }.invert().is_none());
    }

    #[test]
    fn test_align_face_output_size() {
        let frame = RgbImage::from_pixel(640, 480, Rgb([90, 90, 90]));
        let lm = ARCFACE_TEMPLATE.map(|(x, y)| (x * 2.0 + 100.0, y * 2.0 + 50.0));
        let aligned = align_face(&frame, &lm);
        assert_eq!(aligned.dimensions(), (ALIGNED_SIZE, ALIGNED_SIZE));
        assert_eq!(aligned.get_pixel(56, 56).0, [90, 90, 90]);
    }

    #[test]
    fn test_align_face_moves_marked_landmark() {
        // Mark a red square at the left eye of a face at 2x scale.
        let lm = ARCFACE_TEMPLATE.map(|(x, y)| (x * 2.0 + 200.0, y * 2.0 + 100.0));
        let mut frame = RgbImage::new(640, 480);
        let (ex, ey) = (lm[0].0 as u32, lm[0].1 as u32);
        for y in ey - 4..=ey + 4 {
            for x in ex - 4..=ex + 4 {
                frame.put_pixel(x, y, Rgb([255, 0, 0]));
            }
        }

        let aligned = align_face(&frame, &lm);
        let (tx, ty) = (ARCFACE_TEMPLATE[0].0 as u32, ARCFACE_TEMPLATE[0].1 as u32);
        assert!(aligned.get_pixel(tx, ty).0[0] > 200);
        assert_eq!(aligned.get_pixel(100, 10).0, [0, 0, 0]);
    }
}
