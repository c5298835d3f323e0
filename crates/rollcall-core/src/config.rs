use std::fmt;
use std::str::FromStr;

/// Minimum mean luminance (0–255) for a frame to be processed at all.
pub const DEFAULT_MIN_BRIGHTNESS: f32 = 50.0;
/// Maximum absolute eye-line rotation, in degrees.
pub const DEFAULT_MAX_EYE_ANGLE_DEG: f32 = 15.0;
/// Liveness scores at or below this are rejected. Permissive by default.
pub const DEFAULT_LIVENESS_THRESHOLD: f32 = 0.0;
/// A nearest neighbour strictly closer than this is the same person.
pub const DEFAULT_MATCH_MAX_DISTANCE: f32 = 0.45;
/// An update for an existing id is accepted at or below this distance
/// (similarity 0.6 or better).
pub const DEFAULT_UPDATE_MAX_DISTANCE: f32 = 0.40;
/// A face strictly closer than this to another id is a duplicate enrollment
/// (similarity above 0.55).
pub const DEFAULT_DUPLICATE_MAX_DISTANCE: f32 = 0.45;
/// Verification frames are downscaled by this factor before detection.
pub const DEFAULT_DETECTION_SCALE: f32 = 0.25;
/// Enrollment frames are downscaled by this factor before encoding.
pub const DEFAULT_ENROLLMENT_SCALE: f32 = 0.5;
/// Size of the scoring task pool.
pub const DEFAULT_WORKER_THREADS: usize = 2;

/// What enrollment does when the requested id is already enrolled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExistingIdPolicy {
    /// Replace the record if the new face matches the enrolled one.
    #[default]
    UpdateIfSimilar,
    /// Always refuse; ids are assigned once.
    Reject,
}

impl FromStr for ExistingIdPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "update" | "update-if-similar" => Ok(Self::UpdateIfSimilar),
            "reject" => Ok(Self::Reject),
            other => Err(format!("unknown existing-id policy {other:?} (expected \"update\" or \"reject\")")),
        }
    }
}

impl fmt::Display for ExistingIdPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UpdateIfSimilar => f.write_str("update"),
            Self::Reject => f.write_str("reject"),
        }
    }
}

/// Thresholds and sizing shared by verification and enrollment.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub min_brightness: f32,
    pub max_eye_angle_deg: f32,
    /// Used when a request does not supply its own liveness threshold.
    pub liveness_threshold: f32,
    pub match_max_distance: f32,
    pub update_max_distance: f32,
    pub duplicate_max_distance: f32,
    pub existing_id_policy: ExistingIdPolicy,
    pub detection_scale: f32,
    pub enrollment_scale: f32,
    pub worker_threads: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            min_brightness: DEFAULT_MIN_BRIGHTNESS,
            max_eye_angle_deg: DEFAULT_MAX_EYE_ANGLE_DEG,
            liveness_threshold: DEFAULT_LIVENESS_THRESHOLD,
            match_max_distance: DEFAULT_MATCH_MAX_DISTANCE,
            update_max_distance: DEFAULT_UPDATE_MAX_DISTANCE,
            duplicate_max_distance: DEFAULT_DUPLICATE_MAX_DISTANCE,
            existing_id_policy: ExistingIdPolicy::default(),
            detection_scale: DEFAULT_DETECTION_SCALE,
            enrollment_scale: DEFAULT_ENROLLMENT_SCALE,
            worker_threads: DEFAULT_WORKER_THREADS,
        }
    }
}

impl PipelineConfig {
    /// Defaults overlaid with `ROLLCALL_*` environment variables.
    ///
    /// Unset or unparsable variables keep their default.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            min_brightness: env_f32("ROLLCALL_MIN_BRIGHTNESS", d.min_brightness),
            max_eye_angle_deg: env_f32("ROLLCALL_MAX_EYE_ANGLE", d.max_eye_angle_deg),
            liveness_threshold: env_f32("ROLLCALL_LIVENESS_THRESHOLD", d.liveness_threshold),
            match_max_distance: env_f32("ROLLCALL_MATCH_MAX_DISTANCE", d.match_max_distance),
            update_max_distance: env_f32("ROLLCALL_UPDATE_MAX_DISTANCE", d.update_max_distance),
            duplicate_max_distance: env_f32("ROLLCALL_DUPLICATE_MAX_DISTANCE", d.duplicate_max_distance),
            existing_id_policy: std::env::var("ROLLCALL_EXISTING_ID_POLICY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(d.existing_id_policy),
            detection_scale: env_f32("ROLLCALL_DETECTION_SCALE", d.detection_scale),
            enrollment_scale: env_f32("ROLLCALL_ENROLLMENT_SCALE", d.enrollment_scale),
            worker_threads: env_usize("ROLLCALL_WORKER_THREADS", d.worker_threads).max(1),
        }
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
