//! Result assembly: turns stage outcomes and measurements into the response
//! objects handed back to callers.
//!
//! Assembly never fails. Absent measurements take fixed defaults so every
//! request yields a well-formed object.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{NaiveDateTime, NaiveTime};
use serde::Serialize;

use crate::matcher::greeting;
use crate::quality::GateFailure;

/// Reported match distance when no comparison took place.
pub const NO_COMPARISON_DISTANCE: f32 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Error,
}

/// Instrumented pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Processing,
    Brightness,
    Loading,
    Detection,
    Encoding,
    Liveness,
    Comparison,
}

impl Stage {
    pub const ALL: [Stage; 7] = [
        Stage::Processing,
        Stage::Brightness,
        Stage::Loading,
        Stage::Detection,
        Stage::Encoding,
        Stage::Liveness,
        Stage::Comparison,
    ];

    /// Field name in the JSON response.
    pub fn field_name(self) -> &'static str {
        match self {
            Stage::Processing => "processing_time",
            Stage::Brightness => "brightness_time",
            Stage::Loading => "loading_time",
            Stage::Detection => "detection_time",
            Stage::Encoding => "encoding_time",
            Stage::Liveness => "liveness_time",
            Stage::Comparison => "comparison_time",
        }
    }
}

/// Wall time per stage. Advisory only; nothing branches on it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageTimings {
    durations: [Duration; 7],
}

impl StageTimings {
    pub fn get(&self, stage: Stage) -> Duration {
        self.durations[stage as usize]
    }

    pub fn set(&mut self, stage: Stage, elapsed: Duration) {
        self.durations[stage as usize] = elapsed;
    }

    pub fn iter(&self) -> impl Iterator<Item = (Stage, Duration)> + '_ {
        Stage::ALL.into_iter().map(move |stage| (stage, self.get(stage)))
    }

    fn secs(&self, stage: Stage) -> f64 {
        self.get(stage).as_secs_f64()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

/// How a verification request ended.
#[derive(Debug, Clone, PartialEq)]
pub enum VerificationOutcome {
    ImageNotFound,
    StoreNotFound,
    ImageUnreadable,
    Gate(GateFailure),
    NoKnownIdentities,
    NoFaceDetected,
    NoMatch,
    Matched { id: i64, label: String },
    /// Unexpected failure in a collaborator, with its diagnostic.
    Fault(String),
}

/// Scores and timings collected along the way, whatever the outcome.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Measurements {
    pub brightness: f32,
    pub liveness: f32,
    /// Distance to the nearest identity, once a comparison ran.
    pub distance: Option<f32>,
    pub frame_size: FrameSize,
    pub timings: StageTimings,
}

/// Immutable outcome of one verification request.
#[derive(Debug, Clone, PartialEq)]
pub struct VerificationResult {
    pub status: Status,
    pub message: String,
    pub matched_id: Option<i64>,
    pub match_distance: f32,
    pub liveness_score: f32,
    pub brightness_score: f32,
    /// Attendance time, set only on success.
    pub timestamp: Option<NaiveTime>,
    pub stage_timings: StageTimings,
    pub resized_frame_size: FrameSize,
}

/// JSON shape of a [`VerificationResult`].
#[derive(Debug, Clone, Serialize)]
pub struct VerificationResponse {
    pub status: Status,
    pub message: String,
    pub attendance_time: Option<String>,
    pub light_threshold: f32,
    pub recognition_threshold: f32,
    pub liveness_variance: f32,
    pub id: Option<i64>,
    pub processing_time: f64,
    pub brightness_time: f64,
    pub loading_time: f64,
    pub detection_time: f64,
    pub encoding_time: f64,
    pub liveness_time: f64,
    pub comparison_time: f64,
    pub resized_frame_size: FrameSize,
}

impl VerificationResult {
    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }

    pub fn response(&self) -> VerificationResponse {
        let t = &self.stage_timings;
        VerificationResponse {
            status: self.status,
            message: self.message.clone(),
            attendance_time: self.timestamp.map(|at| at.format("%H:%M:%S").to_string()),
            light_threshold: self.brightness_score,
            recognition_threshold: self.match_distance,
            liveness_variance: self.liveness_score,
            id: self.matched_id,
            processing_time: t.secs(Stage::Processing),
            brightness_time: t.secs(Stage::Brightness),
            loading_time: t.secs(Stage::Loading),
            detection_time: t.secs(Stage::Detection),
            encoding_time: t.secs(Stage::Encoding),
            liveness_time: t.secs(Stage::Liveness),
            comparison_time: t.secs(Stage::Comparison),
            resized_frame_size: self.resized_frame_size,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.response())
    }
}

fn verification_message(outcome: &VerificationOutcome, at: NaiveTime) -> String {
    match outcome {
        VerificationOutcome::ImageNotFound => "Image file not found".into(),
        VerificationOutcome::StoreNotFound => "Face data file not found".into(),
        VerificationOutcome::ImageUnreadable => "Failed to load image".into(),
        VerificationOutcome::Gate(failure) => failure.message().into(),
        VerificationOutcome::NoKnownIdentities => "No known identities in the system".into(),
        VerificationOutcome::NoFaceDetected => "No face detected in the image".into(),
        VerificationOutcome::NoMatch => "No match found".into(),
        VerificationOutcome::Matched { label, .. } => greeting(label, at),
        VerificationOutcome::Fault(diagnostic) => format!("Error: {diagnostic}"),
    }
}

/// Compose the final result. `now` supplies the attendance time and greeting.
pub fn assemble_verification(
    outcome: VerificationOutcome,
    measurements: Measurements,
    now: NaiveDateTime,
) -> VerificationResult {
    let at = now.time();
    let message = verification_message(&outcome, at);
    let (status, matched_id, timestamp) = match outcome {
        VerificationOutcome::Matched { id, .. } => (Status::Success, Some(id), Some(at)),
        _ => (Status::Error, None, None),
    };

    VerificationResult {
        status,
        message,
        matched_id,
        match_distance: measurements.distance.unwrap_or(NO_COMPARISON_DISTANCE),
        liveness_score: measurements.liveness,
        brightness_score: measurements.brightness,
        timestamp,
        stage_timings: measurements.timings,
        resized_frame_size: measurements.frame_size,
    }
}

/// How an enrollment request ended.
#[derive(Debug, Clone, PartialEq)]
pub enum EnrollmentOutcome {
    /// No usable identity was supplied.
    InvalidId,
    /// Image path missing or zero bytes.
    ImageMissing(PathBuf),
    ImageUnreadable,
    NoFaceFound,
    Added { id: i64 },
    Updated { id: i64 },
    /// The photo does not look like the person already holding `id`.
    Mismatch { id: i64 },
    /// The face already belongs to `existing`.
    Duplicate { id: i64, existing: i64 },
    /// `id` is taken and the policy forbids updates.
    IdInUse { id: i64 },
    Fault(String),
}

/// JSON shape of an [`EnrollmentOutcome`].
#[derive(Debug, Clone, Serialize)]
pub struct EnrollmentResponse {
    pub message: String,
}

impl EnrollmentOutcome {
    /// Whether the store was changed.
    pub fn mutated_store(&self) -> bool {
        matches!(self, Self::Added { .. } | Self::Updated { .. })
    }

    pub fn message(&self) -> String {
        match self {
            Self::InvalidId => "Please enter a valid user ID.".into(),
            Self::ImageMissing(path) => format!("File not found or empty: {}", path.display()),
            Self::ImageUnreadable => "Failed to load image".into(),
            Self::NoFaceFound => "No faces found in the image.".into(),
            Self::Added { id } => format!("Added new user with ID {id}."),
            Self::Updated { id } => format!("Updated face for user ID {id}."),
            Self::Mismatch { id } => {
                format!("The new photo does not match the face for user ID {id}.")
            }
            Self::Duplicate { existing, .. } => {
                format!("The face is already enrolled under another ID: {existing}.")
            }
            Self::IdInUse { id } => format!("User ID {id} is already in use."),
            Self::Fault(diagnostic) => format!("Error: {diagnostic}"),
        }
    }

    pub fn response(&self) -> EnrollmentResponse {
        EnrollmentResponse {
            message: self.message(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 10, 19)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    #[test]
    fn test_defaults_for_absent_fields() {
        let r = assemble_verification(
            VerificationOutcome::ImageNotFound,
            Measurements::default(),
            at(9, 0, 0),
        );
        assert_eq!(r.status, Status::Error);
        assert_eq!(r.message, "Image file not found");
        assert_eq!(r.matched_id, None);
        assert_eq!(r.match_distance, NO_COMPARISON_DISTANCE);
        assert_eq!(r.timestamp, None);
        assert!(r.stage_timings.iter().all(|(_, d)| d == Duration::ZERO));
        assert_eq!(r.resized_frame_size, FrameSize::default());
    }

    #[test]
    fn test_matched_sets_time_and_greeting() {
        let m = Measurements {
            brightness: 120.0,
            liveness: 33.0,
            distance: Some(0.2),
            ..Default::default()
        };
        let r = assemble_verification(
            VerificationOutcome::Matched { id: 4, label: "alice".into() },
            m,
            at(14, 5, 9),
        );
        assert!(r.is_success());
        assert_eq!(r.matched_id, Some(4));
        assert_eq!(r.message, "Good Evening alice");
        assert_eq!(r.match_distance, 0.2);
        assert_eq!(r.response().attendance_time.as_deref(), Some("14:05:09"));
    }

    #[test]
    fn test_response_json_shape() {
        let mut timings = StageTimings::default();
        timings.set(Stage::Detection, Duration::from_millis(250));
        timings.set(Stage::Liveness, Duration::from_millis(2));
        let m = Measurements {
            brightness: 80.0,
            frame_size: FrameSize { width: 160, height: 120 },
            timings,
            ..Default::default()
        };
        let r = assemble_verification(VerificationOutcome::NoMatch, m, at(8, 0, 0));
        let v: serde_json::Value = serde_json::from_str(&r.to_json().unwrap()).unwrap();

        assert_eq!(v["status"], "error");
        assert_eq!(v["message"], "No match found");
        assert!(v["attendance_time"].is_null());
        assert!(v["id"].is_null());
        assert_eq!(v["light_threshold"], 80.0);
        assert_eq!(v["recognition_threshold"], 1.0);
        assert_eq!(v["detection_time"], 0.25);
        assert_eq!(v["liveness_time"], 0.002);
        assert_eq!(v["resized_frame_size"]["width"], 160);
        assert_eq!(v["resized_frame_size"]["height"], 120);
        for stage in Stage::ALL {
            assert!(v[stage.field_name()].is_number(), "{} missing", stage.field_name());
        }
    }

    #[test]
    fn test_fault_message() {
        let r = assemble_verification(
            VerificationOutcome::Fault("inference failed: boom".into()),
            Measurements::default(),
            at(8, 0, 0),
        );
        assert_eq!(r.message, "Error: inference failed: boom");
        assert_eq!(r.status, Status::Error);
    }

    #[test]
    fn test_enrollment_messages() {
        assert_eq!(
            EnrollmentOutcome::Duplicate { id: 2, existing: 1 }.message(),
            "The face is already enrolled under another ID: 1."
        );
        assert_eq!(EnrollmentOutcome::Added { id: 5 }.message(), "Added new user with ID 5.");
        assert!(EnrollmentOutcome::Updated { id: 5 }.mutated_store());
        assert!(!EnrollmentOutcome::Mismatch { id: 5 }.mutated_store());
        assert_eq!(
            serde_json::to_value(EnrollmentOutcome::IdInUse { id: 3 }.response()).unwrap(),
            serde_json::json!({ "message": "User ID 3 is already in use." })
        );
    }
}
