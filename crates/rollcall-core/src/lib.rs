//! rollcall-core: face verification and enrollment for attendance check-in.
//!
//! A photo is verified through a fixed gate order (brightness, detection,
//! liveness, pose) and then matched against an [`EncodingStore`] of enrolled
//! identities. Enrollment adds or refreshes identities while refusing faces
//! that already belong to someone else. Face detection and embedding sit
//! behind the [`FaceAnalyzer`] trait; [`OnnxFaceAnalyzer`] runs SCRFD and
//! ArcFace on ONNX Runtime.

pub mod alignment;
pub mod analyzer;
pub mod config;
pub mod detector;
pub mod enrollment;
pub mod kdtree;
pub mod matcher;
pub mod quality;
pub mod recognizer;
pub mod result;
pub mod store;
pub mod types;
pub mod verify;

pub use analyzer::{AnalyzerError, FaceAnalyzer, OnnxFaceAnalyzer};
pub use config::{ExistingIdPolicy, PipelineConfig};
pub use enrollment::Enroller;
pub use matcher::{Clock, FixedClock, SystemClock};
pub use result::{EnrollmentOutcome, Status, VerificationOutcome, VerificationResult};
pub use store::{EncodingStore, StoreError};
pub use types::{BoundingBox, Embedding, IdentityRecord};
pub use verify::{PipelineError, Verifier};
