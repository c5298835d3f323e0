//! Enrollment with duplicate-face protection.
//!
//! After every successful enrollment two things hold: each id maps to exactly
//! one record, and no two different ids carry embeddings closer than
//! `duplicate_max_distance`.

use std::path::Path;

use crate::analyzer::FaceAnalyzer;
use crate::config::{ExistingIdPolicy, PipelineConfig};
use crate::result::EnrollmentOutcome;
use crate::store::{EncodingStore, StoreError};
use crate::types::Embedding;
use crate::verify::downscale;

/// Input problems that end an enrollment before any model or store work.
pub fn check_inputs(image_path: &Path, user_id: Option<i64>) -> Option<EnrollmentOutcome> {
    if user_id.is_none() {
        return Some(EnrollmentOutcome::InvalidId);
    }
    let readable = std::fs::metadata(image_path)
        .map(|meta| meta.is_file() && meta.len() > 0)
        .unwrap_or(false);
    if !readable {
        return Some(EnrollmentOutcome::ImageMissing(image_path.to_path_buf()));
    }
    None
}

/// What enrollment will do with a freshly computed embedding.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Plan {
    Insert,
    Update,
    Mismatch { distance: f32 },
    Duplicate { existing: i64, distance: f32 },
}

pub struct Enroller {
    config: PipelineConfig,
}

impl Enroller {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    /// Enroll the photo at `image_path` as `user_id` into the store file at
    /// `store_path`, saving it when the store changed.
    pub fn update_face_encodings(
        &self,
        image_path: &Path,
        store_path: &Path,
        user_id: Option<i64>,
        analyzer: &mut dyn FaceAnalyzer,
    ) -> EnrollmentOutcome {
        if user_id.is_none() {
            return EnrollmentOutcome::InvalidId;
        }

        let mut store = match EncodingStore::open(store_path) {
            Ok(store) => store,
            Err(err) => {
                tracing::error!(path = %store_path.display(), error = %err, "cannot open encoding store");
                return EnrollmentOutcome::Fault(err.to_string());
            }
        };
        tracing::debug!(records = store.len(), "encoding store opened");

        let outcome = self.enroll_image(&mut store, image_path, user_id, analyzer);

        if outcome.mutated_store() {
            if let Err(err) = store.save(store_path) {
                tracing::error!(path = %store_path.display(), error = %err, "cannot save encoding store");
                return EnrollmentOutcome::Fault(err.to_string());
            }
            tracing::info!(path = %store_path.display(), records = store.len(), "encoding store saved");
        }

        outcome
    }

    /// Enroll into an in-memory store. The caller persists it.
    pub fn enroll_image(
        &self,
        store: &mut EncodingStore,
        image_path: &Path,
        user_id: Option<i64>,
        analyzer: &mut dyn FaceAnalyzer,
    ) -> EnrollmentOutcome {
        if let Some(rejected) = check_inputs(image_path, user_id) {
            return rejected;
        }
        let Some(id) = user_id else {
            return EnrollmentOutcome::InvalidId;
        };

        if self.config.existing_id_policy == ExistingIdPolicy::Reject && store.get(id).is_some() {
            tracing::info!(id, "enroll: id already in use");
            return EnrollmentOutcome::IdInUse { id };
        }

        let frame = match image::open(image_path) {
            Ok(decoded) => decoded.to_rgb8(),
            Err(err) => {
                tracing::warn!(path = %image_path.display(), error = %err, "enroll: image decode failed");
                return EnrollmentOutcome::ImageUnreadable;
            }
        };
        let (small, _) = downscale(&frame, self.config.enrollment_scale);

        let faces = match analyzer.detect(&small) {
            Ok(faces) => faces,
            Err(err) => return fault(err),
        };
        let Some(face) = faces.first() else {
            return EnrollmentOutcome::NoFaceFound;
        };
        tracing::info!(confidence = face.confidence, count = faces.len(), "enroll: best face selected");

        let embedding = match analyzer.embed(&small, face) {
            Ok(embedding) => embedding,
            Err(err) => return fault(err),
        };

        let plan = match self.plan(store, id, &embedding) {
            Ok(plan) => plan,
            Err(err) => return fault(err),
        };
        tracing::debug!(id, ?plan, "enroll: decision");

        match plan {
            Plan::Mismatch { distance } => {
                tracing::info!(id, distance, "enroll: photo does not match enrolled face");
                EnrollmentOutcome::Mismatch { id }
            }
            Plan::Duplicate { existing, distance } => {
                tracing::info!(id, existing, distance, "enroll: face already enrolled");
                EnrollmentOutcome::Duplicate { id, existing }
            }
            Plan::Insert | Plan::Update => {
                let label = label_for(image_path);
                if let Err(err) = store.upsert(id, &label, embedding) {
                    return fault(err);
                }
                tracing::info!(id, label = %label, "enroll: record stored");
                if plan == Plan::Update {
                    EnrollmentOutcome::Updated { id }
                } else {
                    EnrollmentOutcome::Added { id }
                }
            }
        }
    }

    fn plan(
        &self,
        store: &EncodingStore,
        id: i64,
        embedding: &Embedding,
    ) -> Result<Plan, StoreError> {
        let cfg = &self.config;

        let planned = if let Some(existing) = store.get(id) {
            store.check_dimension(embedding)?;
            let distance = existing.embedding.distance(embedding);
            if distance > cfg.update_max_distance {
                return Ok(Plan::Mismatch { distance });
            }
            Plan::Update
        } else {
            Plan::Insert
        };

        // Both paths must keep other identities out of duplicate range.
        if let Some(nearest) = store.nearest_excluding(embedding, id)? {
            if nearest.distance < cfg.duplicate_max_distance {
                return Ok(Plan::Duplicate {
                    existing: nearest.record.id,
                    distance: nearest.distance,
                });
            }
        }

        Ok(planned)
    }
}

fn label_for(image_path: &Path) -> String {
    image_path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn fault(err: impl std::fmt::Display) -> EnrollmentOutcome {
    tracing::error!(error = %err, "enrollment fault");
    EnrollmentOutcome::Fault(err.to_string())
}
