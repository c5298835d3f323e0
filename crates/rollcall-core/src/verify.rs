//! Verification pipeline for one attendance photo.
//!
//! Gates run in a fixed order: brightness, detection, liveness, pose, match.
//! The first failure ends the request. Independent scoring work is paired on a
//! small rayon pool and joined before its result is consulted.

use std::path::Path;
use std::time::{Duration, Instant};

use image::imageops::{self, FilterType};
use image::RgbImage;
use thiserror::Error;

use crate::analyzer::{AnalyzerError, FaceAnalyzer};
use crate::config::PipelineConfig;
use crate::matcher::{Clock, MatchDecision, Matcher, NearestNeighborMatcher, SystemClock};
use crate::quality::{self, FaceQuality, QualityAssessment};
use crate::result::{
    assemble_verification, FrameSize, Measurements, Stage, VerificationOutcome, VerificationResult,
};
use crate::store::{EncodingStore, StoreError};

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("face analyzer: {0}")]
    Analyzer(#[from] AnalyzerError),
    #[error("encoding store: {0}")]
    Store(#[from] StoreError),
    #[error("failed to build worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

/// Runs verification requests against a borrowed [`EncodingStore`].
pub struct Verifier {
    config: PipelineConfig,
    pool: rayon::ThreadPool,
    matcher: NearestNeighborMatcher,
    clock: Box<dyn Clock>,
}

impl Verifier {
    pub fn new(config: PipelineConfig) -> Result<Self, PipelineError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.worker_threads.max(1))
            .thread_name(|i| format!("rollcall-score-{i}"))
            .build()?;
        let matcher = NearestNeighborMatcher {
            max_distance: config.match_max_distance,
        };
        Ok(Self {
            config,
            pool,
            matcher,
            clock: Box::new(SystemClock),
        })
    }

    /// Replace the wall clock used for attendance time and greetings.
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Verify the photo at `image_path` against the store file at `store_path`.
    ///
    /// Never fails: every outcome, including internal faults, is reported in
    /// the returned result.
    pub fn process_image(
        &self,
        image_path: &Path,
        store_path: &Path,
        analyzer: &mut dyn FaceAnalyzer,
        liveness_threshold: f32,
    ) -> VerificationResult {
        let started = Instant::now();
        let mut m = Measurements::default();

        let outcome = match check_inputs(image_path, store_path) {
            Some(rejected) => rejected,
            None => match image::open(image_path) {
                Err(err) => {
                    tracing::warn!(path = %image_path.display(), error = %err, "image decode failed");
                    VerificationOutcome::ImageUnreadable
                }
                Ok(decoded) => {
                    let frame = decoded.to_rgb8();
                    let source = StoreSource::File(store_path);
                    self.run(&frame, source, analyzer, liveness_threshold, &mut m)
                }
            },
        };

        self.finish(outcome, m, started)
    }

    /// Verify an already decoded frame against an in-memory store.
    pub fn verify(
        &self,
        frame: &RgbImage,
        store: &EncodingStore,
        analyzer: &mut dyn FaceAnalyzer,
        liveness_threshold: f32,
    ) -> VerificationResult {
        let started = Instant::now();
        let mut m = Measurements::default();
        let source = StoreSource::Loaded(store);
        let outcome = self.run(frame, source, analyzer, liveness_threshold, &mut m);
        self.finish(outcome, m, started)
    }

    fn run(
        &self,
        frame: &RgbImage,
        store: StoreSource<'_>,
        analyzer: &mut dyn FaceAnalyzer,
        liveness_threshold: f32,
        m: &mut Measurements,
    ) -> VerificationOutcome {
        match self.gate_and_match(frame, store, analyzer, liveness_threshold, m) {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::error!(error = %err, "verification fault");
                VerificationOutcome::Fault(err.to_string())
            }
        }
    }

    fn gate_and_match(
        &self,
        frame: &RgbImage,
        source: StoreSource<'_>,
        analyzer: &mut dyn FaceAnalyzer,
        liveness_threshold: f32,
        m: &mut Measurements,
    ) -> Result<VerificationOutcome, PipelineError> {
        let cfg = &self.config;

        let ((brightness, brightness_elapsed), (small, factor)) = self.pool.join(
            || timed(|| quality::mean_luminance(frame)),
            || downscale(frame, cfg.detection_scale),
        );
        m.brightness = brightness;
        m.timings.set(Stage::Brightness, brightness_elapsed);
        tracing::debug!(brightness, min = cfg.min_brightness, "brightness scored");

        if let Err(failure) = quality::brightness_gate(brightness, cfg.min_brightness) {
            return Ok(VerificationOutcome::Gate(failure));
        }

        let loaded;
        let store = match source {
            StoreSource::Loaded(store) => store,
            StoreSource::File(path) => {
                let (store, elapsed) = timed(|| EncodingStore::load(path));
                m.timings.set(Stage::Loading, elapsed);
                tracing::debug!(records = store.len(), ?elapsed, "encoding store loaded");
                loaded = store;
                &loaded
            }
        };
        if store.is_empty() {
            return Ok(VerificationOutcome::NoKnownIdentities);
        }

        m.frame_size = FrameSize {
            width: small.width(),
            height: small.height(),
        };
        let (faces, elapsed) = timed(|| analyzer.detect(&small));
        m.timings.set(Stage::Detection, elapsed);
        let faces = faces?;
        tracing::debug!(count = faces.len(), ?elapsed, "faces detected");

        let Some(detected) = faces.first() else {
            return Ok(VerificationOutcome::NoFaceDetected);
        };
        let face = detected.scaled(1.0 / factor);

        let ((liveness, eye_angle), elapsed) = timed(|| {
            self.pool.join(
                || quality::liveness_score(frame, &face),
                || quality::face_angle(&face),
            )
        });
        m.liveness = liveness;
        m.timings.set(Stage::Liveness, elapsed);

        let assessment = QualityAssessment {
            brightness,
            faces: vec![FaceQuality {
                liveness,
                eye_angle,
            }],
        };
        tracing::debug!(?assessment, liveness_threshold, "face quality assessed");

        if let Err(failure) = quality::liveness_gate(liveness, liveness_threshold) {
            return Ok(VerificationOutcome::Gate(failure));
        }
        if let Err(failure) = quality::pose_gate(eye_angle, cfg.max_eye_angle_deg) {
            return Ok(VerificationOutcome::Gate(failure));
        }

        let (query, elapsed) = timed(|| analyzer.embed(&small, detected));
        m.timings.set(Stage::Encoding, elapsed);
        let query = query?;

        let (decision, elapsed) = timed(|| self.matcher.decide(&query, store));
        m.timings.set(Stage::Comparison, elapsed);

        Ok(match decision? {
            MatchDecision::NoKnownIdentities => VerificationOutcome::NoKnownIdentities,
            MatchDecision::Accepted { id, label, distance } => {
                m.distance = Some(distance);
                VerificationOutcome::Matched { id, label }
            }
            MatchDecision::Rejected { distance } => {
                m.distance = Some(distance);
                VerificationOutcome::NoMatch
            }
        })
    }

    fn finish(&self, outcome: VerificationOutcome, mut m: Measurements, started: Instant) -> VerificationResult {
        m.timings.set(Stage::Processing, started.elapsed());
        let result = assemble_verification(outcome, m, self.clock.now());

        tracing::info!(
            status = ?result.status,
            id = ?result.matched_id,
            distance = result.match_distance,
            liveness = result.liveness_score,
            brightness = result.brightness_score,
            message = %result.message,
            "verification finished"
        );
        for (stage, elapsed) in result.stage_timings.iter() {
            tracing::trace!(stage = stage.field_name(), ?elapsed, "stage timing");
        }

        result
    }
}

/// Where a request's identities come from. Files are read only once the
/// frame has passed the brightness gate.
#[derive(Clone, Copy)]
enum StoreSource<'a> {
    Loaded(&'a EncodingStore),
    File(&'a Path),
}

/// Input problems that end a request before any decoding, model or store work.
pub fn check_inputs(image_path: &Path, store_path: &Path) -> Option<VerificationOutcome> {
    if !image_path.is_file() {
        Some(VerificationOutcome::ImageNotFound)
    } else if !store_path.exists() {
        Some(VerificationOutcome::StoreNotFound)
    } else {
        None
    }
}

fn timed<T>(f: impl FnOnce() -> T) -> (T, Duration) {
    let start = Instant::now();
    let value = f();
    (value, start.elapsed())
}

/// Shrink `frame` by `scale`, returning the image and the factor actually
/// applied. Scales outside `(0, 1)` leave the frame at full size.
pub(crate) fn downscale(frame: &RgbImage, scale: f32) -> (RgbImage, f32) {
    if !(scale > 0.0 && scale < 1.0) || frame.width() == 0 || frame.height() == 0 {
        return (frame.clone(), 1.0);
    }
    let width = ((frame.width() as f32 * scale).round() as u32).max(1);
    let height = ((frame.height() as f32 * scale).round() as u32).max(1);
    let resized = imageops::resize(frame, width, height, FilterType::Triangle);
    (resized, width as f32 / frame.width() as f32)
}
