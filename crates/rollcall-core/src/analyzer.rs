//! Face model boundary.
//!
//! The pipeline only needs two capabilities from a face model: locate faces
//! (with landmarks) in a frame, and turn one located face into a
//! fixed-length embedding. [`FaceAnalyzer`] is that seam; [`OnnxFaceAnalyzer`]
//! implements it with SCRFD and ArcFace on ONNX Runtime.

use std::path::Path;

use image::RgbImage;
use thiserror::Error;

use crate::detector::FaceDetector;
use crate::recognizer::FaceRecognizer;
use crate::types::{BoundingBox, Embedding};

#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error("model file not found: {0} (download from insightface into the model directory)")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("face has no landmarks; alignment needs the five-point set")]
    NoLandmarks,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Detection and embedding over decoded RGB frames.
pub trait FaceAnalyzer {
    /// Faces found in `frame`, most confident first. Box and landmark
    /// coordinates are pixels of `frame`.
    fn detect(&mut self, frame: &RgbImage) -> Result<Vec<BoundingBox>, AnalyzerError>;

    /// Embedding for one face previously returned by [`detect`](Self::detect)
    /// on the same frame.
    fn embed(&mut self, frame: &RgbImage, face: &BoundingBox) -> Result<Embedding, AnalyzerError>;
}

/// SCRFD detector plus ArcFace recognizer.
pub struct OnnxFaceAnalyzer {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl OnnxFaceAnalyzer {
    pub fn load(detector_model: &Path, recognizer_model: &Path) -> Result<Self, AnalyzerError> {
        let detector = FaceDetector::load(detector_model)?;
        let recognizer = FaceRecognizer::load(recognizer_model)?;
        Ok(Self {
            detector,
            recognizer,
        })
    }
}

impl FaceAnalyzer for OnnxFaceAnalyzer {
    fn detect(&mut self, frame: &RgbImage) -> Result<Vec<BoundingBox>, AnalyzerError> {
        self.detector.detect(frame)
    }

    fn embed(&mut self, frame: &RgbImage, face: &BoundingBox) -> Result<Embedding, AnalyzerError> {
        self.recognizer.embed(frame, face)
    }
}
