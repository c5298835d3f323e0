use std::path::PathBuf;

use rollcall_core::PipelineConfig;

/// CLI configuration, loaded from environment variables.
pub struct Config {
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    /// Default encoding store file.
    pub store_path: PathBuf,
    /// Thresholds and pool sizing for the core pipeline.
    pub pipeline: PipelineConfig,
}

impl Config {
    /// Load configuration from `ROLLCALL_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("rollcall");

        let model_dir = std::env::var("ROLLCALL_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("models"));

        let store_path = std::env::var("ROLLCALL_STORE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("face_data.json"));

        Self {
            model_dir,
            store_path,
            pipeline: PipelineConfig::from_env(),
        }
    }

    /// Path to the SCRFD detection model.
    pub fn scrfd_model_path(&self) -> PathBuf {
        self.model_dir.join("det_10g.onnx")
    }

    /// Path to the ArcFace recognition model.
    pub fn arcface_model_path(&self) -> PathBuf {
        self.model_dir.join("w600k_r50.onnx")
    }
}
