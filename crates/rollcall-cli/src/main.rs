mod config;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rollcall_core::result::{assemble_verification, Measurements};
use rollcall_core::{
    enrollment, verify, Clock, EncodingStore, Enroller, EnrollmentOutcome, ExistingIdPolicy,
    OnnxFaceAnalyzer, SystemClock, VerificationOutcome, VerificationResult, Verifier,
};

use crate::config::Config;

#[derive(Parser)]
#[command(name = "rollcall", about = "Face check-in for attendance")]
struct Cli {
    /// Encoding store file (default: $ROLLCALL_STORE_PATH or the XDG data dir)
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Verify a photo against enrolled identities and record attendance
    Verify {
        /// Photo to check in with
        image: PathBuf,
        /// Liveness scores at or below this are rejected
        #[arg(long)]
        liveness_threshold: Option<f32>,
    },
    /// Enroll a photo under a user ID, or refresh that ID's face
    Enroll {
        /// Photo of the person; its file name becomes the label
        image: PathBuf,
        /// User ID to enroll under
        #[arg(long)]
        id: Option<i64>,
        /// What to do when the ID is already enrolled: "update" or "reject"
        #[arg(long)]
        policy: Option<ExistingIdPolicy>,
    },
    /// List enrolled identities
    List,
    /// Remove an enrolled identity
    Remove {
        /// User ID to remove
        id: i64,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = Config::from_env();
    let store_path = cli.store.unwrap_or_else(|| config.store_path.clone());

    match cli.command {
        Commands::Verify {
            image,
            liveness_threshold,
        } => {
            let threshold = liveness_threshold.unwrap_or(config.pipeline.liveness_threshold);
            let result = verify_command(config, &image, &store_path, threshold);
            println!("{}", result.to_json()?);
        }
        Commands::Enroll { image, id, policy } => {
            if let Some(policy) = policy {
                config.pipeline.existing_id_policy = policy;
            }
            let outcome = enroll_command(config, &image, &store_path, id);
            println!("{}", serde_json::to_string(&outcome.response())?);
        }
        Commands::List => {
            let store = EncodingStore::open(&store_path)
                .with_context(|| format!("reading {}", store_path.display()))?;
            if store.is_empty() {
                println!("No identities enrolled");
            }
            for record in store.records() {
                println!("{}\t{}", record.id, record.label);
            }
        }
        Commands::Remove { id } => {
            let mut store = EncodingStore::open(&store_path)
                .with_context(|| format!("reading {}", store_path.display()))?;
            match store.remove(id) {
                Some(record) => {
                    store
                        .save(&store_path)
                        .with_context(|| format!("writing {}", store_path.display()))?;
                    tracing::info!(id, label = %record.label, "identity removed");
                    println!("Removed user ID {id} ({})", record.label);
                }
                None => anyhow::bail!("no identity with ID {id}"),
            }
        }
    }

    Ok(())
}

/// Run one verification. Input errors are reported before the models load, and
/// a failed load is reported as a faulted result rather than an exit error.
fn verify_command(
    config: Config,
    image: &Path,
    store_path: &Path,
    liveness_threshold: f32,
) -> VerificationResult {
    if let Some(rejected) = verify::check_inputs(image, store_path) {
        return assemble_verification(rejected, Measurements::default(), SystemClock.now());
    }
    let prepared = load_analyzer(&config).and_then(|analyzer| {
        let verifier = Verifier::new(config.pipeline).context("starting verifier")?;
        Ok((analyzer, verifier))
    });
    match prepared {
        Ok((mut analyzer, verifier)) => {
            verifier.process_image(image, store_path, &mut analyzer, liveness_threshold)
        }
        Err(err) => {
            tracing::error!(error = %format!("{err:#}"), "verify: setup failed");
            let outcome = VerificationOutcome::Fault(format!("{err:#}"));
            assemble_verification(outcome, Measurements::default(), SystemClock.now())
        }
    }
}

/// Run one enrollment, with the same ordering as [`verify_command`].
fn enroll_command(
    config: Config,
    image: &Path,
    store_path: &Path,
    user_id: Option<i64>,
) -> EnrollmentOutcome {
    if let Some(rejected) = enrollment::check_inputs(image, user_id) {
        return rejected;
    }
    match load_analyzer(&config) {
        Ok(mut analyzer) => Enroller::new(config.pipeline).update_face_encodings(
            image,
            store_path,
            user_id,
            &mut analyzer,
        ),
        Err(err) => {
            tracing::error!(error = %format!("{err:#}"), "enroll: setup failed");
            EnrollmentOutcome::Fault(format!("{err:#}"))
        }
    }
}

fn load_analyzer(config: &Config) -> Result<OnnxFaceAnalyzer> {
    let scrfd = config.scrfd_model_path();
    let arcface = config.arcface_model_path();
    let analyzer = OnnxFaceAnalyzer::load(&scrfd, &arcface)
        .with_context(|| format!("loading face models from {}", config.model_dir.display()))?;
    tracing::info!(scrfd = %scrfd.display(), arcface = %arcface.display(), "face models loaded");
    Ok(analyzer)
}
