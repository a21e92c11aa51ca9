mod config;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use config::Config;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use vigil_capture::{CaptureController, ReplayScript, SignatureReplay};
use vigil_core::{EuclideanMatcher, Identification, Signature, Subject};
use vigil_store::{Database, EmotionLog, SignatureStore};

#[derive(Parser)]
#[command(name = "vigil", about = "Vigil subject identification and emotion trend CLI")]
struct Cli {
    /// Print machine-readable JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll a subject, optionally with a face signature
    Enroll {
        /// Unique subject key
        id: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        age: u32,
        #[arg(long)]
        crime: String,
        /// JSON array of floats holding the face signature
        #[arg(long, conflicts_with = "probe")]
        signature: Option<PathBuf>,
        /// JSON array of per-frame extractor outputs (array or null)
        #[arg(long)]
        probe: Option<PathBuf>,
    },
    /// Remove a subject and its emotion history
    Remove { id: String },
    /// List enrolled subjects
    List,
    /// Show one subject's details
    Show { id: String },
    /// Match a probe signature against the enrolled gallery
    Identify {
        /// JSON array of floats holding the probe signature
        #[arg(long, required_unless_present = "probe", conflicts_with = "probe")]
        signature: Option<PathBuf>,
        /// JSON array of per-frame extractor outputs (array or null)
        #[arg(long)]
        probe: Option<PathBuf>,
    },
    /// Append one emotion label for a subject
    Log {
        id: String,
        /// One of angry, disgust, fear, sad, surprise, happy, neutral
        label: String,
        /// RFC 3339 timestamp (default: now)
        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },
    /// Print a subject's emotion history in time order
    History { id: String },
    /// Classify a subject's emotion history
    Trend { id: String },
    /// Run a capture session over a recorded label script
    Capture {
        id: String,
        /// Replay script: one label per line, "-" for a frame with no face
        #[arg(long)]
        script: PathBuf,
        /// Observation window in seconds (default from config)
        #[arg(long)]
        secs: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::load()?;
    let json = cli.json;

    let db = Arc::new(open_database(&config.db_path)?);
    let store = SignatureStore::open(Arc::clone(&db), config.signature_dim)?;
    let log = EmotionLog::new(Arc::clone(&db));

    match cli.command {
        Commands::Enroll {
            id,
            name,
            age,
            crime,
            signature,
            probe,
        } => {
            let mut subject = Subject::new(id, name, age, crime);
            if let Some(path) = signature {
                subject = subject.with_signature(read_signature(&path)?);
            } else if let Some(path) = probe {
                subject = subject.with_signature(run_probe(&path, &config)?);
            }
            store.enroll(&subject)?;
            emit(json, &subject, |s| {
                let signed = if s.signature.is_some() { "with signature" } else { "without signature" };
                println!("Enrolled {} ({signed})", s.id);
            })?;
        }
        Commands::Remove { id } => {
            store.remove(&id)?;
            emit(json, &Removed { removed: id }, |r| println!("Removed {}", r.removed))?;
        }
        Commands::List => {
            let subjects = store.subjects()?;
            emit(json, &subjects, |subjects| {
                if subjects.is_empty() {
                    println!("No subjects enrolled");
                }
                for s in subjects {
                    println!("{}\t{}\t{}\t{}", s.id, s.name, s.age, s.crime);
                }
            })?;
        }
        Commands::Show { id } => {
            let subject = store.get(&id)?;
            emit(json, &subject, print_subject)?;
        }
        Commands::Identify { signature, probe } => {
            let probe_sig = match (signature, probe) {
                (Some(path), _) => read_signature(&path)?,
                (None, Some(path)) => run_probe(&path, &config)?,
                (None, None) => bail!("either --signature or --probe is required"),
            };
            let matcher = EuclideanMatcher {
                tolerance: config.match_tolerance,
            };
            let result = store.identify(&matcher, &probe_sig)?;
            let subject = match result.subject_id() {
                Some(id) => Some(store.get(id)?),
                None => None,
            };
            let out = IdentifyOutput { result, subject };
            emit(json, &out, |out| match (&out.result, &out.subject) {
                (Identification::Matched { distance, .. }, Some(s)) => {
                    println!("Matched (distance {distance:.4})");
                    print_subject(s);
                }
                (Identification::Unknown { nearest_distance }, _) => match nearest_distance {
                    Some(d) => println!("Unknown (nearest distance {d:.4})"),
                    None => println!("Unknown (gallery is empty)"),
                },
                (Identification::Matched { subject_id, .. }, None) => println!("Matched {subject_id}"),
            })?;
        }
        Commands::Log { id, label, at } => {
            let timestamp = at.unwrap_or_else(Utc::now);
            log.append_text(&id, timestamp, &label, None)?;
            if !json {
                println!("Logged {} for {id} at {}", label.trim().to_lowercase(), timestamp.to_rfc3339());
            }
        }
        Commands::History { id } => {
            let records = log.records(&id)?;
            emit(json, &records, |records| {
                for r in records {
                    println!("{}\t{}", r.timestamp.to_rfc3339(), r.label);
                }
            })?;
        }
        Commands::Trend { id } => {
            let report = log.evaluate(&id)?;
            emit(json, &report, |report| {
                println!("{}: {}", report.subject_id, report.verdict);
                println!("Negative: {}/{}", report.negative_count, report.total);
                for p in report.points() {
                    println!("  +{:>8.2}s  {:<8} {}", p.offset_secs, p.label.as_str(), p.severity);
                }
            })?;
        }
        Commands::Capture { id, script, secs } => {
            // Fail before the device is claimed rather than on the first append.
            store.get(&id)?;
            let text = std::fs::read_to_string(&script)
                .with_context(|| format!("failed to read {}", script.display()))?;
            let script = ReplayScript::parse(&text)?;
            let duration = secs
                .map(std::time::Duration::from_secs)
                .unwrap_or_else(|| config.capture_duration());
            let policy = config.capture_policy();
            let (source, classifier) = script.into_parts(policy.tick);

            let mut controller = CaptureController::new(Arc::new(log), policy);
            let session = controller.start(&id, duration, Box::new(source), Box::new(classifier))?;
            tracing::info!(subject = %id, session = %session, "capture running, Ctrl-C to cancel");

            let cancel = controller.cancel_token();
            let mut worker = tokio::task::spawn_blocking(move || controller.wait());
            let joined = tokio::select! {
                joined = &mut worker => joined,
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("cancelling capture session");
                    cancel.cancel();
                    worker.await
                }
            };
            let report = joined.context("capture task panicked")??;

            emit(json, &report, |r| {
                println!(
                    "Session {} for {}: {:?} after {:.1}s",
                    r.session_id,
                    r.subject_id,
                    r.state,
                    r.elapsed.as_secs_f64()
                );
                println!("Frames: {}  Records: {}  No face: {}", r.frames, r.records, r.no_face);
                if let Some(fault) = &r.fault {
                    println!("Fault: {fault}");
                }
            })?;
        }
    }

    Ok(())
}

#[derive(Serialize)]
struct Removed {
    removed: String,
}

#[derive(Serialize)]
struct IdentifyOutput {
    result: Identification,
    subject: Option<Subject>,
}

fn open_database(path: &Path) -> Result<Database> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    Ok(Database::open(path)?)
}

fn read_signature(path: &Path) -> Result<Signature> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("invalid signature file {}", path.display()))
}

/// Replay recorded extractor outputs through the signature probe.
fn run_probe(path: &Path, config: &Config) -> Result<Signature> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let frames: Vec<Option<Signature>> = serde_json::from_str(&text)
        .with_context(|| format!("invalid probe recording {}", path.display()))?;
    let (mut source, mut extractor) = SignatureReplay::new(frames).into_parts(std::time::Duration::ZERO);
    Ok(vigil_capture::capture_signature(
        &mut source,
        &mut extractor,
        config.probe_frames,
        config.frame_timeout(),
    )?)
}

fn print_subject(s: &Subject) {
    println!("ID:       {}", s.id);
    println!("Name:     {}", s.name);
    println!("Age:      {}", s.age);
    println!("Crime:    {}", s.crime);
    println!("Enrolled: {}", s.enrolled_at.to_rfc3339());
    match &s.signature {
        Some(sig) => println!("Signature: {} values", sig.dim()),
        None => println!("Signature: none"),
    }
}

fn emit<T: Serialize>(json: bool, value: &T, text: impl FnOnce(&T)) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        text(value);
    }
    Ok(())
}
