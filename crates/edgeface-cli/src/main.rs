use anyhow::{bail, Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use edgeface_core::{
    DatasetHandle, DatasetStore, FaceDetector, FeatureExtractor, Recognizer, ScrfdDetector,
};
use edgeface_hw::{Camera, FrameSource, ImageSequence};
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use tokio::signal::unix::{signal, SignalKind};
use tracing_subscriber::EnvFilter;

mod attendance;
mod config;
mod session;

use attendance::AttendanceLog;
use config::{CameraConfig, Config};
use session::{Flags, Session};

#[derive(Parser)]
#[command(name = "edgeface", about = "Real-time face identification against an enrolled dataset")]
struct Cli {
    /// Config file (default: $XDG_CONFIG_HOME/edgeface/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Identify faces in the camera stream
    Run {
        /// Read frames from a directory of images instead of the camera
        #[arg(long)]
        frames: Option<PathBuf>,
        /// Record accepted identities in the attendance log
        #[arg(long)]
        attendance: bool,
        /// Print one JSON object per frame; skipped frames carry "phase": "skip"
        /// and repeat the last results
        #[arg(long)]
        json: bool,
    },
    /// Capture face samples for one person and add them to the dataset
    Collect {
        /// Identity label for the new samples
        #[arg(short, long)]
        name: String,
        /// Read frames from a directory of images instead of the camera
        #[arg(long)]
        frames: Option<PathBuf>,
        /// Number of samples to capture (default from config)
        #[arg(long)]
        samples: Option<usize>,
    },
    /// Show a summary of the enrolled dataset
    Info,
    /// List V4L2 capture devices
    Cameras,
    /// Print attendance records for a day
    Attendance {
        /// Day as YYYY-MM-DD (default: today)
        #[arg(long)]
        date: Option<NaiveDate>,
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Run {
            frames,
            attendance,
            json,
        } => {
            let flags = Flags::default();
            let worker_flags = flags.clone();
            let worker = tokio::task::spawn_blocking(move || {
                run_session(&config, frames.as_deref(), attendance, json, &worker_flags)
            });
            supervise(worker, flags).await?;
        }
        Commands::Collect {
            name,
            frames,
            samples,
        } => {
            let flags = Flags::default();
            let worker_flags = flags.clone();
            let worker = tokio::task::spawn_blocking(move || {
                collect_samples(&config, &name, frames.as_deref(), samples, &worker_flags)
            });
            supervise(worker, flags).await?;
        }
        Commands::Info => show_info(&config)?,
        Commands::Cameras => list_cameras(),
        Commands::Attendance { date, json } => {
            let day = date.unwrap_or_else(|| Local::now().date_naive());
            show_attendance(&config, day, json)?;
        }
    }

    Ok(())
}

/// Wait for the worker, turning Ctrl-C into a stop request and SIGHUP into
/// a reload request.
async fn supervise(
    worker: tokio::task::JoinHandle<Result<()>>,
    flags: Flags,
) -> Result<()> {
    let mut hangup = signal(SignalKind::hangup()).context("failed to install SIGHUP handler")?;
    tokio::pin!(worker);

    loop {
        tokio::select! {
            result = &mut worker => return result.context("worker thread panicked")?,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupt received; stopping after current frame");
                flags.stop.store(true, Ordering::SeqCst);
                return worker.await.context("worker thread panicked")?;
            }
            _ = hangup.recv() => {
                tracing::info!("SIGHUP received; dataset reload requested");
                flags.reload.store(true, Ordering::SeqCst);
            }
        }
    }
}

fn open_source(frames: Option<&Path>, camera: &CameraConfig) -> Result<Box<dyn FrameSource>> {
    let source: Box<dyn FrameSource> = match frames {
        Some(dir) => Box::new(ImageSequence::open(dir)?),
        None => Box::new(
            Camera::open_with_fallback(camera.index, camera.width, camera.height)
                .context("failed to open camera")?,
        ),
    };
    tracing::info!(source = %source.describe(), "frame source ready");
    Ok(source)
}

fn load_detector(config: &Config) -> Result<ScrfdDetector> {
    let path = config.detector_model_path();
    ScrfdDetector::load(&path, config.detector.clone())
        .with_context(|| format!("failed to load face detector from {}", path.display()))
}

fn run_session(
    config: &Config,
    frames: Option<&Path>,
    attendance: bool,
    json: bool,
    flags: &Flags,
) -> Result<()> {
    let store = DatasetStore::new(&config.paths.dataset_dir);
    let dataset = store
        .load()
        .with_context(|| format!("failed to load dataset from {}", store.root().display()))?;
    let handle = DatasetHandle::new(dataset, &config.recognition)?;

    let mut session = Session {
        recognizer: Recognizer::new(&config.recognition, handle)?,
        detector: Box::new(load_detector(config)?),
        source: open_source(frames, &config.camera)?,
        store,
        config: config.recognition.clone(),
        attendance: if attendance {
            Some(AttendanceLog::open(&config.paths.attendance_db)?)
        } else {
            None
        },
        json,
    };

    let stdout = std::io::stdout();
    session.run(flags, &mut stdout.lock())?;
    Ok(())
}

fn collect_samples(
    config: &Config,
    name: &str,
    frames: Option<&Path>,
    samples: Option<usize>,
    flags: &Flags,
) -> Result<()> {
    let name = name.trim();
    if name.is_empty() {
        bail!("name must not be empty");
    }
    let target = samples.unwrap_or(config.collect.samples_per_person);
    if target == 0 {
        bail!("sample count must be at least 1");
    }
    let capture_every = u64::from(config.collect.capture_every.max(1));

    let extractor = FeatureExtractor::from_config(&config.recognition);
    let store = DatasetStore::new(&config.paths.dataset_dir);
    if store.exists() {
        let existing = store.load()?;
        if existing.dimension() != extractor.dimension() {
            bail!(
                "dataset at {} has dimension {}, crop size gives {}",
                store.root().display(),
                existing.dimension(),
                extractor.dimension()
            );
        }
    }

    let mut detector = load_detector(config)?;
    let mut source = open_source(frames, &config.camera)?;

    let mut vectors = Vec::with_capacity(target);
    let mut index = 0u64;
    while vectors.len() < target && !flags.stop.load(Ordering::SeqCst) {
        let Some(frame) = source.next_frame()? else {
            break;
        };
        index += 1;
        if (index - 1) % capture_every != 0 {
            continue;
        }

        let boxes = detector.detect(&frame.to_gray())?;
        let Some(face) = boxes.into_iter().max_by(|a, b| a.area().total_cmp(&b.area())) else {
            continue;
        };
        match extractor.extract(&frame.image, &face) {
            Ok(vector) => {
                vectors.push(vector.values);
                tracing::debug!(captured = vectors.len(), target, "sample captured");
            }
            Err(e) => tracing::warn!(error = %e, "sample skipped"),
        }
    }

    if vectors.is_empty() {
        bail!("no face samples captured for {name}");
    }
    if vectors.len() < target {
        tracing::warn!(captured = vectors.len(), target, "collection ended early");
    }

    let captured = vectors.len();
    let total = store.append(vectors, name)?;
    println!("Added {captured} samples for {name} ({total} samples in dataset)");
    Ok(())
}

fn show_info(config: &Config) -> Result<()> {
    let store = DatasetStore::new(&config.paths.dataset_dir);
    if !store.exists() {
        println!("No dataset at {}", store.root().display());
        return Ok(());
    }
    let dataset = store.load()?;
    println!("Dataset:    {}", store.root().display());
    println!("Samples:    {}", dataset.len());
    println!("Dimension:  {}", dataset.dimension());
    for (label, count) in dataset.summary() {
        println!("  {label:<20} {count}");
    }
    if let Err(e) = config.recognition.check_dataset(&dataset) {
        println!("Warning:    {e}");
    }
    Ok(())
}

fn list_cameras() {
    let devices = Camera::list_devices();
    if devices.is_empty() {
        println!("No V4L2 capture devices found");
        return;
    }
    for d in devices {
        println!("{:<14} {} ({}, {})", d.path, d.card, d.driver, d.bus_info);
    }
}

fn show_attendance(config: &Config, day: NaiveDate, json: bool) -> Result<()> {
    let log = AttendanceLog::open(&config.paths.attendance_db)?;
    let records = log.for_day(day)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }
    if records.is_empty() {
        println!("No attendance recorded on {day}");
        return Ok(());
    }
    println!("{:<20} TIME", "NAME");
    for r in records {
        println!("{:<20} {}", r.name, r.time);
    }
    Ok(())
}
