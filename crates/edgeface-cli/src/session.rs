//! The `run` frame loop.

use crate::attendance::AttendanceLog;
use anyhow::{Context, Result};
use chrono::Local;
use edgeface_core::{
    ClassificationResult, DatasetStore, FaceDetector, FramePhase, RecognitionConfig, Recognizer,
};
use edgeface_hw::FrameSource;
use serde::Serialize;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Set from the async side, read by the frame loop between frames.
#[derive(Clone, Default)]
pub struct Flags {
    pub stop: Arc<AtomicBool>,
    pub reload: Arc<AtomicBool>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SessionStats {
    pub frames: u64,
    pub processed: u64,
}

#[derive(Serialize)]
struct FrameReport<'a> {
    frame: u64,
    phase: &'static str,
    results: &'a [ClassificationResult],
}

/// Everything one recognition run needs, wired up by the caller.
pub struct Session {
    pub recognizer: Recognizer,
    pub detector: Box<dyn FaceDetector>,
    pub source: Box<dyn FrameSource>,
    /// Where SIGHUP reloads come from.
    pub store: DatasetStore,
    pub config: RecognitionConfig,
    pub attendance: Option<AttendanceLog>,
    /// One JSON line per frame, skipped frames included. Plain text shows
    /// processed frames only.
    pub json: bool,
}

impl Session {
    /// Pull frames until the source ends or `flags.stop` is set.
    ///
    /// Flags are read between frames only. A reload that fails to load or
    /// does not fit the configuration ends the run with that error.
    pub fn run(&mut self, flags: &Flags, out: &mut dyn Write) -> Result<SessionStats> {
        let mut stats = SessionStats::default();

        while !flags.stop.load(Ordering::SeqCst) {
            if flags.reload.swap(false, Ordering::SeqCst) {
                let dataset = self.store.load().context("dataset reload failed")?;
                self.recognizer
                    .dataset()
                    .reload(dataset, &self.config)
                    .context("reloaded dataset does not fit the configuration")?;
            }

            let Some(frame) = self.source.next_frame()? else {
                tracing::info!("frame source exhausted");
                break;
            };
            stats.frames += 1;

            let outcome = self.recognizer.on_frame(&frame.image, self.detector.as_mut())?;
            let processed = outcome.phase == FramePhase::Process;
            if processed {
                stats.processed += 1;
            }

            if self.json {
                let line = serde_json::to_string(&FrameReport {
                    frame: outcome.index,
                    phase: if processed { "process" } else { "skip" },
                    results: outcome.results,
                })?;
                writeln!(out, "{line}")?;
            } else if processed {
                write_text(out, outcome.index, outcome.results)?;
            }

            if let (true, Some(log)) = (processed, self.attendance.as_mut()) {
                let now = Local::now();
                for result in outcome.results {
                    log.record(result, now)?;
                }
            }
        }

        tracing::info!(frames = stats.frames, processed = stats.processed, "recognition session ended");
        Ok(stats)
    }
}

fn write_text(out: &mut dyn Write, index: u64, results: &[ClassificationResult]) -> Result<()> {
    for r in results {
        let marker = if r.accepted { "" } else { "  (rejected)" };
        writeln!(
            out,
            "frame {index:>6}  {:<20} {:5.1}%  at ({:.0}, {:.0}) {:.0}x{:.0}{marker}",
            r.label, r.confidence, r.bbox.x, r.bbox.y, r.bbox.width, r.bbox.height
        )?;
    }
    Ok(())
}
