//! Sequential evaluation loop: one model call per dataset sample.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::Utc;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info, warn};

use crate::dataset::{load_dataset, DatasetError, Sample};
use crate::debug_log::{
    debug_file_path, now_epoch_ms, DebugRecord, DebugSink, DebugSinkError, JsonlDebugSink,
};
use crate::extract::extract_json_with_strategy;
use crate::gateway::{ChatClient, ChatInput};
use crate::report::{build_report, render_report_text, EvalReport, RunMeta};
use crate::scoring::Scoreboard;
use crate::tasks::EvalTask;

#[derive(Debug, thiserror::Error)]
pub enum EvalError {
    #[error(transparent)]
    Dataset(#[from] DatasetError),
    #[error("debug log: {0}")]
    DebugSink(#[from] DebugSinkError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("report serialization: {0}")]
    Serde(#[from] serde_json::Error),
}

#[derive(Debug, Clone)]
pub struct EvalOptions {
    /// Directory for the debug log. Created if missing.
    pub out_dir: PathBuf,
    /// Seed for the balanced-accuracy draw. Random when unset.
    pub seed: Option<u64>,
    /// Process at most this many samples.
    pub limit: Option<usize>,
    /// Also write the report as pretty JSON here.
    pub report_path: Option<PathBuf>,
    /// Print the per-sample trace and the final report to stdout.
    pub print_progress: bool,
}

impl Default for EvalOptions {
    fn default() -> Self {
        Self {
            out_dir: PathBuf::from("."),
            seed: None,
            limit: None,
            report_path: None,
            print_progress: true,
        }
    }
}

/// What happened to one sample.
#[derive(Debug, Clone, PartialEq)]
pub enum SampleOutcome<L> {
    Scored { predicted: L, correct: bool },
    /// Response arrived but held no usable label.
    Unparsed,
    /// The model call itself failed.
    Failed { code: &'static str },
}

/// One sample as sent to the model, with what came back.
#[derive(Debug, Clone)]
pub struct Prediction<L> {
    pub sample: Sample<L>,
    pub outcome: SampleOutcome<L>,
    /// `None` when the call failed.
    pub raw_response: Option<String>,
    pub latency: Duration,
}

impl<L> Prediction<L> {
    pub fn predicted(&self) -> Option<&L> {
        match &self.outcome {
            SampleOutcome::Scored { predicted, .. } => Some(predicted),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub struct EvalOutcome<L> {
    pub report: EvalReport,
    pub scoreboard: Scoreboard<L>,
    pub predictions: Vec<Prediction<L>>,
    pub debug_path: PathBuf,
    /// Set when the debug log could not be fully written.
    pub debug_error: Option<DebugSinkError>,
}

pub struct Evaluator<'a, T: EvalTask> {
    client: &'a dyn ChatClient,
    task: T,
    opts: EvalOptions,
}

impl<'a, T: EvalTask> Evaluator<'a, T> {
    pub fn new(client: &'a dyn ChatClient, task: T, opts: EvalOptions) -> Self {
        Self { client, task, opts }
    }

    pub async fn run(&self, dataset_dir: &Path) -> Result<EvalOutcome<T::Label>, EvalError> {
        let task = &self.task;
        let started_at = Utc::now();
        let dataset = load_dataset(dataset_dir, task)?;
        let limit = self.opts.limit.unwrap_or(usize::MAX);
        let planned = dataset.samples.len().min(limit);

        info!(
            task = task.slug(),
            provider = self.client.provider(),
            model = self.client.model_name(),
            samples = planned,
            skipped = dataset.skipped.len(),
            "starting evaluation"
        );

        std::fs::create_dir_all(&self.opts.out_dir)?;
        let debug_path = debug_file_path(&self.opts.out_dir, task.slug(), started_at.timestamp());
        let (sink, worker) = JsonlDebugSink::new(&debug_path)?;

        let mut board = Scoreboard::new(task.labels());
        let mut call_time = Duration::ZERO;
        let mut successful_calls = 0usize;
        let mut predictions = Vec::with_capacity(planned);

        for (i, sample) in dataset.samples.iter().take(limit).enumerate() {
            self.say(format!(
                "Processing sample {}/{}: {}",
                i + 1,
                planned,
                sample.file_name
            ));

            let input = ChatInput::with_image(task.prompt(), sample.image_path(&dataset.root));
            let start = Instant::now();
            let response = self.client.async_chat(&input).await;
            let latency = start.elapsed();

            let (outcome, raw_response) = match response {
                Err(err) => {
                    warn!(file = %sample.file_name, code = err.code(), error = %err, "model call failed");
                    self.say(format!("  - Error: {err}"));
                    board.record_failure(sample.ground_truth.clone());
                    (SampleOutcome::Failed { code: err.code() }, None)
                }
                Ok(raw) => {
                    call_time += latency;
                    successful_calls += 1;
                    let outcome = self.score_response(&mut board, &sink, sample, &raw, latency);
                    (outcome, Some(raw))
                }
            };
            predictions.push(Prediction {
                sample: sample.clone(),
                outcome,
                raw_response,
                latency,
            });
            self.say("-".repeat(20));
        }

        drop(sink);

        let mut rng = match self.opts.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let meta = RunMeta {
            provider: self.client.provider().to_string(),
            model: self.client.model_name().to_string(),
            started_at,
            rng_seed: self.opts.seed,
            rows: dataset.rows(),
            skipped: dataset.skipped.len(),
            call_time,
            successful_calls,
        };
        let report = build_report(task, &board, &meta, &mut rng);

        self.say(render_report_text(&report));
        self.say(format!("Debug log: {}", debug_path.display()));

        if let Some(path) = &self.opts.report_path {
            std::fs::write(path, serde_json::to_string_pretty(&report)?)?;
            info!(path = %path.display(), "report written");
        }

        // Joined last: a failed debug write still leaves the report on disk.
        let debug_error = match worker.join() {
            Ok(written) => {
                debug!(path = %debug_path.display(), records = written, "debug log closed");
                None
            }
            Err(err) => {
                warn!(path = %debug_path.display(), error = %err, "debug log incomplete");
                self.say(format!("Warning: debug log incomplete: {err}"));
                Some(err)
            }
        };

        Ok(EvalOutcome {
            report,
            scoreboard: board,
            predictions,
            debug_path,
            debug_error,
        })
    }

    fn score_response(
        &self,
        board: &mut Scoreboard<T::Label>,
        sink: &JsonlDebugSink,
        sample: &Sample<T::Label>,
        raw: &str,
        latency: Duration,
    ) -> SampleOutcome<T::Label> {
        let task = &self.task;
        let gt = sample.ground_truth.clone();

        let Some((strategy, parsed)) = extract_json_with_strategy(raw) else {
            self.say("  - Error: no JSON object in response".to_string());
            self.say(format!("  - Raw response: {raw}"));
            board.record(gt, None);
            return SampleOutcome::Unparsed;
        };

        let Some(predicted) = task.parse_prediction(&parsed) else {
            self.say(format!(
                "  - Error: missing or invalid '{}' in response",
                task.label_field()
            ));
            self.say(format!("  - Raw response: {raw}"));
            board.record(gt, None);
            return SampleOutcome::Unparsed;
        };

        let correct = board
            .record(gt.clone(), Some(predicted.clone()))
            .unwrap_or(false);
        let extras = task.debug_extras(&parsed);

        self.say(format!("  - Ground truth: {}", task.label_name(&gt)));
        self.say(format!("  - Predicted: {}", task.label_name(&predicted)));
        for (key, value) in &extras {
            self.say(format!("  - {key}: {value}"));
        }
        self.say(format!("  - Latency: {:.2}s", latency.as_secs_f64()));
        self.say(format!(
            "  - Result: {}",
            if correct { "correct" } else { "incorrect" }
        ));

        let record = DebugRecord {
            timestamp_ms: now_epoch_ms(),
            line: sample.line,
            file_name: sample.file_name.clone(),
            provider: self.client.provider().to_string(),
            model: self.client.model_name().to_string(),
            ground_truth: task.label_name(&gt),
            predicted: task.label_name(&predicted),
            correct,
            latency_ms: latency.as_millis() as u64,
            strategy: strategy.to_string(),
            raw_response: raw.to_string(),
            extras,
        };
        if let Err(err) = sink.record(record) {
            warn!(error = %err, "failed to queue debug record");
        }

        SampleOutcome::Scored { predicted, correct }
    }

    fn say(&self, line: String) {
        if self.opts.print_progress {
            println!("{line}");
        }
    }
}
