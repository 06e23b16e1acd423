#![forbid(unsafe_code)]

//! # vlm-eval-harness
//!
//! Scores vision-language models on labeled image classification datasets.
//!
//! Each sample in `<dataset>/metadata.jsonl` is sent to an OpenAI-compatible
//! chat endpoint together with a fixed task prompt. The free-form reply is
//! searched for a JSON object, the label is read out of it and compared with
//! the ground truth. Runs end with per-class metrics, a class-balanced
//! accuracy and a JSON-lines debug log of every parsed response.

pub mod dataset;
pub mod debug_log;
pub mod driver;
pub mod extract;
pub mod gateway;
pub mod report;
pub mod scoring;
pub mod tasks;

pub use dataset::{load_dataset, Dataset, DatasetError, Sample};
pub use debug_log::{DebugRecord, DebugSink, DebugSinkError, DebugWorker, JsonlDebugSink};
pub use driver::{EvalError, EvalOptions, EvalOutcome, Evaluator, Prediction, SampleOutcome};
pub use extract::{extract_json, extract_json_with_strategy};
pub use gateway::{create_client, list_providers, ChatClient, ClientFactory, ClientOptions, ProviderError};
pub use report::{render_report_text, EvalReport};
pub use scoring::{ClassStats, Scoreboard};
pub use tasks::{CoDetectorTask, EvalTask, GazeDirection, GazeDirectionTask};
