//! Report generation for evaluation runs.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;

use crate::scoring::{ratio, ClassStats, Scoreboard};
use crate::tasks::EvalTask;

/// Run facts the scoreboard does not know about.
#[derive(Debug, Clone)]
pub struct RunMeta {
    pub provider: String,
    pub model: String,
    pub started_at: DateTime<Utc>,
    pub rng_seed: Option<u64>,
    /// Non-blank metadata rows.
    pub rows: usize,
    pub skipped: usize,
    /// Wall time spent in successful model calls.
    pub call_time: Duration,
    pub successful_calls: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct EvalReport {
    pub task: String,
    pub provider: String,
    pub model: String,
    pub started_at: DateTime<Utc>,
    pub rng_seed: Option<u64>,
    pub counts: ReportCounts,
    pub accuracy: f64,
    pub scored_accuracy: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub balanced: Option<ReportBalanced>,
    pub classes: Vec<ReportClass>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub binary_confusion: Option<ReportBinaryConfusion>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub confusion_table: Vec<ReportConfusionCell>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<ReportGroup>,
    pub latency: ReportLatency,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportCounts {
    pub rows: usize,
    pub skipped: usize,
    /// Samples sent to the model.
    pub attempted: usize,
    pub failed: usize,
    pub unparsed: usize,
    pub scored: usize,
    pub correct: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportBalanced {
    pub per_class_size: usize,
    pub total: usize,
    pub correct: usize,
    pub accuracy: f64,
    pub distribution: Vec<ReportLabelCount>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportLabelCount {
    pub label: String,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportClass {
    pub label: String,
    pub total: usize,
    pub predicted: usize,
    pub correct: usize,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportBinaryConfusion {
    pub true_positive: usize,
    pub false_negative: usize,
    pub false_positive: usize,
    pub true_negative: usize,
    pub sensitivity: f64,
    pub specificity: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportConfusionCell {
    pub ground_truth: String,
    pub predicted: String,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportGroup {
    pub name: String,
    pub members: Vec<String>,
    pub class: ReportClass,
    /// Accuracy of the two-way split between the group and its complement.
    pub binary_accuracy: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportLatency {
    pub total_ms: u128,
    pub calls: usize,
    pub average_ms: f64,
}

pub fn build_report<T, R>(
    task: &T,
    board: &Scoreboard<T::Label>,
    meta: &RunMeta,
    rng: &mut R,
) -> EvalReport
where
    T: EvalTask,
    R: Rng + ?Sized,
{
    let classes = board
        .labels()
        .iter()
        .map(|l| ReportClass::new(task.label_name(l), board.stats(l)))
        .collect();

    let balanced = board.balanced_accuracy(rng).map(|b| ReportBalanced {
        per_class_size: b.per_class_size,
        total: b.total,
        correct: b.correct,
        accuracy: b.accuracy,
        distribution: b
            .distribution
            .iter()
            .map(|(l, count)| ReportLabelCount {
                label: task.label_name(l),
                count: *count,
            })
            .collect(),
    });

    let binary_confusion = task.binary_confusion(board).map(|c| ReportBinaryConfusion {
        true_positive: c.true_positive,
        false_negative: c.false_negative,
        false_positive: c.false_positive,
        true_negative: c.true_negative,
        sensitivity: c.sensitivity(),
        specificity: c.specificity(),
    });

    // The 2x2 matrix already covers binary tasks.
    let confusion_table = if binary_confusion.is_some() {
        Vec::new()
    } else {
        board
            .confusion_table()
            .into_iter()
            .map(|((gt, pred), count)| ReportConfusionCell {
                ground_truth: task.label_name(&gt),
                predicted: task.label_name(&pred),
                count,
            })
            .collect()
    };

    let groups = task
        .label_groups()
        .into_iter()
        .map(|group| {
            let stats = board.group_stats(&group.members);
            let complement = board.group_stats(&group.complement);
            ReportGroup {
                name: group.name.to_string(),
                members: group.members.iter().map(|l| task.label_name(l)).collect(),
                class: ReportClass::new(group.name.to_string(), stats),
                binary_accuracy: ratio(stats.correct + complement.correct, board.total()),
            }
        })
        .collect();

    let total_ms = meta.call_time.as_millis();
    let latency = ReportLatency {
        total_ms,
        calls: meta.successful_calls,
        average_ms: if meta.successful_calls > 0 {
            total_ms as f64 / meta.successful_calls as f64
        } else {
            0.0
        },
    };

    EvalReport {
        task: task.slug().to_string(),
        provider: meta.provider.clone(),
        model: meta.model.clone(),
        started_at: meta.started_at,
        rng_seed: meta.rng_seed,
        counts: ReportCounts {
            rows: meta.rows,
            skipped: meta.skipped,
            attempted: board.total(),
            failed: board.failed(),
            unparsed: board.unparsed(),
            scored: board.scored(),
            correct: board.correct(),
        },
        accuracy: board.accuracy(),
        scored_accuracy: board.scored_accuracy(),
        balanced,
        classes,
        binary_confusion,
        confusion_table,
        groups,
        latency,
    }
}

impl ReportClass {
    fn new(label: String, stats: ClassStats) -> Self {
        Self {
            label,
            total: stats.total,
            predicted: stats.predicted,
            correct: stats.correct,
            precision: stats.precision(),
            recall: stats.recall(),
            f1: stats.f1(),
        }
    }
}

fn pct(x: f64) -> String {
    format!("{:.2}%", x * 100.0)
}

pub fn render_report_text(report: &EvalReport) -> String {
    let mut out = String::new();
    out.push_str("========== Evaluation Report ==========\n");
    out.push_str(&format!("Task: {}\n", report.task));
    out.push_str(&format!("Provider: {} ({})\n", report.provider, report.model));
    out.push_str(&format!("Started: {}\n", report.started_at.to_rfc3339()));
    if let Some(seed) = report.rng_seed {
        out.push_str(&format!("RNG seed: {}\n", seed));
    }

    let c = &report.counts;
    out.push_str(&format!(
        "Rows: {} (skipped {}), attempted {}, failed {}, unparsed {}\n",
        c.rows, c.skipped, c.attempted, c.failed, c.unparsed
    ));
    out.push_str(&format!(
        "Total time: {:.2}s, average {:.2}s over {} valid predictions\n",
        report.latency.total_ms as f64 / 1000.0,
        report.latency.average_ms / 1000.0,
        report.latency.calls
    ));
    out.push_str(&format!(
        "Accuracy: {} ({}/{})\n",
        pct(report.accuracy),
        c.correct,
        c.attempted
    ));
    out.push_str(&format!(
        "Accuracy over parsed responses: {} ({}/{})\n",
        pct(report.scored_accuracy),
        c.correct,
        c.scored
    ));
    if let Some(b) = &report.balanced {
        let dist = b
            .distribution
            .iter()
            .map(|d| format!("{}={}", d.label, d.count))
            .collect::<Vec<_>>()
            .join(", ");
        out.push_str(&format!(
            "Balanced accuracy: {} ({}/{}, {} per class: {})\n",
            pct(b.accuracy),
            b.correct,
            b.total,
            b.per_class_size,
            dist
        ));
    }

    out.push_str("\nPer class:\n");
    for class in &report.classes {
        out.push_str(&format_class(class));
    }

    if let Some(m) = &report.binary_confusion {
        out.push_str("\nConfusion matrix:\n");
        out.push_str(&format!("  TP: {}  FN: {}\n", m.true_positive, m.false_negative));
        out.push_str(&format!("  FP: {}  TN: {}\n", m.false_positive, m.true_negative));
        out.push_str(&format!(
            "  Sensitivity: {}  Specificity: {}\n",
            pct(m.sensitivity),
            pct(m.specificity)
        ));
    }

    if !report.confusion_table.is_empty() {
        out.push_str("\nPredictions by ground truth:\n");
        for cell in &report.confusion_table {
            let mark = if cell.ground_truth == cell.predicted {
                "correct"
            } else {
                "incorrect"
            };
            out.push_str(&format!(
                "  {} -> {}: {} ({})\n",
                cell.ground_truth, cell.predicted, cell.count, mark
            ));
        }
    }

    for group in &report.groups {
        out.push_str(&format!(
            "\nGroup {} = {{{}}}:\n",
            group.name,
            group.members.join(", ")
        ));
        out.push_str(&format_class(&group.class));
        out.push_str(&format!("  Two-way accuracy: {}\n", pct(group.binary_accuracy)));
    }

    out
}

fn format_class(class: &ReportClass) -> String {
    format!(
        "  {}: {}/{} correct, predicted {}, precision {}, recall {}, F1 {}\n",
        class.label,
        class.correct,
        class.total,
        class.predicted,
        pct(class.precision),
        pct(class.recall),
        pct(class.f1)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::{CoDetectorTask, GazeDirection, GazeDirectionTask};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn meta() -> RunMeta {
        RunMeta {
            provider: "lmstudio".to_string(),
            model: "local-model".to_string(),
            started_at: Utc::now(),
            rng_seed: Some(7),
            rows: 6,
            skipped: 1,
            call_time: Duration::from_millis(4000),
            successful_calls: 4,
        }
    }

    #[test]
    fn test_binary_report() {
        let task = CoDetectorTask;
        let mut board = Scoreboard::new(task.labels());
        board.record(true, Some(true));
        board.record(true, Some(false));
        board.record(false, Some(false));
        board.record(false, None);
        board.record_failure(false);

        let report = build_report(&task, &board, &meta(), &mut StdRng::seed_from_u64(7));
        assert_eq!(report.counts.attempted, 5);
        assert_eq!(report.counts.scored, 3);
        assert_eq!(report.counts.failed, 1);
        assert_eq!(report.counts.unparsed, 1);
        assert!((report.accuracy - 0.4).abs() < 1e-9);
        let m = report.binary_confusion.as_ref().unwrap();
        assert_eq!((m.true_positive, m.false_negative), (1, 1));
        assert_eq!((m.false_positive, m.true_negative), (0, 1));
        assert!(report.confusion_table.is_empty());
        assert!(report.groups.is_empty());
        assert!((report.latency.average_ms - 1000.0).abs() < 1e-9);

        let text = render_report_text(&report);
        assert!(text.contains("Accuracy: 40.00% (2/5)"));
        assert!(text.contains("Sensitivity: 50.00%  Specificity: 100.00%"));
    }

    #[test]
    fn test_gaze_report_groups() {
        use GazeDirection::*;
        let task = GazeDirectionTask;
        let mut board = Scoreboard::new(task.labels());
        board.record(Upstream, Some(Upstream));
        board.record(Downstream, Some(ClearlyDiverted));
        board.record(ClearlyDiverted, Some(ClearlyDiverted));
        board.record(Downstream, Some(Upstream));

        let report = build_report(&task, &board, &meta(), &mut StdRng::seed_from_u64(1));
        assert!(report.binary_confusion.is_none());
        assert!(!report.confusion_table.is_empty());

        let group = &report.groups[0];
        assert_eq!(group.name, "not-upstream");
        assert_eq!(group.class.total, 3);
        assert_eq!(group.class.correct, 2);
        // upstream 1 + not-upstream 2 over 4 samples
        assert!((group.binary_accuracy - 0.75).abs() < 1e-9);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["task"], "gaze_direction");
        assert_eq!(json["groups"][0]["members"][1], "clearly_diverted");
        assert!(json.get("binary_confusion").is_none());

        let text = render_report_text(&report);
        assert!(text.contains("Group not-upstream = {downstream, clearly_diverted}"));
        assert!(text.contains("downstream -> upstream: 1 (incorrect)"));
    }
}
