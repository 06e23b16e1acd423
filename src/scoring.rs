//! Per-class scoring for classification runs.
//!
//! [`Scoreboard`] keeps raw counters only. Precision, recall, F1, confusion
//! matrices and grouped views are computed from those counters on demand.

use std::collections::BTreeMap;

use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;

/// Raw counters for one label.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ClassStats {
    /// Samples whose ground truth is this label.
    pub total: usize,
    /// Samples with this ground truth that were predicted correctly.
    pub correct: usize,
    /// Samples the model assigned to this label.
    pub predicted: usize,
}

impl ClassStats {
    pub fn precision(&self) -> f64 {
        ratio(self.correct, self.predicted)
    }

    pub fn recall(&self) -> f64 {
        ratio(self.correct, self.total)
    }

    pub fn f1(&self) -> f64 {
        let p = self.precision();
        let r = self.recall();
        if p + r > 0.0 {
            2.0 * p * r / (p + r)
        } else {
            0.0
        }
    }
}

/// One scored sample, kept for resampling and confusion tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoredResult<L> {
    pub ground_truth: L,
    pub predicted: L,
    pub is_correct: bool,
}

/// 2x2 confusion matrix for a boolean task, `true` being the positive class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BinaryConfusion {
    pub true_positive: usize,
    pub false_negative: usize,
    pub false_positive: usize,
    pub true_negative: usize,
}

impl BinaryConfusion {
    pub fn sensitivity(&self) -> f64 {
        ratio(self.true_positive, self.true_positive + self.false_negative)
    }

    pub fn specificity(&self) -> f64 {
        ratio(self.true_negative, self.true_negative + self.false_positive)
    }
}

/// Accuracy over an equal-size random draw from each ground-truth class.
#[derive(Debug, Clone, PartialEq)]
pub struct BalancedAccuracy<L> {
    /// Size of the smallest ground-truth group; the per-class draw size.
    pub per_class_size: usize,
    pub total: usize,
    pub correct: usize,
    pub accuracy: f64,
    /// Samples drawn per label, in label order.
    pub distribution: Vec<(L, usize)>,
}

#[derive(Debug, Clone)]
pub struct Scoreboard<L> {
    labels: Vec<L>,
    stats: BTreeMap<L, ClassStats>,
    results: Vec<ScoredResult<L>>,
    correct: usize,
    unparsed: usize,
    failed: usize,
}

impl<L: Ord + Clone> Scoreboard<L> {
    /// Create a scoreboard with a fixed label order for reporting.
    pub fn new(labels: impl IntoIterator<Item = L>) -> Self {
        let labels: Vec<L> = labels.into_iter().collect();
        let stats = labels
            .iter()
            .cloned()
            .map(|l| (l, ClassStats::default()))
            .collect();
        Self {
            labels,
            stats,
            results: Vec::new(),
            correct: 0,
            unparsed: 0,
            failed: 0,
        }
    }

    fn stats_mut(&mut self, label: &L) -> &mut ClassStats {
        if !self.stats.contains_key(label) {
            self.labels.push(label.clone());
        }
        self.stats.entry(label.clone()).or_default()
    }

    /// Record one sample. `predicted` is `None` when the response could not be
    /// parsed; such a sample counts toward `total` only.
    ///
    /// Returns whether the prediction was correct, or `None` if unparsed.
    pub fn record(&mut self, ground_truth: L, predicted: Option<L>) -> Option<bool> {
        self.stats_mut(&ground_truth).total += 1;

        let Some(predicted) = predicted else {
            self.unparsed += 1;
            return None;
        };

        self.stats_mut(&predicted).predicted += 1;
        let is_correct = predicted == ground_truth;
        if is_correct {
            self.stats_mut(&ground_truth).correct += 1;
            self.correct += 1;
        }
        self.results.push(ScoredResult {
            ground_truth,
            predicted,
            is_correct,
        });
        Some(is_correct)
    }

    /// Record a sample whose model call failed before any response arrived.
    pub fn record_failure(&mut self, ground_truth: L) {
        self.stats_mut(&ground_truth).total += 1;
        self.failed += 1;
    }

    pub fn labels(&self) -> &[L] {
        &self.labels
    }

    pub fn stats(&self, label: &L) -> ClassStats {
        self.stats.get(label).copied().unwrap_or_default()
    }

    pub fn results(&self) -> &[ScoredResult<L>] {
        &self.results
    }

    /// Samples with a valid ground truth, scored or not.
    pub fn total(&self) -> usize {
        self.stats.values().map(|s| s.total).sum()
    }

    /// Samples that produced a prediction.
    pub fn scored(&self) -> usize {
        self.results.len()
    }

    pub fn correct(&self) -> usize {
        self.correct
    }

    pub fn unparsed(&self) -> usize {
        self.unparsed
    }

    pub fn failed(&self) -> usize {
        self.failed
    }

    /// Correct predictions over every sample with a ground truth.
    pub fn accuracy(&self) -> f64 {
        ratio(self.correct, self.total())
    }

    /// Correct predictions over samples that produced a prediction.
    pub fn scored_accuracy(&self) -> f64 {
        ratio(self.correct, self.scored())
    }

    /// Counts of `(ground_truth, predicted)` pairs.
    pub fn confusion_table(&self) -> BTreeMap<(L, L), usize> {
        let mut table = BTreeMap::new();
        for r in &self.results {
            *table
                .entry((r.ground_truth.clone(), r.predicted.clone()))
                .or_insert(0) += 1;
        }
        table
    }

    /// Stats for a set of labels treated as a single class.
    ///
    /// A sample is correct for the group when both its ground truth and its
    /// prediction fall inside the group.
    pub fn group_stats(&self, members: &[L]) -> ClassStats {
        let total = members.iter().map(|l| self.stats(l).total).sum();
        let predicted = members.iter().map(|l| self.stats(l).predicted).sum();
        let correct = self
            .results
            .iter()
            .filter(|r| members.contains(&r.ground_truth) && members.contains(&r.predicted))
            .count();
        ClassStats {
            total,
            correct,
            predicted,
        }
    }

    /// Accuracy after down-sampling every ground-truth class to the size of the
    /// smallest one. `None` when nothing was scored.
    pub fn balanced_accuracy<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<BalancedAccuracy<L>> {
        let groups: Vec<(L, Vec<&ScoredResult<L>>)> = self
            .labels
            .iter()
            .map(|label| {
                let members = self
                    .results
                    .iter()
                    .filter(|r| &r.ground_truth == label)
                    .collect::<Vec<_>>();
                (label.clone(), members)
            })
            .filter(|(_, members)| !members.is_empty())
            .collect();

        let per_class_size = groups.iter().map(|(_, m)| m.len()).min()?;

        let mut total = 0;
        let mut correct = 0;
        let mut distribution = Vec::with_capacity(groups.len());
        for (label, members) in &groups {
            let drawn: Vec<&&ScoredResult<L>> = if members.len() > per_class_size {
                members.choose_multiple(rng, per_class_size).collect()
            } else {
                members.iter().collect()
            };
            total += drawn.len();
            correct += drawn.iter().filter(|r| r.is_correct).count();
            distribution.push((label.clone(), drawn.len()));
        }

        Some(BalancedAccuracy {
            per_class_size,
            total,
            correct,
            accuracy: ratio(correct, total),
            distribution,
        })
    }
}

impl Scoreboard<bool> {
    /// Confusion matrix with `true` as the positive class.
    pub fn binary_confusion(&self) -> BinaryConfusion {
        let pos = self.stats(&true);
        let neg = self.stats(&false);
        BinaryConfusion {
            true_positive: pos.correct,
            false_negative: pos.total.saturating_sub(pos.correct),
            false_positive: pos.predicted.saturating_sub(pos.correct),
            true_negative: neg.correct,
        }
    }
}

pub(crate) fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn scenario() -> Scoreboard<bool> {
        let mut board = Scoreboard::new([true, false]);
        let truth = [true, true, false, false, false];
        let preds = [true, false, false, false, true];
        for (gt, p) in truth.into_iter().zip(preds) {
            board.record(gt, Some(p));
        }
        board
    }

    #[test]
    fn test_binary_scenario_counts() {
        let board = scenario();
        assert_eq!(board.correct(), 3);
        assert_eq!(
            board.stats(&true),
            ClassStats {
                total: 2,
                correct: 1,
                predicted: 2
            }
        );
        assert_eq!(
            board.stats(&false),
            ClassStats {
                total: 3,
                correct: 2,
                predicted: 3
            }
        );
        assert_eq!(
            board.binary_confusion(),
            BinaryConfusion {
                true_positive: 1,
                false_negative: 1,
                false_positive: 1,
                true_negative: 2
            }
        );
    }

    #[test]
    fn test_confusion_identities() {
        let board = scenario();
        let cm = board.binary_confusion();
        assert_eq!(cm.true_positive + cm.false_negative, board.stats(&true).total);
        assert_eq!(cm.true_positive + cm.false_positive, board.stats(&true).predicted);
        assert!((cm.sensitivity() - 0.5).abs() < 1e-9);
        assert!((cm.specificity() - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_derived_metrics() {
        let board = scenario();
        let t = board.stats(&true);
        assert!((t.precision() - 0.5).abs() < 1e-9);
        assert!((t.recall() - 0.5).abs() < 1e-9);
        assert!((t.f1() - 0.5).abs() < 1e-9);

        let empty = ClassStats::default();
        assert_eq!(empty.precision(), 0.0);
        assert_eq!(empty.recall(), 0.0);
        assert_eq!(empty.f1(), 0.0);
    }

    #[test]
    fn test_unparsed_counts_toward_total_only() {
        let mut board = Scoreboard::new([true, false]);
        assert_eq!(board.record(true, None), None);
        assert_eq!(board.total(), 1);
        assert_eq!(board.scored(), 0);
        assert_eq!(board.unparsed(), 1);
        assert_eq!(board.stats(&true).predicted + board.stats(&false).predicted, 0);
        assert_eq!(board.correct(), 0);

        board.record_failure(false);
        assert_eq!(board.total(), 2);
        assert_eq!(board.failed(), 1);
        assert_eq!(board.accuracy(), 0.0);
    }

    #[test]
    fn test_totals_sum_to_sample_count() {
        let mut board = Scoreboard::new(["a", "b", "c"]);
        let samples = [("a", Some("a")), ("b", None), ("c", Some("a")), ("a", Some("c"))];
        for (gt, p) in samples {
            board.record(gt, p);
        }
        board.record_failure("b");
        let sum: usize = board.labels().iter().map(|l| board.stats(l).total).sum();
        assert_eq!(sum, 5);
        assert_eq!(board.total(), 5);
    }

    #[test]
    fn test_group_stats() {
        let mut board = Scoreboard::new(["upstream", "downstream", "clearly_diverted"]);
        board.record("upstream", Some("upstream"));
        board.record("downstream", Some("clearly_diverted"));
        board.record("clearly_diverted", Some("clearly_diverted"));
        board.record("downstream", Some("upstream"));
        board.record("upstream", Some("downstream"));

        let group = board.group_stats(&["downstream", "clearly_diverted"]);
        assert_eq!(
            group,
            ClassStats {
                total: 3,
                correct: 2,
                predicted: 3
            }
        );

        let table = board.confusion_table();
        assert_eq!(table[&("downstream", "clearly_diverted")], 1);
        assert_eq!(table[&("upstream", "upstream")], 1);
    }

    #[test]
    fn test_balanced_accuracy_bounds() {
        let mut board = Scoreboard::new(["a", "b", "c"]);
        for i in 0..10 {
            board.record("a", Some(if i % 2 == 0 { "a" } else { "b" }));
        }
        for _ in 0..3 {
            board.record("b", Some("b"));
        }
        for _ in 0..5 {
            board.record("c", Some("a"));
        }

        let mut rng = StdRng::seed_from_u64(7);
        let balanced = board.balanced_accuracy(&mut rng).unwrap();
        assert_eq!(balanced.per_class_size, 3);
        assert!(balanced.total <= 3 * balanced.per_class_size);
        for (_, n) in &balanced.distribution {
            assert!(*n <= balanced.per_class_size);
        }
        assert_eq!(balanced.total, 9);
        // b is always right, c always wrong, a contributes 0..=3.
        assert!(balanced.correct >= 3 && balanced.correct <= 6);
    }

    #[test]
    fn test_balanced_accuracy_is_deterministic_with_seed() {
        let mut board = Scoreboard::new([true, false]);
        for i in 0..20 {
            board.record(true, Some(i % 3 == 0));
        }
        for _ in 0..4 {
            board.record(false, Some(false));
        }
        let a = board.balanced_accuracy(&mut StdRng::seed_from_u64(1)).unwrap();
        let b = board.balanced_accuracy(&mut StdRng::seed_from_u64(1)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_balanced_accuracy_empty() {
        let board: Scoreboard<bool> = Scoreboard::new([true, false]);
        assert!(board.balanced_accuracy(&mut StdRng::seed_from_u64(0)).is_none());
    }
}
