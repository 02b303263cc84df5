use super::tfidf::SparseRow;
use super::TrainingError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Smallest impurity decrease that counts as an improvement.
const MIN_IMPURITY_DECREASE: f64 = 1e-12;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Node {
    Leaf {
        class: usize,
    },
    /// Rows with `value <= threshold` go left.
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

/// CART classifier over sparse rows, Gini impurity, grown until leaves are
/// pure or no split helps. Nodes live in an arena; index 0 is the root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTree {
    nodes: Vec<Node>,
}

struct Candidate {
    feature: usize,
    threshold: f64,
    impurity: f64,
}

impl DecisionTree {
    pub fn fit(
        rows: &[SparseRow],
        targets: &[usize],
        n_classes: usize,
    ) -> Result<Self, TrainingError> {
        if rows.is_empty() {
            return Err(TrainingError::EmptyCorpus);
        }
        if rows.len() != targets.len() {
            return Err(TrainingError::Fit(format!(
                "{} rows but {} targets",
                rows.len(),
                targets.len()
            )));
        }
        if n_classes == 0 {
            return Err(TrainingError::Fit("no classes to learn".to_string()));
        }
        if let Some(bad) = targets.iter().find(|&&t| t >= n_classes) {
            return Err(TrainingError::Fit(format!(
                "target {} out of range for {} classes",
                bad, n_classes
            )));
        }

        let mut nodes = vec![Node::Leaf { class: 0 }];
        let mut pending: Vec<(usize, Vec<usize>)> = vec![(0, (0..rows.len()).collect())];

        while let Some((slot, samples)) = pending.pop() {
            let counts = class_counts(&samples, targets, n_classes);
            let class = majority(&counts);

            let split = if counts.iter().filter(|&&c| c > 0).count() > 1 {
                best_split(rows, targets, &samples, &counts)
            } else {
                None
            };

            let Some(split) = split else {
                nodes[slot] = Node::Leaf { class };
                continue;
            };

            let (left_samples, right_samples): (Vec<usize>, Vec<usize>) = samples
                .iter()
                .partition(|&&s| feature_value(&rows[s], split.feature) <= split.threshold);

            let left = nodes.len();
            nodes.push(Node::Leaf { class });
            let right = nodes.len();
            nodes.push(Node::Leaf { class });

            nodes[slot] = Node::Split {
                feature: split.feature,
                threshold: split.threshold,
                left,
                right,
            };
            pending.push((right, right_samples));
            pending.push((left, left_samples));
        }

        Ok(DecisionTree { nodes })
    }

    pub fn predict(&self, row: &SparseRow) -> usize {
        let mut idx = 0;
        loop {
            match self.nodes[idx] {
                Node::Leaf { class } => return class,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if feature_value(row, feature) <= threshold {
                        left
                    } else {
                        right
                    };
                }
            }
        }
    }

    /// Every child comes after its parent and inside the arena, and every
    /// leaf names one of `n_classes`. A tree built by [`DecisionTree::fit`]
    /// always passes.
    pub fn validate(&self, n_classes: usize) -> Result<(), String> {
        if self.nodes.is_empty() {
            return Err("tree has no nodes".to_string());
        }
        for (idx, node) in self.nodes.iter().enumerate() {
            match *node {
                Node::Leaf { class } if class >= n_classes => {
                    return Err(format!(
                        "leaf {} predicts class {} of {}",
                        idx, class, n_classes
                    ));
                }
                Node::Leaf { .. } => {}
                Node::Split { left, right, .. } => {
                    if let Some(child) = [left, right]
                        .into_iter()
                        .find(|&c| c <= idx || c >= self.nodes.len())
                    {
                        return Err(format!("node {} points at node {}", idx, child));
                    }
                }
            }
        }
        Ok(())
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn depth(&self) -> usize {
        let mut deepest = 0;
        let mut stack = vec![(0usize, 0usize)];
        while let Some((idx, depth)) = stack.pop() {
            deepest = deepest.max(depth);
            if let Node::Split { left, right, .. } = self.nodes[idx] {
                stack.push((left, depth + 1));
                stack.push((right, depth + 1));
            }
        }
        deepest
    }
}

fn feature_value(row: &SparseRow, feature: usize) -> f64 {
    match row.binary_search_by_key(&feature, |(idx, _)| *idx) {
        Ok(pos) => row[pos].1,
        Err(_) => 0.0,
    }
}

fn class_counts(samples: &[usize], targets: &[usize], n_classes: usize) -> Vec<usize> {
    let mut counts = vec![0; n_classes];
    for &s in samples {
        counts[targets[s]] += 1;
    }
    counts
}

/// Most frequent class; ties go to the lowest index.
fn majority(counts: &[usize]) -> usize {
    let mut best = 0;
    for (class, &count) in counts.iter().enumerate() {
        if count > counts[best] {
            best = class;
        }
    }
    best
}

fn gini(counts: &[usize], total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let total = total as f64;
    1.0 - counts
        .iter()
        .map(|&c| {
            let p = c as f64 / total;
            p * p
        })
        .sum::<f64>()
}

/// Scan features in ascending index order; the first split with the lowest
/// weighted impurity wins. Returns `None` when nothing beats the parent.
fn best_split(
    rows: &[SparseRow],
    targets: &[usize],
    samples: &[usize],
    counts: &[usize],
) -> Option<Candidate> {
    let n = samples.len();
    let parent = gini(counts, n);

    // features that are zero for every sample here cannot split them
    let features: BTreeSet<usize> = samples
        .iter()
        .flat_map(|&s| rows[s].iter().map(|(idx, _)| *idx))
        .collect();

    let mut best: Option<Candidate> = None;
    let mut best_impurity = parent - MIN_IMPURITY_DECREASE;

    for feature in features {
        let mut column: Vec<(f64, usize)> = samples
            .iter()
            .map(|&s| (feature_value(&rows[s], feature), targets[s]))
            .collect();
        column.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut left = vec![0usize; counts.len()];
        let mut right = counts.to_vec();

        for i in 0..n - 1 {
            let (value, class) = column[i];
            left[class] += 1;
            right[class] -= 1;

            let next = column[i + 1].0;
            if next <= value {
                continue;
            }

            let n_left = i + 1;
            let n_right = n - n_left;
            let impurity = (n_left as f64 * gini(&left, n_left)
                + n_right as f64 * gini(&right, n_right))
                / n as f64;

            if impurity < best_impurity {
                best_impurity = impurity;
                best = Some(Candidate {
                    feature,
                    threshold: value + (next - value) / 2.0,
                    impurity,
                });
            }
        }
    }

    if let Some(found) = &best {
        tracing::trace!(
            feature = found.feature,
            threshold = found.threshold,
            impurity = found.impurity,
            samples = n,
            "Chose split"
        );
    }
    best
}
