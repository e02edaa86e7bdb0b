// CART regression trees. The criterion decides what a node is split on,
// so the causal forest can hand out pseudo-outcomes per node.

use ndarray::{ArrayView1, ArrayView2};

// Supplies the values a node is split on and the value a leaf predicts.
pub trait SplitCriterion {
    // One value per entry of `samples`, in the same order.
    fn node_targets(&self, samples: &[usize]) -> Vec<f64>;

    fn leaf_value(&self, samples: &[usize]) -> f64;
}

// Ordinary least-squares regression on fixed targets.
pub struct SquaredError<'a> {
    targets: &'a [f64],
}

impl<'a> SquaredError<'a> {
    pub fn new(targets: &'a [f64]) -> Self {
        Self { targets }
    }
}

impl SplitCriterion for SquaredError<'_> {
    fn node_targets(&self, samples: &[usize]) -> Vec<f64> {
        samples.iter().map(|&i| self.targets[i]).collect()
    }

    fn leaf_value(&self, samples: &[usize]) -> f64 {
        if samples.is_empty() {
            return 0.0;
        }
        samples.iter().map(|&i| self.targets[i]).sum::<f64>() / samples.len() as f64
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TreeParams {
    // `None` means no depth limit.
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
}

#[derive(Debug, Clone)]
enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

struct SplitChoice {
    feature: usize,
    threshold: f64,
}

#[derive(Debug, Clone)]
pub struct RegressionTree {
    nodes: Vec<Node>,
}

impl RegressionTree {
    // Grows a tree on the rows of `x` listed in `samples`.
    pub fn fit<C: SplitCriterion>(
        x: ArrayView2<f64>,
        samples: &[usize],
        criterion: &C,
        params: &TreeParams,
    ) -> Self {
        let mut tree = Self { nodes: Vec::new() };
        tree.grow(x, samples.to_vec(), criterion, params, 0);
        tree
    }

    fn grow<C: SplitCriterion>(
        &mut self,
        x: ArrayView2<f64>,
        samples: Vec<usize>,
        criterion: &C,
        params: &TreeParams,
        depth: usize,
    ) -> usize {
        let id = self.nodes.len();
        self.nodes.push(Node::Leaf {
            value: criterion.leaf_value(&samples),
        });

        let depth_ok = params.max_depth.map_or(true, |max| depth < max);
        let size_ok = samples.len() >= params.min_samples_split.max(2)
            && samples.len() >= 2 * params.min_samples_leaf;
        if !(depth_ok && size_ok) {
            return id;
        }

        let targets = criterion.node_targets(&samples);
        let Some(choice) = best_split(x, &samples, &targets, params.min_samples_leaf) else {
            return id;
        };
        let (left, right): (Vec<usize>, Vec<usize>) = samples
            .iter()
            .partition(|&&i| x[[i, choice.feature]] <= choice.threshold);

        let left = self.grow(x, left, criterion, params, depth + 1);
        let right = self.grow(x, right, criterion, params, depth + 1);
        self.nodes[id] = Node::Split {
            feature: choice.feature,
            threshold: choice.threshold,
            left,
            right,
        };
        id
    }

    // Index of the leaf node that `row` falls into.
    pub fn leaf(&self, row: ArrayView1<f64>) -> usize {
        let mut id = 0;
        loop {
            match &self.nodes[id] {
                Node::Leaf { .. } => return id,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    id = if row[*feature] <= *threshold {
                        *left
                    } else {
                        *right
                    };
                }
            }
        }
    }

    pub fn predict_row(&self, row: ArrayView1<f64>) -> f64 {
        match &self.nodes[self.leaf(row)] {
            Node::Leaf { value } => *value,
            Node::Split { .. } => unreachable!("leaf() always stops on a leaf"),
        }
    }

    pub fn n_leaves(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| matches!(n, Node::Leaf { .. }))
            .count()
    }
}

// Exhaustive search over features and cut points. Returns `None` when no
// admissible split reduces the squared error.
fn best_split(
    x: ArrayView2<f64>,
    samples: &[usize],
    targets: &[f64],
    min_samples_leaf: usize,
) -> Option<SplitChoice> {
    let n = samples.len();
    let min_leaf = min_samples_leaf.max(1);
    let total: f64 = targets.iter().sum();
    let base = total * total / n as f64;
    let scale: f64 = targets.iter().map(|t| t * t).sum();
    let mut best_gain = 1e-12 * scale;
    let mut best: Option<SplitChoice> = None;

    let mut order: Vec<usize> = (0..n).collect();
    for feature in 0..x.ncols() {
        order.sort_by(|&a, &b| x[[samples[a], feature]].total_cmp(&x[[samples[b], feature]]));
        let mut left_sum = 0.0;
        for k in 1..n {
            left_sum += targets[order[k - 1]];
            if k < min_leaf || n - k < min_leaf {
                continue;
            }
            let lo = x[[samples[order[k - 1]], feature]];
            let hi = x[[samples[order[k]], feature]];
            if lo >= hi {
                continue;
            }
            let right_sum = total - left_sum;
            let gain = left_sum * left_sum / k as f64
                + right_sum * right_sum / (n - k) as f64
                - base;
            if gain > best_gain {
                let mid = lo + (hi - lo) / 2.0;
                best_gain = gain;
                best = Some(SplitChoice {
                    feature,
                    threshold: if mid < hi { mid } else { lo },
                });
            }
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::{array, Array2};

    fn params(min_leaf: usize) -> TreeParams {
        TreeParams {
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: min_leaf,
        }
    }

    #[test]
    fn recovers_a_step_function() {
        let x = array![[0.0], [1.0], [2.0], [3.0], [4.0], [5.0]];
        let y = [1.0, 1.0, 1.0, 5.0, 5.0, 5.0];
        let samples: Vec<usize> = (0..6).collect();
        let tree = RegressionTree::fit(x.view(), &samples, &SquaredError::new(&y), &params(1));

        assert_eq!(tree.n_leaves(), 2);
        assert_relative_eq!(tree.predict_row(array![0.5].view()), 1.0);
        assert_relative_eq!(tree.predict_row(array![4.5].view()), 5.0);
    }

    #[test]
    fn picks_the_informative_feature() {
        let x = array![[9.0, 0.0], [1.0, 0.0], [5.0, 1.0], [3.0, 1.0]];
        let y = [0.0, 0.0, 10.0, 10.0];
        let samples: Vec<usize> = (0..4).collect();
        let tree = RegressionTree::fit(x.view(), &samples, &SquaredError::new(&y), &params(1));

        assert_eq!(tree.n_leaves(), 2);
        assert_relative_eq!(tree.predict_row(array![100.0, 0.0].view()), 0.0);
        assert_relative_eq!(tree.predict_row(array![-100.0, 1.0].view()), 10.0);
    }

    #[test]
    fn respects_leaf_and_depth_limits() {
        let x = Array2::from_shape_fn((8, 1), |(i, _)| i as f64);
        let y: Vec<f64> = (0..8).map(|i| (i * i) as f64).collect();
        let samples: Vec<usize> = (0..8).collect();

        let shallow = TreeParams {
            max_depth: Some(1),
            ..params(1)
        };
        let tree = RegressionTree::fit(x.view(), &samples, &SquaredError::new(&y), &shallow);
        assert_eq!(tree.n_leaves(), 2);

        let tree = RegressionTree::fit(x.view(), &samples, &SquaredError::new(&y), &params(4));
        assert_eq!(tree.n_leaves(), 2);
    }

    #[test]
    fn constant_targets_stay_a_single_leaf() {
        let x = array![[0.0], [1.0], [2.0], [3.0]];
        let y = [2.0; 4];
        let samples: Vec<usize> = (0..4).collect();
        let tree = RegressionTree::fit(x.view(), &samples, &SquaredError::new(&y), &params(1));
        assert_eq!(tree.n_leaves(), 1);
        assert_relative_eq!(tree.predict_row(array![7.0].view()), 2.0);
    }

    #[test]
    fn fits_on_a_subset_of_rows() {
        let x = array![[0.0], [1.0], [2.0], [3.0]];
        let y = [0.0, 100.0, 0.0, 100.0];
        let tree = RegressionTree::fit(x.view(), &[0, 2], &SquaredError::new(&y), &params(1));
        assert_eq!(tree.n_leaves(), 1);
        assert_relative_eq!(tree.predict_row(array![3.0].view()), 0.0);
    }
}
