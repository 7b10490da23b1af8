//! Hierarchical clustering of assets by correlation distance.
//!
//! Builds a single-linkage dendrogram over `d = sqrt(0.5 (1 - ρ))` and exposes the
//! leaf order used to quasi-diagonalize the covariance matrix before HRP bisection.

use ndarray::Array2;

/// Distances closer than this are considered tied.
const TIE_TOLERANCE: f64 = 1e-12;

/// Binary merge tree over asset indices.
#[derive(Debug, Clone, PartialEq)]
pub enum Dendrogram {
    Leaf(usize),
    Node {
        left: Box<Dendrogram>,
        right: Box<Dendrogram>,
        distance: f64,
    },
}

impl Dendrogram {
    /// Asset indices in left-to-right leaf order.
    pub fn leaves(&self) -> Vec<usize> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves(&self, out: &mut Vec<usize>) {
        match self {
            Dendrogram::Leaf(idx) => out.push(*idx),
            Dendrogram::Node { left, right, .. } => {
                left.collect_leaves(out);
                right.collect_leaves(out);
            }
        }
    }
}

/// Correlation distance matrix, `sqrt(0.5 (1 - ρ))`, in `[0, 1]`.
pub fn correlation_distance(correlation: &Array2<f64>) -> Array2<f64> {
    correlation.mapv(|rho| (0.5 * (1.0 - rho.clamp(-1.0, 1.0))).max(0.0).sqrt())
}

struct Cluster {
    members: Vec<usize>,
    tree: Dendrogram,
}

/// Agglomerate assets with single linkage.
///
/// At each step the two clusters with the smallest minimum pairwise distance are
/// merged. Ties go to the lexicographically smaller pair of member-index lists.
/// Returns `None` for an empty matrix.
pub fn single_linkage(distance: &Array2<f64>) -> Option<Dendrogram> {
    let n = distance.nrows();
    if n == 0 {
        return None;
    }

    let mut clusters: Vec<Cluster> = (0..n)
        .map(|i| Cluster {
            members: vec![i],
            tree: Dendrogram::Leaf(i),
        })
        .collect();

    while clusters.len() > 1 {
        let mut best: Option<(usize, usize, f64)> = None;

        for a in 0..clusters.len() {
            for b in (a + 1)..clusters.len() {
                // Order the pair so the smaller member list comes first
                let (lo, hi) = if clusters[a].members <= clusters[b].members {
                    (a, b)
                } else {
                    (b, a)
                };
                let d = linkage_distance(distance, &clusters[lo].members, &clusters[hi].members);

                let better = match best {
                    None => true,
                    Some((best_lo, best_hi, best_d)) => {
                        if d < best_d - TIE_TOLERANCE {
                            true
                        } else if (d - best_d).abs() <= TIE_TOLERANCE {
                            (&clusters[lo].members, &clusters[hi].members)
                                < (&clusters[best_lo].members, &clusters[best_hi].members)
                        } else {
                            false
                        }
                    }
                };

                if better {
                    best = Some((lo, hi, d));
                }
            }
        }

        let (lo, hi, d) = best?;

        // Remove the higher index first so the lower one stays valid
        let (first, second) = if lo > hi { (lo, hi) } else { (hi, lo) };
        let removed_first = clusters.swap_remove(first);
        let removed_second = clusters.swap_remove(second);
        let (left, right) = if lo > hi {
            (removed_first, removed_second)
        } else {
            (removed_second, removed_first)
        };

        let mut members = left.members.clone();
        members.extend(right.members.iter().copied());
        members.sort_unstable();

        clusters.push(Cluster {
            members,
            tree: Dendrogram::Node {
                left: Box::new(left.tree),
                right: Box::new(right.tree),
                distance: d,
            },
        });
    }

    clusters.pop().map(|c| c.tree)
}

fn linkage_distance(distance: &Array2<f64>, a: &[usize], b: &[usize]) -> f64 {
    let mut min = f64::INFINITY;
    for &i in a {
        for &j in b {
            let d = distance[[i, j]];
            if d < min {
                min = d;
            }
        }
    }
    min
}

/// Leaf order of the single-linkage tree over the correlation distances.
pub fn quasi_diagonal_order(correlation: &Array2<f64>) -> Vec<usize> {
    single_linkage(&correlation_distance(correlation))
        .map(|tree| tree.leaves())
        .unwrap_or_default()
}
