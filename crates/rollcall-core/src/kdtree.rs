//! Exact nearest-neighbour index over embeddings.
//!
//! A k-d tree whose nodes live in a flat arena. Each node splits on the axis
//! with the widest spread among the points beneath it, at the median. Queries
//! are exact: pruning only skips subtrees that cannot hold a closer point.
//! Ties on distance go to the lowest point index, so results agree with a
//! linear argmin over the same points.

use crate::types::squared_distance;

#[derive(Debug, Clone, Copy)]
struct Node {
    point: usize,
    axis: usize,
    left: Option<usize>,
    right: Option<usize>,
}

/// Closest point to a query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    /// Position of the point in insertion order.
    pub index: usize,
    /// Euclidean distance to the query.
    pub distance: f32,
}

#[derive(Debug, Clone, Default)]
pub struct KdTree {
    points: Vec<Vec<f32>>,
    nodes: Vec<Node>,
    root: Option<usize>,
}

impl KdTree {
    /// Build a balanced tree over `points`. Point `i` keeps index `i`.
    pub fn build(points: Vec<Vec<f32>>) -> Self {
        let mut order: Vec<usize> = (0..points.len()).collect();
        let mut nodes = Vec::with_capacity(points.len());
        let root = build_subtree(&points, &mut order, &mut nodes);
        Self { points, nodes, root }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Append a point as a new leaf and return its index.
    ///
    /// When the new leaf lands deeper than twice the depth of a balanced tree
    /// (plus slack) the whole tree is rebuilt. Point indices are unchanged.
    pub fn insert(&mut self, point: Vec<f32>) -> usize {
        let index = self.points.len();
        self.points.push(point);
        let slot = self.nodes.len();
        let mut depth = 0usize;
        let axis = match self.root {
            None => 0,
            Some(root) => {
                let mut current = root;
                loop {
                    depth += 1;
                    let node = self.nodes[current];
                    let goes_left =
                        coord(&self.points[index], node.axis) < coord(&self.points[node.point], node.axis);
                    let next = if goes_left { node.left } else { node.right };
                    match next {
                        Some(child) => current = child,
                        None => {
                            if goes_left {
                                self.nodes[current].left = Some(slot);
                            } else {
                                self.nodes[current].right = Some(slot);
                            }
                            let dim = self.points[index].len().max(1);
                            break (node.axis + 1) % dim;
                        }
                    }
                }
            }
        };
        self.nodes.push(Node {
            point: index,
            axis,
            left: None,
            right: None,
        });
        if self.root.is_none() {
            self.root = Some(slot);
        }

        if depth > max_depth(self.points.len()) {
            tracing::debug!(points = self.points.len(), depth, "k-d tree unbalanced; rebuilding");
            *self = Self::build(std::mem::take(&mut self.points));
        }
        index
    }

    /// Closest point to `query`, or `None` when the tree is empty.
    pub fn nearest(&self, query: &[f32]) -> Option<Neighbor> {
        self.nearest_where(query, |_| true)
    }

    /// Closest point to `query` among those whose index satisfies `accept`.
    pub fn nearest_where<F>(&self, query: &[f32], accept: F) -> Option<Neighbor>
    where
        F: Fn(usize) -> bool,
    {
        let mut best: Option<(f32, usize)> = None;
        // (slot, squared distance from the query to the slot's region bound)
        let mut pending: Vec<(usize, f32)> = self.root.map(|root| (root, 0.0)).into_iter().collect();

        while let Some((slot, bound)) = pending.pop() {
            // Equal bound still descends so ties resolve to the lowest index.
            if matches!(best, Some((best_sq, _)) if bound > best_sq) {
                continue;
            }

            let node = self.nodes[slot];
            let point = &self.points[node.point];

            if accept(node.point) {
                let sq = squared_distance(query, point);
                let closer = match best {
                    None => true,
                    Some((best_sq, best_idx)) => sq < best_sq || (sq == best_sq && node.point < best_idx),
                };
                if closer {
                    best = Some((sq, node.point));
                }
            }

            let diff = coord(query, node.axis) - coord(point, node.axis);
            let (near, far) = if diff < 0.0 {
                (node.left, node.right)
            } else {
                (node.right, node.left)
            };

            // Near side is popped first.
            if let Some(child) = far {
                pending.push((child, bound.max(diff * diff)));
            }
            if let Some(child) = near {
                pending.push((child, bound));
            }
        }

        best.map(|(sq, index)| Neighbor {
            index,
            distance: sq.sqrt(),
        })
    }
}

/// Deepest leaf tolerated before a rebuild: `2·log2(n) + 8`.
fn max_depth(points: usize) -> usize {
    let log2 = usize::BITS - points.max(1).leading_zeros();
    2 * log2 as usize + 8
}

fn coord(point: &[f32], axis: usize) -> f32 {
    point.get(axis).copied().unwrap_or(0.0)
}

fn build_subtree(points: &[Vec<f32>], indices: &mut [usize], nodes: &mut Vec<Node>) -> Option<usize> {
    if indices.is_empty() {
        return None;
    }

    let axis = widest_axis(points, indices);
    let mid = indices.len() / 2;
    indices.select_nth_unstable_by(mid, |&a, &b| {
        coord(&points[a], axis).total_cmp(&coord(&points[b], axis))
    });

    let slot = nodes.len();
    nodes.push(Node {
        point: indices[mid],
        axis,
        left: None,
        right: None,
    });

    let (lower, rest) = indices.split_at_mut(mid);
    let upper = &mut rest[1..];
    let left = build_subtree(points, lower, nodes);
    let right = build_subtree(points, upper, nodes);
    nodes[slot].left = left;
    nodes[slot].right = right;

    Some(slot)
}

fn widest_axis(points: &[Vec<f32>], indices: &[usize]) -> usize {
    let dim = indices.first().map_or(0, |&i| points[i].len());
    let mut best_axis = 0;
    let mut best_spread = f32::NEG_INFINITY;
    for axis in 0..dim {
        let (lo, hi) = indices.iter().fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &i| {
            let v = coord(&points[i], axis);
            (lo.min(v), hi.max(v))
        });
        if hi - lo > best_spread {
            best_spread = hi - lo;
            best_axis = axis;
        }
    }
    best_axis
}
