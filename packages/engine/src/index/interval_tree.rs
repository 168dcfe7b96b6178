// packages/engine/src/index/interval_tree.rs
//! Static spatial index over domain bounding boxes
//!
//! An `IntervalTree` is a balanced binary tree stored in heap layout
//! (children of node `i` at `2i+1` and `2i+2`) over the axis-aligned boxes of
//! the domains of a distributed mesh. It answers "which domains can possibly
//! satisfy this query" without touching mesh data.
//!
//! # Lifecycle
//!
//! ```text
//! new(N, D) ──add_domain()*──> calculate() ──> queries (read-only, &self)
//!                                  │
//!                 sum all-reduce of the raw extents (distributed only)
//!                 build tree shape, then fill parent extents bottom-up
//! ```
//!
//! Ranks only write the domains they own. Every other slot stays zero, so an
//! element-wise sum across ranks reconstructs the global extents.

use crate::index::communicator::{Communicator, SerialComm};
use crate::index::geometry;
use crate::observability::metric_names;
use crate::utils::errors::{EngineError, Result};
use std::cmp::Ordering;
use tracing::{debug, info};

/// Largest supported dimension count
pub const MAX_DIMS: usize = 32;

/// Pending subtree during construction
#[derive(Debug, Clone, Copy)]
struct BuildItem {
    offset: usize,
    size: usize,
    depth: usize,
    node: usize,
}

/// Balanced bounding-box tree over the domains of a decomposed mesh
#[derive(Debug, Clone)]
pub struct IntervalTree {
    num_domains: usize,
    num_dims: usize,
    num_nodes: usize,

    /// Raw per-domain rows written by `add_domain` (zero until written)
    domain_extents: Vec<f64>,

    /// One `[min0, max0, min1, max1, ...]` row per node
    node_extents: Vec<f64>,

    /// Domain id for leaves, `None` for internal nodes
    node_ids: Vec<Option<usize>>,

    calculated: bool,
}

impl IntervalTree {
    /// Create an empty tree for `num_domains` boxes in `num_dims` dimensions
    pub fn new(num_domains: usize, num_dims: usize) -> Result<Self> {
        if num_dims == 0 || num_dims > MAX_DIMS {
            return Err(EngineError::InvalidDimensions(num_dims));
        }

        let num_nodes = complete_tree_size(num_domains);
        let vector_size = 2 * num_dims;

        Ok(Self {
            num_domains,
            num_dims,
            num_nodes,
            domain_extents: vec![0.0; num_domains * vector_size],
            node_extents: vec![0.0; num_nodes * vector_size],
            node_ids: vec![None; num_nodes],
            calculated: false,
        })
    }

    pub fn num_domains(&self) -> usize {
        self.num_domains
    }

    pub fn num_dims(&self) -> usize {
        self.num_dims
    }

    pub fn num_nodes(&self) -> usize {
        self.num_nodes
    }

    pub fn is_calculated(&self) -> bool {
        self.calculated
    }

    fn vector_size(&self) -> usize {
        2 * self.num_dims
    }

    /// Record the extents `[min0, max0, min1, max1, ...]` of one domain
    pub fn add_domain(&mut self, domain: usize, extents: &[f64]) -> Result<()> {
        if self.calculated {
            return Err(EngineError::IntervalTreeFrozen);
        }
        if domain >= self.num_domains {
            return Err(EngineError::BadDomain {
                domain,
                num_domains: self.num_domains,
            });
        }
        let vs = self.vector_size();
        check_len(vs, extents.len())?;

        self.domain_extents[domain * vs..(domain + 1) * vs].copy_from_slice(extents);
        Ok(())
    }

    /// Build the tree from the extents added on this process alone
    pub fn calculate(&mut self, already_collected: bool) -> Result<()> {
        self.calculate_with(&SerialComm, already_collected)
    }

    /// Build the tree, first merging every rank's extents through `comm`
    ///
    /// Every rank in `comm` must call this with the same `already_collected`.
    pub fn calculate_with<C>(&mut self, comm: &C, already_collected: bool) -> Result<()>
    where
        C: Communicator + ?Sized,
    {
        if self.calculated {
            debug!("Interval tree already calculated, skipping rebuild");
            return Ok(());
        }

        if !already_collected && comm.is_distributed() {
            debug!(
                "Rank {} merging {} domain extents across {} ranks",
                comm.rank(),
                self.num_domains,
                comm.size()
            );
            comm.all_reduce_sum(&mut self.domain_extents)?;
        }

        self.construct_tree();
        self.set_intervals();
        self.calculated = true;

        metrics::counter!(metric_names::TREE_BUILDS).increment(1);
        info!(
            "Interval tree built: {} domains, {} dims, {} nodes",
            self.num_domains, self.num_dims, self.num_nodes
        );
        Ok(())
    }

    fn construct_tree(&mut self) {
        let vs = self.vector_size();
        let dims = self.num_dims;

        self.node_extents = vec![0.0; self.num_nodes * vs];
        self.node_ids = vec![None; self.num_nodes];
        if self.num_domains == 0 {
            return;
        }

        let raw = &self.domain_extents;
        let mut block_ids: Vec<usize> = (0..self.num_domains).collect();
        let mut stack = vec![BuildItem {
            offset: 0,
            size: self.num_domains,
            depth: 0,
            node: 0,
        }];

        while let Some(item) = stack.pop() {
            if item.size <= 1 {
                let domain = block_ids[item.offset];
                self.node_ids[item.node] = Some(domain);
                self.node_extents[item.node * vs..(item.node + 1) * vs]
                    .copy_from_slice(&raw[domain * vs..(domain + 1) * vs]);
                continue;
            }

            let range = item.offset..item.offset + item.size;
            block_ids[range].sort_by(|&a, &b| {
                compare_boxes(
                    &raw[a * vs..(a + 1) * vs],
                    &raw[b * vs..(b + 1) * vs],
                    item.depth,
                    dims,
                )
            });

            let left = split_size(item.size);
            stack.push(BuildItem {
                offset: item.offset,
                size: left,
                depth: item.depth + 1,
                node: 2 * item.node + 1,
            });
            stack.push(BuildItem {
                offset: item.offset + left,
                size: item.size - left,
                depth: item.depth + 1,
                node: 2 * item.node + 2,
            });
        }
    }

    /// Fill every parent from its two children, deepest pairs first
    fn set_intervals(&mut self) {
        let vs = self.vector_size();
        if self.num_nodes < 3 {
            return;
        }

        // num_nodes is odd, so i walks the right child of each sibling pair
        let mut i = self.num_nodes - 1;
        while i >= 2 {
            let parent = (i - 2) / 2;
            for dim in 0..self.num_dims {
                let left_min = self.node_extents[(i - 1) * vs + 2 * dim];
                let left_max = self.node_extents[(i - 1) * vs + 2 * dim + 1];
                let right_min = self.node_extents[i * vs + 2 * dim];
                let right_max = self.node_extents[i * vs + 2 * dim + 1];

                self.node_extents[parent * vs + 2 * dim] = left_min.min(right_min);
                self.node_extents[parent * vs + 2 * dim + 1] = left_max.max(right_max);
            }
            i -= 2;
        }
    }

    fn ensure_calculated(&self) -> Result<()> {
        if self.calculated {
            Ok(())
        } else {
            Err(EngineError::IntervalTreeNotCalculated)
        }
    }

    fn node_row(&self, node: usize) -> &[f64] {
        let vs = self.vector_size();
        &self.node_extents[node * vs..(node + 1) * vs]
    }

    /// Depth-first walk collecting the domains of every leaf whose box, and
    /// whose ancestors' boxes, satisfy `hit`
    fn collect_domains<F>(&self, hit: F) -> Result<Vec<usize>>
    where
        F: Fn(&[f64]) -> bool,
    {
        self.ensure_calculated()?;

        let mut domains = Vec::new();
        if self.num_nodes == 0 {
            return Ok(domains);
        }

        let mut stack = vec![0usize];
        while let Some(node) = stack.pop() {
            if !hit(self.node_row(node)) {
                continue;
            }
            match self.node_ids[node] {
                Some(domain) => domains.push(domain),
                None => {
                    stack.push(2 * node + 2);
                    stack.push(2 * node + 1);
                }
            }
        }

        Ok(domains)
    }

    /// Domains whose box meets the hyperplane `Σ params[i] * x_i = solution`
    pub fn domains_for_equation(&self, params: &[f64], solution: f64) -> Result<Vec<usize>> {
        check_len(self.num_dims, params.len())?;
        self.collect_domains(|row| geometry::equation_intersects(params, solution, row))
    }

    /// Domains whose box overlaps the box `[min, max]`
    pub fn domains_in_range(&self, min: &[f64], max: &[f64]) -> Result<Vec<usize>> {
        check_len(self.num_dims, min.len())?;
        check_len(self.num_dims, max.len())?;
        self.collect_domains(|row| geometry::range_intersects(min, max, row))
    }

    /// Domains whose box is hit by the ray `origin + t * dir`, `t >= 0`
    pub fn domains_on_ray(&self, origin: &[f64], dir: &[f64]) -> Result<Vec<usize>> {
        check_len(self.num_dims, origin.len())?;
        check_len(self.num_dims, dir.len())?;
        self.collect_domains(|row| geometry::ray_intersects(origin, dir, row))
    }

    /// Domains whose box is crossed by the segment from `p0` to `p1`
    pub fn domains_on_line(&self, p0: &[f64], p1: &[f64]) -> Result<Vec<usize>> {
        check_len(self.num_dims, p0.len())?;
        check_len(self.num_dims, p1.len())?;
        self.collect_domains(|row| geometry::line_intersects(p0, p1, row))
    }

    /// Domains whose closed box contains `point`
    pub fn domains_containing_point(&self, point: &[f64]) -> Result<Vec<usize>> {
        check_len(self.num_dims, point.len())?;
        self.collect_domains(|row| geometry::contains_point(point, row))
    }

    /// Bounds of the whole decomposition (the root row)
    pub fn extents(&self) -> Result<&[f64]> {
        self.ensure_calculated()?;
        if self.num_nodes == 0 {
            return Err(EngineError::EmptyIndex);
        }
        Ok(self.node_row(0))
    }

    /// Extents of the `slot`-th leaf in array order
    pub fn leaf_extents(&self, slot: usize) -> Result<&[f64]> {
        self.ensure_calculated()?;
        if slot >= self.num_domains {
            return Err(EngineError::BadDomain {
                domain: slot,
                num_domains: self.num_domains,
            });
        }
        Ok(self.node_row(self.num_nodes - self.num_domains + slot))
    }

    /// Extents of a domain, found by scanning the leaves
    pub fn domain_extents(&self, domain: usize) -> Result<&[f64]> {
        self.ensure_calculated()?;
        let first_leaf = self.num_nodes - self.num_domains;
        (first_leaf..self.num_nodes)
            .find(|&node| self.node_ids[node] == Some(domain))
            .map(|node| self.node_row(node))
            .ok_or(EngineError::BadDomain {
                domain,
                num_domains: self.num_domains,
            })
    }

    /// Flat node extents, `num_nodes * 2 * num_dims` values
    pub fn node_extents(&self) -> &[f64] {
        &self.node_extents
    }

    /// Domain id per node, `None` for internal nodes
    pub fn node_ids(&self) -> &[Option<usize>] {
        &self.node_ids
    }

    /// Depth of every leaf, in leaf-array order
    pub fn leaf_depths(&self) -> Result<Vec<usize>> {
        self.ensure_calculated()?;
        let first_leaf = self.num_nodes - self.num_domains;
        Ok((first_leaf..self.num_nodes)
            .map(|node| (usize::BITS - 1 - (node + 1).leading_zeros()) as usize)
            .collect())
    }
}

fn check_len(expected: usize, actual: usize) -> Result<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(EngineError::DimensionMismatch { expected, actual })
    }
}

/// Node count of a complete binary tree with `num_leaves` leaves
fn complete_tree_size(num_leaves: usize) -> usize {
    if num_leaves == 0 {
        return 0;
    }

    let mut exp = 1;
    let mut num_complete_trees = 1;
    while 2 * exp < num_leaves {
        exp *= 2;
        num_complete_trees = 2 * num_complete_trees + 1;
    }
    num_complete_trees + 2 * (num_leaves - exp)
}

/// Leaves that go to the left subtree so the tree stays complete
///
/// With `size = 2^y + n`, `0 <= n < 2^y`: the left side takes `2^(y-1)`
/// when `n == 0`, `2^(y-1) + n` when `n < 2^(y-1)`, and `2^y` otherwise.
pub(crate) fn split_size(size: usize) -> usize {
    debug_assert!(size >= 2, "split_size needs at least two leaves");

    let y = usize::BITS - 1 - size.leading_zeros();
    let pow_y = 1usize << y;
    let n = size - pow_y;
    let half = pow_y >> 1;

    if n == 0 {
        half
    } else if n < half {
        half + n
    } else {
        pow_y
    }
}

/// Order two boxes by midpoint along `depth mod dims`, breaking ties along
/// the following dimensions in turn
fn compare_boxes(a: &[f64], b: &[f64], depth: usize, dims: usize) -> Ordering {
    for i in 0..dims {
        let dim = (depth + i) % dims;
        let ordering = geometry::midpoint(a, dim).total_cmp(&geometry::midpoint(b, dim));
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}
