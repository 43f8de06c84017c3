//! Bounded-depth path search, grounded on
//! `original_source/babl/babl-fish-path.c`'s depth-first search with
//! backtracking.
//!
//! Only format-to-format edges are traversable here (see the `ModelKind`
//! doc comment in `entity.rs`): built-in model/type-level conversions
//! (`builtin.rs`) always register an accompanying format-to-format
//! companion, and that companion is what search actually walks. The caller
//! never mutates a "visited" flag on a shared entity — each call gets its
//! own `Vec<bool>` sized to the format registry, indexed by
//! [`crate::registry::Handle::dense_index`] so concurrent searches never
//! step on each other's visited state.

use crate::context::Babl;
use crate::entity::PixelFormat;
use crate::fish::Fish;
use crate::graph::{ConversionHandle, GraphNode};
use crate::measure;
use crate::registry::Handle;

/// Hard cap on path depth regardless of configuration.
const HARD_DEPTH_CAP: u32 = 8;

struct SearchState<'a> {
    babl: &'a Babl,
    dest: Handle<PixelFormat>,
    tolerance: f64,
    visited: Vec<bool>,
    path: Vec<ConversionHandle>,
    cumulative_error: f64,
    cumulative_cost: f64,
    best: Option<(Vec<ConversionHandle>, f64, f64)>,
}

/// Combine a new edge's error into the running cumulative error: errors
/// compound multiplicatively as (1 - product of per-edge fidelities).
pub(crate) fn compound_error(cumulative: f64, edge_error: f64) -> f64 {
    1.0 - (1.0 - cumulative) * (1.0 - edge_error)
}

/// Aesthetic prune: don't walk through an intermediate format that drops
/// alpha or narrows component count relative to the current vertex, unless
/// that intermediate *is* the destination.
fn aesthetically_pruned(babl: &Babl, current: Handle<PixelFormat>, candidate: Handle<PixelFormat>, dest: Handle<PixelFormat>) -> bool {
    if candidate == dest {
        return false;
    }
    let cur_fmt = babl.formats.get(current);
    let cand_fmt = babl.formats.get(candidate);
    let cur_has_alpha = cur_fmt.components.iter().any(|fc| {
        babl.components.get(fc.component).role.contains(crate::entity::ComponentRole::ALPHA)
    });
    let cand_has_alpha = cand_fmt.components.iter().any(|fc| {
        babl.components.get(fc.component).role.contains(crate::entity::ComponentRole::ALPHA)
    });
    if cur_has_alpha && !cand_has_alpha {
        return true;
    }
    cand_fmt.num_components() < cur_fmt.num_components()
}

fn dfs(state: &mut SearchState<'_>, current: Handle<PixelFormat>, depth_remaining: u32) {
    for edge in state.babl.graph.outgoing(GraphNode::Format(current)) {
        let conv = state.babl.graph.get(edge);
        let GraphNode::Format(next) = conv.destination else { continue };

        let (edge_error, edge_cost) = measure::ensure_measured(state.babl, conv);
        let candidate_error = compound_error(state.cumulative_error, edge_error);
        if candidate_error > state.tolerance {
            continue;
        }

        if next == state.dest {
            let total_cost = state.cumulative_cost + edge_cost;
            state.path.push(edge);
            let better = match &state.best {
                None => true,
                Some((_, best_cost, best_error)) => {
                    total_cost < *best_cost || (total_cost == *best_cost && candidate_error < *best_error)
                }
            };
            if better {
                state.best = Some((state.path.clone(), total_cost, candidate_error));
            }
            state.path.pop();
            continue;
        }

        if depth_remaining == 0 {
            continue;
        }
        if state.visited[next.dense_index() as usize] {
            continue;
        }
        if aesthetically_pruned(state.babl, current, next, state.dest) {
            continue;
        }

        state.visited[next.dense_index() as usize] = true;
        state.path.push(edge);
        let (saved_error, saved_cost) = (state.cumulative_error, state.cumulative_cost);
        state.cumulative_error = candidate_error;
        state.cumulative_cost += edge_cost;

        dfs(state, next, depth_remaining - 1);

        state.cumulative_error = saved_error;
        state.cumulative_cost = saved_cost;
        state.path.pop();
        state.visited[next.dense_index() as usize] = false;
    }
}

fn search_at_depth(babl: &Babl, src: Handle<PixelFormat>, dest: Handle<PixelFormat>, tolerance: f64, depth: u32) -> Option<Vec<ConversionHandle>> {
    let mut state = SearchState {
        babl,
        dest,
        tolerance,
        visited: vec![false; babl.formats.len()],
        path: Vec::new(),
        cumulative_error: 0.0,
        cumulative_cost: 0.0,
        best: None,
    };
    state.visited[src.dense_index() as usize] = true;
    dfs(&mut state, src, depth.saturating_sub(1));
    state.best.map(|(path, _, _)| path)
}

/// Find the best conversion between `src` and `dest`, retrying at
/// increasing depth bounds up to [`HARD_DEPTH_CAP`], and falling back to
/// the reference converter if no bounded path clears `tolerance`. A fish
/// is always returned, never an error.
pub fn find_fish(babl: &Babl, src: Handle<PixelFormat>, dest: Handle<PixelFormat>, tolerance: f64, default_depth: u32) -> Fish {
    if src == dest {
        return Fish::memcpy(src, babl.formats.get(src).bytes_per_pixel);
    }
    let mut depth = default_depth.clamp(1, HARD_DEPTH_CAP);
    loop {
        if let Some(path) = search_at_depth(babl, src, dest, tolerance, depth) {
            return Fish::path(babl, src, dest, path);
        }
        if depth >= HARD_DEPTH_CAP {
            break;
        }
        depth += 1;
    }
    Fish::reference(src, dest)
}
