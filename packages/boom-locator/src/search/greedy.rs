//! greedy.rs — Greedy spatial-spread station selection
//!
//! Farthest pair first, then repeatedly the unselected station with the
//! largest summed distance to everything already chosen. Deterministic: ties
//! go to the lowest index. This is a heuristic and does not guarantee the
//! maximum-spread subset.

use crate::error::{LocatorError, Result};
use crate::geometry::DistanceMatrix;

/// Indices of `k` well-spread stations, in selection order.
pub fn greedy_spread(distances: &DistanceMatrix, k: usize) -> Result<Vec<usize>> {
    let n = distances.len();
    if k > n {
        return Err(LocatorError::InvalidSubset(format!("cannot pick {k} of {n} stations")));
    }
    match k {
        0 => return Ok(Vec::new()),
        1 => return Ok(vec![0]),
        _ => {}
    }

    let (a, b) = distances.farthest_pair()
        .ok_or_else(|| LocatorError::InvalidSubset("fewer than two stations".into()))?;
    let mut selected = vec![a, b];
    let mut taken = vec![false; n];
    taken[a] = true;
    taken[b] = true;

    while selected.len() < k {
        let mut best: Option<(usize, f64)> = None;
        for i in (0..n).filter(|&i| !taken[i]) {
            let spread = distances.sum_to(i, &selected);
            if best.map_or(true, |(_, s)| spread > s) {
                best = Some((i, spread));
            }
        }
        // k ≤ n guarantees a candidate remains
        let Some((next, _)) = best else { break };
        taken[next] = true;
        selected.push(next);
    }
    Ok(selected)
}
