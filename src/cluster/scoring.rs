//! The scalar pieces of the merge-or-create decision: time decay, composite
//! score, dynamic threshold, and the silhouette-style separability measure.

use chrono::{DateTime, Utc};

/// Guard for degenerate separability denominators.
const FLOAT_EPSILON: f64 = f32::EPSILON as f64;

/// Absolute gap between two timestamps in hours. Clock skew between ingest
/// and issue updates must never produce a negative weight.
pub fn hours_between(now: DateTime<Utc>, updated_at: DateTime<Utc>) -> f64 {
    let seconds = (now - updated_at).num_milliseconds() as f64 / 1000.0;
    (seconds / 3600.0).abs()
}

/// Freshness factor exp(-lambda * |dt|), in (0, 1].
pub fn time_decay_weight(delta_hours: f64, lambda: f64) -> f64 {
    (-lambda * delta_hours.abs()).exp()
}

/// Composite ranking score alpha * sim + beta * w_time.
pub fn composite_score(similarity: f64, time_weight: f64, alpha: f64, beta: f64) -> f64 {
    alpha * similarity + beta * time_weight
}

/// Per-candidate merge cutoff: t_base when the issue was just updated,
/// tending to 1 as it ages.
pub fn dynamic_threshold(time_weight: f64, t_base: f64) -> f64 {
    t_base + (1.0 - t_base) * (1.0 - time_weight)
}

/// Silhouette-style separation between the best candidate and its runner-up.
///
/// With a = 1 - sim_best and b = 1 - sim_neighbor, returns (b - a) / max(a, b):
/// positive iff the best candidate is strictly closer than the neighbor,
/// zero when both are (degenerately) perfect matches.
pub fn separability(sim_best: f64, sim_neighbor: f64) -> f64 {
    let a = 1.0 - sim_best;
    let b = 1.0 - sim_neighbor;
    let denominator = a.max(b);
    if denominator < FLOAT_EPSILON {
        return 0.0;
    }
    (b - a) / denominator
}
