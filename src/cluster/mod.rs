// Module declarations
pub mod candidates;
pub mod engine;
pub mod scoring;
#[cfg(test)]
mod tests;
pub mod types;

// Re-export the decision surface
pub use candidates::{rank_candidates, CandidateIssue};
pub use engine::{merge_centroid, ClusterEngine};
pub use types::{Decision, ScoredCandidate};
