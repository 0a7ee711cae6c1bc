use std::env;

use tracing::warn;

use crate::error::ClusterError;

pub const CLUSTER_ALPHA_ENV: &str = "CLUSTER_ALPHA";
pub const CLUSTER_BETA_ENV: &str = "CLUSTER_BETA";
pub const CLUSTER_LAMBDA_ENV: &str = "CLUSTER_LAMBDA";
pub const CLUSTER_T_BASE_ENV: &str = "CLUSTER_T_BASE";
pub const CLUSTER_TOP_K_ENV: &str = "CLUSTER_TOP_K";

/// Default weight of semantic similarity in the composite score.
pub const DEFAULT_ALPHA: f64 = 0.7;
/// Default weight of the time-decay term in the composite score.
pub const DEFAULT_BETA: f64 = 0.3;
/// Default decay rate per hour; a 24-hour half-life order of magnitude.
pub const DEFAULT_LAMBDA: f64 = 1.0 / 24.0;
/// Default base merge threshold for a just-updated issue.
pub const DEFAULT_T_BASE: f64 = 0.5;
/// Default candidate shortlist size.
pub const DEFAULT_TOP_K: usize = 10;
/// Dense embedding dimensionality produced by the embedder.
pub const EMBEDDING_DIM: usize = 768;

/// Tunables for the merge-or-create decision core.
///
/// Time decay is always computed in hours; `lambda` is a per-hour rate.
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    pub alpha: f64,
    pub beta: f64,
    pub lambda: f64,
    pub t_base: f64,
    pub top_k: usize,
    pub dimension: usize,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        ClusterConfig {
            alpha: DEFAULT_ALPHA,
            beta: DEFAULT_BETA,
            lambda: DEFAULT_LAMBDA,
            t_base: DEFAULT_T_BASE,
            top_k: DEFAULT_TOP_K,
            dimension: EMBEDDING_DIM,
        }
    }
}

impl ClusterConfig {
    /// Build a config from the environment, falling back to defaults for
    /// anything unset or unparseable.
    pub fn from_env() -> Result<Self, ClusterError> {
        let config = ClusterConfig {
            alpha: env_f64(CLUSTER_ALPHA_ENV, DEFAULT_ALPHA),
            beta: env_f64(CLUSTER_BETA_ENV, DEFAULT_BETA),
            lambda: env_f64(CLUSTER_LAMBDA_ENV, DEFAULT_LAMBDA),
            t_base: env_f64(CLUSTER_T_BASE_ENV, DEFAULT_T_BASE),
            top_k: env_usize(CLUSTER_TOP_K_ENV, DEFAULT_TOP_K),
            dimension: EMBEDDING_DIM,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ClusterError> {
        if self.alpha < 0.0 || self.beta < 0.0 {
            return Err(ClusterError::InvariantViolation(format!(
                "score weights must be non-negative: alpha={}, beta={}",
                self.alpha, self.beta
            )));
        }
        if self.lambda <= 0.0 || !self.lambda.is_finite() {
            return Err(ClusterError::InvariantViolation(format!(
                "lambda must be a positive decay rate, got {}",
                self.lambda
            )));
        }
        if !(self.t_base > 0.0 && self.t_base < 1.0) {
            return Err(ClusterError::InvariantViolation(format!(
                "t_base must lie in (0, 1), got {}",
                self.t_base
            )));
        }
        if self.top_k == 0 {
            return Err(ClusterError::InvariantViolation(
                "top_k must be at least 1".to_string(),
            ));
        }
        if self.dimension == 0 {
            return Err(ClusterError::InvariantViolation(
                "embedding dimension must be at least 1".to_string(),
            ));
        }
        let weight_sum = self.alpha + self.beta;
        if (weight_sum - 1.0).abs() > 1e-9 {
            warn!(
                "alpha + beta = {} (recommended 1.0); thresholds still compare against the composite score",
                weight_sum
            );
        }
        Ok(())
    }
}

fn env_f64(var: &str, default: f64) -> f64 {
    match env::var(var) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("Invalid {} value '{}'; defaulting to {}", var, raw, default);
            default
        }),
        Err(_) => default,
    }
}

fn env_usize(var: &str, default: usize) -> usize {
    match env::var(var) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("Invalid {} value '{}'; defaulting to {}", var, raw, default);
            default
        }),
        Err(_) => default,
    }
}
