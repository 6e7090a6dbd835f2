//! Seam for the external outlier model.
//!
//! The model is an out-of-scope collaborator (an isolation-forest-style
//! scorer). It is treated as a bounded-latency dependency: a timeout or
//! error yields "no signal", never a fault, and evaluation proceeds on
//! local statistics alone.

use super::models::HealthSample;
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::timeout;
use tracing::warn;

#[async_trait]
pub trait OutlierModel: Send + Sync {
    /// Score in [-1, 1]; lower is more anomalous.
    async fn score(&self, sample: &HealthSample) -> anyhow::Result<f64>;
}

/// Constant-score model for demos and tests.
#[derive(Debug, Clone)]
pub struct FixedOutlierModel(pub f64);

#[async_trait]
impl OutlierModel for FixedOutlierModel {
    async fn score(&self, _sample: &HealthSample) -> anyhow::Result<f64> {
        Ok(self.0)
    }
}

/// Query the model under a time budget. Absence of a usable score is not
/// an error.
pub async fn score_with_timeout(
    model: &dyn OutlierModel,
    sample: &HealthSample,
    budget: Duration,
) -> Option<f64> {
    match timeout(budget, model.score(sample)).await {
        Ok(Ok(score)) => Some(score.clamp(-1.0, 1.0)),
        Ok(Err(err)) => {
            warn!(error = %err, "outlier model failed, proceeding without signal");
            None
        }
        Err(_) => {
            warn!(budget_ms = budget.as_millis() as u64, "outlier model timed out, proceeding without signal");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    struct SlowModel;

    #[async_trait]
    impl OutlierModel for SlowModel {
        async fn score(&self, _sample: &HealthSample) -> anyhow::Result<f64> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(0.0)
        }
    }

    struct FailingModel;

    #[async_trait]
    impl OutlierModel for FailingModel {
        async fn score(&self, _sample: &HealthSample) -> anyhow::Result<f64> {
            anyhow::bail!("scorer unreachable")
        }
    }

    #[tokio::test]
    async fn test_fixed_model_scores() {
        let sample = HealthSample::new(Uuid::new_v4(), 100.0, true);
        let score =
            score_with_timeout(&FixedOutlierModel(-0.8), &sample, Duration::from_secs(1)).await;
        assert_eq!(score, Some(-0.8));
    }

    #[tokio::test]
    async fn test_out_of_range_score_clamped() {
        let sample = HealthSample::new(Uuid::new_v4(), 100.0, true);
        let score =
            score_with_timeout(&FixedOutlierModel(-3.0), &sample, Duration::from_secs(1)).await;
        assert_eq!(score, Some(-1.0));
    }

    #[tokio::test]
    async fn test_timeout_is_no_signal() {
        let sample = HealthSample::new(Uuid::new_v4(), 100.0, true);
        let score = score_with_timeout(&SlowModel, &sample, Duration::from_millis(50)).await;
        assert_eq!(score, None);
    }

    #[tokio::test]
    async fn test_model_error_is_no_signal() {
        let sample = HealthSample::new(Uuid::new_v4(), 100.0, true);
        let score = score_with_timeout(&FailingModel, &sample, Duration::from_secs(1)).await;
        assert_eq!(score, None);
    }
}
