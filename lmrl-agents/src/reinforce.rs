use anyhow::{Result, ensure};
use lmrl_core::{policies::LearningModule, rollout::RolloutRecord, tensors::PolicyLoss};

/// REINFORCE without a baseline: one gradient step on `-log_prob * reward` per rollout.
pub struct Reinforce<L: LearningModule<Losses = PolicyLoss>> {
    pub learning_module: L,
}

impl<L: LearningModule<Losses = PolicyLoss>> Reinforce<L> {
    pub fn new(learning_module: L) -> Self {
        Self { learning_module }
    }

    pub fn policy_loss(record: &RolloutRecord, reward: f32) -> Result<PolicyLoss> {
        let loss = record.log_prob.affine(-f64::from(reward), 0.)?;
        Ok(PolicyLoss(loss))
    }

    /// Applies one update for `record` and returns the loss value.
    pub fn update(&mut self, record: RolloutRecord, reward: f32) -> Result<f32> {
        let policy_loss = Self::policy_loss(&record, reward)?;
        let loss = policy_loss.to_scalar::<f32>()?;
        // a non-finite loss would write NaN into every parameter
        ensure!(
            loss.is_finite(),
            "loss {loss} is not finite (reward {reward}), skipping the update"
        );
        self.learning_module.update(policy_loss)?;
        Ok(loss)
    }
}
