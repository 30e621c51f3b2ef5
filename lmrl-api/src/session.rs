use crate::error::ProtocolError;
use lmrl_agents::{reinforce::Reinforce, sampler::AutoregressiveSampler};
use lmrl_core::{
    policies::{LanguagePolicy, LearningModule},
    rollout::{RolloutRecord, RolloutStore},
    tensors::PolicyLoss,
    tokenizer::Tokenizer,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolState {
    Idle,
    PendingRollout,
}

/// The two operations callers drive the training loop with.
pub trait Protocol: Send + 'static {
    /// Samples a continuation of `prompt` and keeps its rollout for the next `train` call.
    fn generate(&mut self, prompt: &str) -> Result<String, ProtocolError>;

    /// Trains on the pending rollout with `reward`, returning the loss.
    fn train(&mut self, reward: f32) -> Result<f32, ProtocolError>;

    fn state(&self) -> ProtocolState;

    /// Drops the pending rollout, if any.
    fn reset(&mut self);
}

/// Owns the policy, its optimizer and the pending rollout. Callers must serialise access, the
/// HTTP layer does so with a mutex around the whole session.
pub struct Session<P, T, L>
where
    P: LanguagePolicy,
    T: Tokenizer,
    L: LearningModule<Losses = PolicyLoss>,
{
    pub policy: P,
    pub tokenizer: T,
    pub sampler: AutoregressiveSampler,
    pub reinforce: Reinforce<L>,
    store: RolloutStore,
}

impl<P, T, L> Session<P, T, L>
where
    P: LanguagePolicy,
    T: Tokenizer,
    L: LearningModule<Losses = PolicyLoss>,
{
    pub fn new(policy: P, tokenizer: T, sampler: AutoregressiveSampler, reinforce: Reinforce<L>) -> Self {
        Self {
            policy,
            tokenizer,
            sampler,
            reinforce,
            store: RolloutStore::new(),
        }
    }

    pub fn pending(&self) -> Option<&RolloutRecord> {
        self.store.peek()
    }
}

impl<P, T, L> Protocol for Session<P, T, L>
where
    P: LanguagePolicy,
    T: Tokenizer,
    L: LearningModule<Losses = PolicyLoss>,
{
    fn generate(&mut self, prompt: &str) -> Result<String, ProtocolError> {
        let generation = self
            .sampler
            .generate(&self.policy, &self.tokenizer, prompt)?;
        tracing::info!(
            prompt_tokens = generation.record.prompt_ids.len(),
            sampled_tokens = generation.record.generated_ids.len(),
            "generated rollout"
        );
        if let Some(discarded) = self.store.put(generation.record) {
            tracing::debug!(
                sampled_tokens = discarded.generated_ids.len(),
                "discarding rollout that was never trained on"
            );
        }
        Ok(generation.text)
    }

    fn train(&mut self, reward: f32) -> Result<f32, ProtocolError> {
        // the record is consumed even if the update below fails
        let record = self.store.take()?;
        let loss = self.reinforce.update(record, reward)?;
        tracing::info!(reward, loss, "training step complete");
        Ok(loss)
    }

    fn reset(&mut self) {
        if self.store.take().is_ok() {
            tracing::debug!("dropped pending rollout");
        }
    }

    fn state(&self) -> ProtocolState {
        if self.store.is_pending() {
            ProtocolState::PendingRollout
        } else {
            ProtocolState::Idle
        }
    }
}
