use anyhow::Result;
use candle_core::{Device, Tensor};

/// An autoregressive language model used as the policy.
pub trait LanguagePolicy: Send + 'static {
    /// Logits of the token following `token_ids`, shape `[vocab_size]`. The returned tensor has
    /// to stay differentiable with respect to the policy parameters.
    fn next_token_logits(&self, token_ids: &[u32]) -> Result<Tensor>;

    fn vocab_size(&self) -> usize;

    fn device(&self) -> &Device;
}

// convinience trait
pub trait LearningModule: Send + 'static {
    type Losses;

    fn update(&mut self, losses: Self::Losses) -> Result<()>;
}
