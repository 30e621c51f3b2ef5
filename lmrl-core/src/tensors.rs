use candle_core::Tensor;
use derive_more::{Deref, DerefMut, Display};

/// Accumulated log-probability of a sampled sequence.
#[derive(Deref, DerefMut, Debug, Display, Clone)]
pub struct Logp(pub Tensor);

#[derive(Deref, DerefMut, Debug, Display)]
pub struct PolicyLoss(pub Tensor);
