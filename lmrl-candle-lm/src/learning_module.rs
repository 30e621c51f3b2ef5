use crate::optimizer::OptimizerWithMaxGrad;
use anyhow::Result;
use lmrl_core::{policies::LearningModule, tensors::PolicyLoss};

/// Learning module of a policy without a value function: the policy loss is the only loss.
#[derive(Debug)]
pub struct PolicyLM {
    pub optimizer_with_grad: OptimizerWithMaxGrad,
}

impl PolicyLM {
    pub fn new(optimizer_with_grad: OptimizerWithMaxGrad) -> Self {
        Self {
            optimizer_with_grad,
        }
    }

    pub fn policy_learning_rate(&self) -> f64 {
        self.optimizer_with_grad.learning_rate()
    }
}

impl LearningModule for PolicyLM {
    type Losses = PolicyLoss;

    fn update(&mut self, losses: Self::Losses) -> Result<()> {
        self.optimizer_with_grad.backward_step(&losses)
    }
}
