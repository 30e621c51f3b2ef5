use anyhow::{Result, ensure};
use candle_core::{Tensor, backprop::GradStore};
use candle_nn::{AdamW, Optimizer, ParamsAdamW, VarMap};
use std::fmt::Debug;

/// Back-propagates `loss` and rescales the gradients of the varmap's variables so that their
/// global norm is at most `max_norm`.
pub fn clip_grad(loss: &Tensor, varmap: &VarMap, max_norm: f32) -> Result<GradStore> {
    let mut grad_store = loss.backward()?;
    let vars = varmap.all_vars();
    let total_norm = grad_norm(&grad_store, varmap)?;
    if total_norm > max_norm {
        let clip_coef = f64::from(max_norm / (total_norm + 1e-6));
        for var in vars.iter() {
            if let Some(grad) = grad_store.remove(var.as_tensor()) {
                grad_store.insert(var.as_tensor(), grad.affine(clip_coef, 0.)?);
            }
        }
    }
    Ok(grad_store)
}

/// Global L2 norm of the varmap's gradients. NaN or infinite when any gradient is.
pub fn grad_norm(grad_store: &GradStore, varmap: &VarMap) -> Result<f32> {
    let mut total_norm_squared = 0.0f32;
    for var in varmap.all_vars().iter() {
        if let Some(grad) = grad_store.get(var.as_tensor()) {
            total_norm_squared += grad.sqr()?.sum_all()?.to_scalar::<f32>()?;
        }
    }
    Ok(total_norm_squared.sqrt())
}

pub struct OptimizerWithMaxGrad {
    pub optimizer: AdamW,
    pub max_grad_norm: Option<f32>,
    pub varmap: VarMap,
}

impl Debug for OptimizerWithMaxGrad {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OptimizerWithMaxGrad")
            .field("learning_rate", &self.optimizer.learning_rate())
            .field("max_grad_norm", &self.max_grad_norm)
            .finish()
    }
}

impl OptimizerWithMaxGrad {
    pub fn new(optimizer: AdamW, max_grad_norm: Option<f32>, varmap: VarMap) -> Self {
        Self {
            optimizer,
            max_grad_norm,
            varmap,
        }
    }

    /// AdamW over every variable of `varmap`.
    pub fn adamw(varmap: VarMap, params: ParamsAdamW, max_grad_norm: Option<f32>) -> Result<Self> {
        let optimizer = AdamW::new(varmap.all_vars(), params)?;
        Ok(Self::new(optimizer, max_grad_norm, varmap))
    }

    pub fn learning_rate(&self) -> f64 {
        self.optimizer.learning_rate()
    }

    /// Number of variables that received a gradient from `grads`.
    fn vars_with_grad(&self, grads: &GradStore) -> usize {
        self.varmap
            .all_vars()
            .iter()
            .filter(|var| grads.get(var.as_tensor()).is_some())
            .count()
    }

    /// A fresh gradient store is built for every call, so nothing carries over from the previous
    /// step.
    pub fn backward_step(&mut self, loss: &Tensor) -> Result<()> {
        let grads = if let Some(max_norm) = self.max_grad_norm {
            clip_grad(loss, &self.varmap, max_norm)?
        } else {
            loss.backward()?
        };
        if self.vars_with_grad(&grads) == 0 {
            tracing::warn!("loss is detached from every parameter, the update is a no-op");
        }
        let norm = grad_norm(&grads, &self.varmap)?;
        ensure!(
            norm.is_finite(),
            "gradient norm {norm} is not finite, parameters left untouched"
        );
        self.optimizer.step(&grads)?;
        Ok(())
    }
}
