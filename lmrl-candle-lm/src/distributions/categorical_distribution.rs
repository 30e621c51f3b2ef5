use anyhow::{Result, ensure};
use candle_core::{D, Error, Tensor};
use candle_nn::ops::log_softmax;
use lmrl_core::distributions::Distribution;
use rand::Rng;
use rand::distr::Distribution as RandDistribution;
use rand::distr::weighted::WeightedIndex;

/// Categorical distribution over the vocabulary, built from raw next-token logits. No
/// temperature or top-k filtering is applied.
#[derive(Clone, Debug)]
pub struct CategoricalDistribution {
    log_probs: Tensor,
}

impl CategoricalDistribution {
    pub fn from_logits(logits: &Tensor) -> Result<Self> {
        ensure!(
            logits.rank() == 1,
            "logits should be a flattened tensor, got shape {:?}",
            logits.dims()
        );
        let log_probs = log_softmax(logits, D::Minus1)?;
        Ok(Self { log_probs })
    }

    pub fn num_categories(&self) -> usize {
        self.log_probs.elem_count()
    }
}

impl Distribution for CategoricalDistribution {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<u32> {
        let probs: Vec<f32> = self.log_probs.exp()?.to_vec1()?;
        let distribution = WeightedIndex::new(&probs).map_err(Error::wrap)?;
        Ok(distribution.sample(rng) as u32)
    }

    fn log_prob(&self, token: u32) -> Result<Tensor> {
        let token = token as usize;
        ensure!(
            token < self.num_categories(),
            "token {token} is outside a vocabulary of {}",
            self.num_categories()
        );
        Ok(self.log_probs.get(token)?)
    }
}

#[cfg(test)]
mod test {
    use super::CategoricalDistribution;
    use anyhow::Result;
    use candle_core::{Device, Tensor, Var};
    use lmrl_core::distributions::Distribution;
    use rand::{SeedableRng, rngs::StdRng};

    #[test]
    fn log_probs_are_normalised() -> Result<()> {
        let logits = Tensor::new(&[1.0f32, 2.0, 0.5, -1.0], &Device::Cpu)?;
        let dist = CategoricalDistribution::from_logits(&logits)?;
        let total: f32 = (0..4)
            .map(|t| dist.log_prob(t).and_then(|lp| Ok(lp.to_scalar::<f32>()?.exp())))
            .sum::<Result<f32>>()?;
        assert!((total - 1.0).abs() < 1e-5);
        assert!(dist.log_prob(4).is_err());
        Ok(())
    }

    #[test]
    fn sampling_follows_the_logits() -> Result<()> {
        let logits = Tensor::new(&[-100.0f32, 100.0, -100.0], &Device::Cpu)?;
        let dist = CategoricalDistribution::from_logits(&logits)?;
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..20 {
            let (token, log_prob) = dist.sample_and_score(&mut rng)?;
            assert_eq!(token, 1);
            assert!(log_prob.to_scalar::<f32>()?.abs() < 1e-4);
        }
        Ok(())
    }

    #[test]
    fn log_prob_is_differentiable() -> Result<()> {
        let logits = Var::new(&[0.3f32, -0.2, 0.9], &Device::Cpu)?;
        let dist = CategoricalDistribution::from_logits(logits.as_tensor())?;
        let log_prob = dist.log_prob(2)?;
        let grads = log_prob.backward()?;
        let grad = grads
            .get(logits.as_tensor())
            .map(|g| g.to_vec1::<f32>())
            .transpose()?;
        let grad = grad.unwrap_or_default();
        // d log softmax_k / d logits = onehot_k - softmax
        assert_eq!(grad.len(), 3);
        assert!(grad[2] > 0.0 && grad[0] < 0.0 && grad[1] < 0.0);
        Ok(())
    }
}
