use anyhow::Result;
use candle_core::Tensor;
use rand::Rng;

/// A distribution over the next token of a sequence.
pub trait Distribution {
    /// Draws a token id.
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<u32>;

    /// Log-probability of `token`, attached to whatever graph produced the distribution.
    fn log_prob(&self, token: u32) -> Result<Tensor>;

    fn sample_and_score<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<(u32, Tensor)> {
        let token = self.sample(rng)?;
        let log_prob = self.log_prob(token)?;
        Ok((token, log_prob))
    }
}
