use crate::tensors::Logp;
use anyhow::Result;
use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("No generation data to train on. Call /generate first.")]
pub struct NoRollout;

/// One sampled continuation together with its accumulated log-probability under the policy that
/// produced it.
#[derive(Debug, Clone)]
pub struct RolloutRecord {
    pub log_prob: Logp,
    pub prompt_ids: Vec<u32>,
    pub generated_ids: Vec<u32>,
}

impl RolloutRecord {
    pub fn log_prob_value(&self) -> Result<f32> {
        Ok(self.log_prob.to_scalar::<f32>()?)
    }
}

/// Holds the rollout that is waiting for its reward. There is exactly one slot, a train call
/// always refers to the latest generate call.
#[derive(Debug, Default)]
pub struct RolloutStore {
    slot: Option<RolloutRecord>,
}

impl RolloutStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `record`, returning the untrained record it replaced.
    pub fn put(&mut self, record: RolloutRecord) -> Option<RolloutRecord> {
        self.slot.replace(record)
    }

    pub fn take(&mut self) -> Result<RolloutRecord, NoRollout> {
        self.slot.take().ok_or(NoRollout)
    }

    pub fn peek(&self) -> Option<&RolloutRecord> {
        self.slot.as_ref()
    }

    pub fn is_pending(&self) -> bool {
        self.slot.is_some()
    }
}

#[cfg(test)]
mod test {
    use super::{NoRollout, RolloutRecord, RolloutStore};
    use crate::tensors::Logp;
    use anyhow::Result;
    use candle_core::{Device, Tensor};

    fn record(log_prob: f32, generated_ids: Vec<u32>) -> Result<RolloutRecord> {
        Ok(RolloutRecord {
            log_prob: Logp(Tensor::new(log_prob, &Device::Cpu)?),
            prompt_ids: vec![1, 2],
            generated_ids,
        })
    }

    #[test]
    fn take_on_empty_store_fails() {
        let mut store = RolloutStore::new();
        assert!(!store.is_pending());
        assert_eq!(store.take().err(), Some(NoRollout));
    }

    #[test]
    fn take_consumes_the_record() -> Result<()> {
        let mut store = RolloutStore::new();
        assert!(store.put(record(-3.0, vec![5])?).is_none());
        assert!(store.is_pending());
        let taken = store.take()?;
        assert_eq!(taken.generated_ids, vec![5]);
        assert_eq!(taken.log_prob_value()?, -3.0);
        assert!(store.take().is_err());
        Ok(())
    }

    #[test]
    fn put_discards_the_previous_record() -> Result<()> {
        let mut store = RolloutStore::new();
        store.put(record(-1.0, vec![1])?);
        let discarded = store.put(record(-2.0, vec![2])?);
        assert_eq!(discarded.map(|r| r.generated_ids), Some(vec![1]));
        assert_eq!(store.peek().map(|r| r.generated_ids.clone()), Some(vec![2]));
        assert_eq!(store.take()?.log_prob_value()?, -2.0);
        Ok(())
    }

    #[test]
    fn no_rollout_message() {
        assert_eq!(
            NoRollout.to_string(),
            "No generation data to train on. Call /generate first."
        );
    }
}
