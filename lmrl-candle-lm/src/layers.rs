//! Transformer building blocks. Every op used here has a backward pass in candle, so gradients
//! flow from the sampled log-probabilities back into all parameters.

use crate::config::CausalLmConfig;
use candle_core::{D, Device, Result, Tensor};
use candle_nn::{Init, Linear, Module, VarBuilder};

const INIT_STD: f64 = 0.02;

fn linear_layer(in_dim: usize, out_dim: usize, vb: VarBuilder) -> Result<Linear> {
    let weight = vb.get_with_hints(
        (out_dim, in_dim),
        "weight",
        Init::Randn {
            mean: 0.0,
            stdev: INIT_STD,
        },
    )?;
    let bias = vb.get_with_hints(out_dim, "bias", Init::Const(0.0))?;
    Ok(Linear::new(weight, Some(bias)))
}

/// Layer normalisation written with plain tensor ops.
#[derive(Debug, Clone)]
pub struct LayerNorm {
    weight: Tensor,
    bias: Tensor,
    eps: f64,
}

impl LayerNorm {
    pub fn new(dim: usize, eps: f64, vb: VarBuilder) -> Result<Self> {
        let weight = vb.get_with_hints(dim, "weight", Init::Const(1.0))?;
        let bias = vb.get_with_hints(dim, "bias", Init::Const(0.0))?;
        Ok(Self { weight, bias, eps })
    }
}

impl Module for LayerNorm {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let mean = xs.mean_keepdim(D::Minus1)?;
        let centered = xs.broadcast_sub(&mean)?;
        let variance = centered.sqr()?.mean_keepdim(D::Minus1)?;
        let denominator = (variance + self.eps)?.sqrt()?;
        centered
            .broadcast_div(&denominator)?
            .broadcast_mul(&self.weight)?
            .broadcast_add(&self.bias)
    }
}

/// Multi-head self attention over the whole sequence, no KV cache.
#[derive(Debug, Clone)]
pub struct CausalSelfAttention {
    qkv: Linear,
    proj: Linear,
    num_heads: usize,
    head_dim: usize,
}

impl CausalSelfAttention {
    pub fn new(config: &CausalLmConfig, vb: VarBuilder) -> Result<Self> {
        let hidden = config.hidden_size;
        Ok(Self {
            qkv: linear_layer(hidden, 3 * hidden, vb.pp("c_attn"))?,
            proj: linear_layer(hidden, hidden, vb.pp("c_proj"))?,
            num_heads: config.num_heads,
            head_dim: config.head_dim(),
        })
    }
}

impl Module for CausalSelfAttention {
    /// xs: [batch, seq, hidden] -> [batch, seq, hidden]
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let (batch, seq_len, hidden) = xs.dims3()?;
        let qkv = self.qkv.forward(xs)?;
        let split = |idx: usize| -> Result<Tensor> {
            qkv.narrow(D::Minus1, idx * hidden, hidden)?
                .reshape((batch, seq_len, self.num_heads, self.head_dim))?
                .transpose(1, 2)?
                .contiguous()
        };
        let (q, k, v) = (split(0)?, split(1)?, split(2)?);

        let scale = (self.head_dim as f64).sqrt();
        let scores = (q.matmul(&k.t()?.contiguous()?)? / scale)?;
        let scores = scores.broadcast_add(&causal_mask(seq_len, xs.device())?)?;
        let weights = candle_nn::ops::softmax(&scores, D::Minus1)?;
        let attended = weights.matmul(&v)?;

        let attended = attended
            .transpose(1, 2)?
            .reshape((batch, seq_len, self.num_heads * self.head_dim))?;
        self.proj.forward(&attended)
    }
}

/// Upper triangle filled with -inf, diagonal and below 0.
fn causal_mask(seq_len: usize, device: &Device) -> Result<Tensor> {
    let mask: Vec<f32> = (0..seq_len)
        .flat_map(|i| (0..seq_len).map(move |j| if j > i { f32::NEG_INFINITY } else { 0.0 }))
        .collect();
    Tensor::from_vec(mask, (seq_len, seq_len), device)
}

#[derive(Debug, Clone)]
pub struct Mlp {
    fc: Linear,
    proj: Linear,
}

impl Mlp {
    pub fn new(config: &CausalLmConfig, vb: VarBuilder) -> Result<Self> {
        let hidden = config.hidden_size;
        Ok(Self {
            fc: linear_layer(hidden, 4 * hidden, vb.pp("c_fc"))?,
            proj: linear_layer(4 * hidden, hidden, vb.pp("c_proj"))?,
        })
    }
}

impl Module for Mlp {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        self.proj.forward(&self.fc.forward(xs)?.gelu()?)
    }
}

/// Pre-norm transformer block.
#[derive(Debug, Clone)]
pub struct Block {
    ln_1: LayerNorm,
    attn: CausalSelfAttention,
    ln_2: LayerNorm,
    mlp: Mlp,
}

impl Block {
    pub fn new(config: &CausalLmConfig, vb: VarBuilder) -> Result<Self> {
        let eps = config.layer_norm_eps;
        Ok(Self {
            ln_1: LayerNorm::new(config.hidden_size, eps, vb.pp("ln_1"))?,
            attn: CausalSelfAttention::new(config, vb.pp("attn"))?,
            ln_2: LayerNorm::new(config.hidden_size, eps, vb.pp("ln_2"))?,
            mlp: Mlp::new(config, vb.pp("mlp"))?,
        })
    }
}

impl Module for Block {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let xs = (xs + self.attn.forward(&self.ln_1.forward(xs)?)?)?;
        let mlp_out = self.mlp.forward(&self.ln_2.forward(&xs)?)?;
        xs + mlp_out
    }
}

#[cfg(test)]
mod test {
    use super::{Block, CausalSelfAttention, LayerNorm};
    use crate::config::CausalLmConfig;
    use candle_core::{DType, Device, Result, Tensor};
    use candle_nn::{Module, VarBuilder, VarMap};

    fn config() -> CausalLmConfig {
        let mut config = CausalLmConfig::tiny(11);
        config.hidden_size = 16;
        config.num_heads = 2;
        config
    }

    #[test]
    fn layer_norm_normalises_last_dim() -> Result<()> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let norm = LayerNorm::new(8, 1e-5, vb.pp("ln"))?;
        let xs = Tensor::randn(3.0f32, 2.0, (2, 5, 8), &Device::Cpu)?;
        let ys = norm.forward(&xs)?;
        let means = ys.mean_keepdim(2)?.flatten_all()?.to_vec1::<f32>()?;
        for mean in means {
            assert!(mean.abs() < 1e-4, "mean should be ~0, got {mean}");
        }
        Ok(())
    }

    #[test]
    fn attention_is_causal() -> Result<()> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let attn = CausalSelfAttention::new(&config(), vb.pp("attn"))?;
        let xs = Tensor::randn(0.0f32, 1.0, (1, 4, 16), &Device::Cpu)?;
        let full = attn.forward(&xs)?;
        let prefix = attn.forward(&xs.narrow(1, 0, 2)?)?;
        // changing later positions must not affect earlier outputs
        let diff = (full.narrow(1, 0, 2)? - prefix)?
            .abs()?
            .flatten_all()?
            .max(0)?
            .to_scalar::<f32>()?;
        assert!(diff < 1e-5, "prefix outputs differ by {diff}");
        Ok(())
    }

    #[test]
    fn block_gradient_flows() -> Result<()> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let block = Block::new(&config(), vb.pp("block"))?;
        let xs = Tensor::randn(0.0f32, 1.0, (1, 3, 16), &Device::Cpu)?;
        let loss = block.forward(&xs)?.sqr()?.sum_all()?;
        let grads = loss.backward()?;
        for var in varmap.all_vars() {
            assert!(grads.get(var.as_tensor()).is_some());
        }
        Ok(())
    }
}
