use anyhow::{Error, Result};
use lmrl_core::tokenizer::{ByteTokenizer, Tokenizer};
use std::path::Path;

/// Tokenizer loaded from a HuggingFace `tokenizer.json`.
pub struct HfTokenizer {
    inner: tokenizers::Tokenizer,
    bos_token: Option<u32>,
}

impl HfTokenizer {
    /// GPT-2 uses its end-of-text token to start sequences as well.
    const BOS_CANDIDATES: [&'static str; 3] = ["<|endoftext|>", "<s>", "<bos>"];

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let inner = tokenizers::Tokenizer::from_file(path).map_err(Error::msg)?;
        let bos_token = Self::BOS_CANDIDATES
            .iter()
            .find_map(|token| inner.token_to_id(token));
        Ok(Self { inner, bos_token })
    }
}

impl Tokenizer for HfTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        let encoding = self.inner.encode(text, false).map_err(Error::msg)?;
        Ok(encoding.get_ids().to_vec())
    }

    fn decode(&self, token_ids: &[u32]) -> Result<String> {
        self.inner.decode(token_ids, true).map_err(Error::msg)
    }

    fn vocab_size(&self) -> usize {
        self.inner.get_vocab_size(true)
    }

    fn bos_token(&self) -> Option<u32> {
        self.bos_token
    }
}

pub enum TokenizerKind {
    Bytes(ByteTokenizer),
    Hf(Box<HfTokenizer>),
}

impl Tokenizer for TokenizerKind {
    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        match self {
            Self::Bytes(tokenizer) => tokenizer.encode(text),
            Self::Hf(tokenizer) => tokenizer.encode(text),
        }
    }

    fn decode(&self, token_ids: &[u32]) -> Result<String> {
        match self {
            Self::Bytes(tokenizer) => tokenizer.decode(token_ids),
            Self::Hf(tokenizer) => tokenizer.decode(token_ids),
        }
    }

    fn vocab_size(&self) -> usize {
        match self {
            Self::Bytes(tokenizer) => tokenizer.vocab_size(),
            Self::Hf(tokenizer) => tokenizer.vocab_size(),
        }
    }

    fn bos_token(&self) -> Option<u32> {
        match self {
            Self::Bytes(tokenizer) => tokenizer.bos_token(),
            Self::Hf(tokenizer) => tokenizer.bos_token(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::{HfTokenizer, TokenizerKind};
    use anyhow::Result;
    use lmrl_core::tokenizer::{ByteTokenizer, Tokenizer};

    #[test]
    fn missing_tokenizer_file_is_an_error() {
        assert!(HfTokenizer::from_file("does/not/exist/tokenizer.json").is_err());
    }

    #[test]
    fn kind_dispatches_to_bytes() -> Result<()> {
        let tokenizer = TokenizerKind::Bytes(ByteTokenizer);
        assert_eq!(tokenizer.encode("ab")?, vec![97, 98]);
        assert_eq!(tokenizer.bos_token(), Some(ByteTokenizer::END_OF_TEXT));
        Ok(())
    }
}
