use anyhow::Result;

/// Translates between text and token ids.
pub trait Tokenizer: Send + 'static {
    fn encode(&self, text: &str) -> Result<Vec<u32>>;

    /// Decodes `token_ids`, dropping special tokens.
    fn decode(&self, token_ids: &[u32]) -> Result<String>;

    fn vocab_size(&self) -> usize;

    /// Token used to start a sequence when the prompt encodes to nothing.
    fn bos_token(&self) -> Option<u32>;
}

/// Raw UTF-8 bytes as tokens, plus a single end-of-text token.
#[derive(Debug, Clone, Copy, Default)]
pub struct ByteTokenizer;

impl ByteTokenizer {
    pub const END_OF_TEXT: u32 = 256;
}

impl Tokenizer for ByteTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        Ok(text.bytes().map(u32::from).collect())
    }

    fn decode(&self, token_ids: &[u32]) -> Result<String> {
        let bytes: Vec<u8> = token_ids
            .iter()
            .filter_map(|&id| u8::try_from(id).ok())
            .collect();
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    fn vocab_size(&self) -> usize {
        Self::END_OF_TEXT as usize + 1
    }

    fn bos_token(&self) -> Option<u32> {
        Some(Self::END_OF_TEXT)
    }
}
