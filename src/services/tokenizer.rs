use thiserror::Error;

#[derive(Debug, Error)]
pub enum TokenizeError {
    #[error("No tokenizer available for model '{model}': {reason}")]
    UnsupportedModel { model: String, reason: String },
}

/// Token counting seam. The production implementation wraps tiktoken; tests
/// substitute fixed counts so pricing assertions stay exact.
pub trait Tokenizer: Send + Sync {
    fn count_tokens(&self, model_name: &str, text: &str) -> Result<usize, TokenizeError>;
}

/// BPE token counting via tiktoken's model registry.
pub struct TiktokenTokenizer;

impl Tokenizer for TiktokenTokenizer {
    fn count_tokens(&self, model_name: &str, text: &str) -> Result<usize, TokenizeError> {
        let bpe = tiktoken_rs::get_bpe_from_model(model_name).map_err(|e| {
            TokenizeError::UnsupportedModel {
                model: model_name.to_string(),
                reason: e.to_string(),
            }
        })?;
        Ok(bpe.encode_with_special_tokens(text).len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_model_counts_tokens() {
        let tokenizer = TiktokenTokenizer;
        let count = tokenizer
            .count_tokens("gpt-4", "Hello, world!")
            .expect("gpt-4 should have a tokenizer");
        assert!(count > 0);
    }

    #[test]
    fn unknown_model_is_an_error() {
        let tokenizer = TiktokenTokenizer;
        let result = tokenizer.count_tokens("not-a-real-model", "Hello");
        assert!(matches!(
            result,
            Err(TokenizeError::UnsupportedModel { .. })
        ));
    }
}
