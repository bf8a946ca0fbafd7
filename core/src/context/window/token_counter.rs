//! Token Counting
//!
//! Provides content-size estimation for context window budgets.

/// Token counting interface for whatever backend consumes the selected context
pub trait TokenCounter: Send + Sync {
    /// Count tokens in text
    fn count_text(&self, text: &str) -> usize;

    /// Estimate tokens for JSON content
    fn count_json(&self, json: &serde_json::Value) -> usize {
        self.count_text(&json.to_string())
    }
}

/// Character-based estimator.
///
/// Divides the byte length by an average characters-per-token ratio and adds a 10%
/// buffer for special tokens. JSON uses a tighter 3 chars/token.
pub struct CharEstimateCounter {
    chars_per_token: f32,
}

impl CharEstimateCounter {
    pub fn new(chars_per_token: f32) -> Self {
        Self {
            chars_per_token: if chars_per_token > 0.0 {
                chars_per_token
            } else {
                4.0
            },
        }
    }

    pub fn chars_per_token(&self) -> f32 {
        self.chars_per_token
    }

    fn estimate(len: usize, ratio: f32) -> usize {
        let base = (len as f32 / ratio).ceil() as usize;
        base + base / 10
    }
}

impl Default for CharEstimateCounter {
    fn default() -> Self {
        Self::new(4.0)
    }
}

impl TokenCounter for CharEstimateCounter {
    fn count_text(&self, text: &str) -> usize {
        Self::estimate(text.len(), self.chars_per_token)
    }

    fn count_json(&self, json: &serde_json::Value) -> usize {
        Self::estimate(json.to_string().len(), 3.0)
    }
}
