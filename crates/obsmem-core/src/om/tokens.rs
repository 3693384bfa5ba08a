use crate::llm_io::estimate_text_tokens;
use crate::om::model::{OmMessage, OmPatterns};
use crate::om::parse::render_patterns_block;

pub const TOKENS_PER_MESSAGE: u32 = 4;
pub const TOKENS_PER_CONVERSATION: u32 = 24;

/// Token-cost oracle. Implementations must be deterministic and side-effect
/// free: compression validation compares two counts of the same counter.
pub trait TokenCounter: Send + Sync {
    fn count_text(&self, text: &str) -> u32;

    fn count_messages(&self, messages: &[OmMessage]) -> u32 {
        if messages.is_empty() {
            return 0;
        }
        messages
            .iter()
            .fold(TOKENS_PER_CONVERSATION, |sum, message| {
                sum.saturating_add(TOKENS_PER_MESSAGE)
                    .saturating_add(self.count_text(&message.role))
                    .saturating_add(self.count_text(&message.content))
            })
    }

    fn count_observations(&self, observations: &str) -> u32 {
        self.count_text(observations)
    }
}

/// Character-ratio estimator (four characters per token).
#[derive(Debug, Clone, Copy, Default)]
pub struct CharEstimateTokenCounter;

impl TokenCounter for CharEstimateTokenCounter {
    fn count_text(&self, text: &str) -> u32 {
        estimate_text_tokens(text)
    }
}

/// Cached cost of a generation: observations plus the serialized patterns.
pub fn count_generation_tokens(
    counter: &dyn TokenCounter,
    observations: &str,
    patterns: &OmPatterns,
) -> u32 {
    let observation_tokens = counter.count_observations(observations);
    match render_patterns_block(patterns) {
        Some(block) => observation_tokens.saturating_add(counter.count_text(&block)),
        None => observation_tokens,
    }
}
