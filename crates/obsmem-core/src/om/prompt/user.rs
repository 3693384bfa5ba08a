use crate::om::transform::reflector_compression_guidance;

use super::formatter::{
    format_multi_thread_observer_messages_for_prompt, format_observer_messages_for_prompt,
};
use super::{OmMultiThreadObserverPromptInput, OmObserverPromptInput, OmReflectorPromptInput};

const PREVIOUS_OBSERVATIONS_NOTE: &str =
    "\n\n---\n\nDo not repeat these observations. Your output is appended to them.\n\n";

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

fn push_existing_memory(prompt: &mut String, observations: Option<&str>, patterns: Option<&str>) {
    if let Some(existing) = non_empty(observations) {
        prompt.push_str("## Previous Observations\n\n");
        prompt.push_str(existing);
        prompt.push_str(PREVIOUS_OBSERVATIONS_NOTE);
    }
    if let Some(patterns) = non_empty(patterns) {
        prompt.push_str("## Known Patterns\n\n");
        prompt.push_str(patterns);
        prompt.push_str("\n\nOnly report pattern entries that are missing above.\n\n---\n\n");
    }
}

pub fn build_observer_user_prompt(input: OmObserverPromptInput<'_>) -> String {
    let mut prompt = String::new();
    push_existing_memory(
        &mut prompt,
        input.existing_observations,
        input.existing_patterns,
    );

    prompt.push_str("## New Message History to Observe\n\n");
    prompt.push_str(&format_observer_messages_for_prompt(input.messages));
    prompt.push_str("\n\n---\n\n");

    if let Some(other_context) = non_empty(input.other_conversation_context) {
        prompt.push_str("## Other Conversation Context\n\n");
        prompt.push_str(other_context);
        prompt.push_str("\n\n---\n\n");
    }

    prompt.push_str("## Your Task\n\n");
    prompt.push_str(
        "Extract new observations from the message history. Keep them factual and concise and do not duplicate previous observations.",
    );
    prompt
}

pub fn build_multi_thread_observer_user_prompt(
    input: OmMultiThreadObserverPromptInput<'_>,
) -> String {
    let mut prompt = String::new();
    push_existing_memory(
        &mut prompt,
        input.existing_observations,
        input.existing_patterns,
    );

    let formatted = format_multi_thread_observer_messages_for_prompt(input.threads);
    prompt.push_str("## New Message History to Observe\n\n");
    if formatted.is_empty() {
        prompt.push_str("No thread messages provided.");
    } else {
        prompt.push_str("Messages come from several threads, each wrapped in a <thread id=\"...\"> tag.\n\n");
        prompt.push_str(&formatted);
    }
    prompt.push_str("\n\n---\n\n## Your Task\n\n");
    prompt.push_str("Extract new observations for every thread and group them in <thread id=\"...\"> blocks inside <observations>. Thread ids in this batch: ");
    prompt.push_str(
        &input
            .threads
            .iter()
            .map(|thread| thread.thread_id.trim())
            .filter(|id| !id.is_empty())
            .collect::<Vec<_>>()
            .join(", "),
    );
    prompt.push('.');
    prompt
}

pub fn build_reflector_user_prompt(input: OmReflectorPromptInput<'_>) -> String {
    let mut prompt = format!(
        "## OBSERVATIONS TO REFLECT ON\n\n{}",
        input.observations.trim()
    );
    if let Some(patterns) = non_empty(input.patterns) {
        prompt.push_str("\n\n## PATTERNS\n\n");
        prompt.push_str(patterns);
    }
    prompt.push_str("\n\n---\n\nProduce a refined, condensed version. It will become the assistant's entire memory.");

    if let Some(guidance) = non_empty(input.manual_guidance) {
        prompt.push_str("\n\n## SPECIFIC GUIDANCE\n\n");
        prompt.push_str(guidance);
    }

    let compression_guidance = reflector_compression_guidance(input.compression_level);
    if !compression_guidance.is_empty() {
        prompt.push_str("\n\n");
        prompt.push_str(compression_guidance);
    }
    prompt
}
