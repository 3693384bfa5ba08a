use serde_json::json;

use crate::error::{OmInferenceSource, Result};
use crate::om::model::OmPatterns;
use crate::om::parse::{
    OmMemorySection, parse_memory_section_xml_accuracy_first, render_patterns_block,
};
use crate::om::prompt::{
    OmReflectorPromptInput, build_reflector_system_prompt, build_reflector_user_prompt,
};
use crate::om::sink::{OmEvent, OmEventKind, OmEventSink};
use crate::om::tokens::{TokenCounter, count_generation_tokens};
use crate::om::transform::{merge_patterns, validate_reflection_compression};

use super::retry::{RetryPolicy, Sleeper};
use super::{CompletionModel, CompletionRequest, OmInferenceUsage};

/// Guidance level used for the single compression retry.
const COMPRESSION_RETRY_LEVEL: u8 = 2;

#[derive(Debug, Clone, Copy)]
pub struct ReflectorInput<'a> {
    pub observations: &'a str,
    pub patterns: &'a OmPatterns,
    pub manual_guidance: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReflectorOutput {
    pub section: OmMemorySection,
    /// Usage summed over every call, including the compression retry.
    pub usage: OmInferenceUsage,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub compressed: bool,
    pub retried: bool,
}

/// Reflector step bound to one scope key.
#[derive(Clone, Copy)]
pub struct Reflector<'a> {
    pub model: &'a dyn CompletionModel,
    pub retry: RetryPolicy,
    pub sleeper: &'a dyn Sleeper,
    pub sink: &'a dyn OmEventSink,
    pub counter: &'a dyn TokenCounter,
    pub compression_ratio: f64,
    pub scope_key: &'a str,
}

impl Reflector<'_> {
    /// Reflects once, and once more with aggressive guidance when the first
    /// output does not compress. The retry output is accepted either way.
    ///
    /// Compression compares generation costs: observations plus the
    /// serialized patterns the generation would carry.
    pub fn reflect(&self, input: ReflectorInput<'_>) -> Result<ReflectorOutput> {
        let input_tokens =
            count_generation_tokens(self.counter, input.observations, input.patterns);
        let patterns_block = render_patterns_block(input.patterns);

        let (section, mut usage) = self.call(&input, patterns_block.as_deref(), 0)?;
        let output_tokens = self.output_tokens(&input, &section);
        if validate_reflection_compression(output_tokens, input_tokens, self.compression_ratio) {
            return Ok(ReflectorOutput {
                section,
                usage,
                input_tokens,
                output_tokens,
                compressed: true,
                retried: false,
            });
        }

        tracing::info!(
            scope_key = self.scope_key,
            input_tokens,
            output_tokens,
            "reflection did not compress, retrying with aggressive guidance"
        );
        self.sink.record(
            &OmEvent::new(OmEventKind::CompressionRetry, self.scope_key).with_detail(json!({
                "input_tokens": input_tokens,
                "output_tokens": output_tokens,
            })),
        );

        let (section, retry_usage) =
            self.call(&input, patterns_block.as_deref(), COMPRESSION_RETRY_LEVEL)?;
        usage.add(retry_usage);
        let output_tokens = self.output_tokens(&input, &section);
        let compressed =
            validate_reflection_compression(output_tokens, input_tokens, self.compression_ratio);
        if !compressed {
            tracing::warn!(
                scope_key = self.scope_key,
                input_tokens,
                output_tokens,
                "reflection still not compressed after retry, accepting output"
            );
            self.sink.record(
                &OmEvent::new(OmEventKind::CompressionNotAchieved, self.scope_key).with_detail(
                    json!({
                        "input_tokens": input_tokens,
                        "output_tokens": output_tokens,
                    }),
                ),
            );
        }
        Ok(ReflectorOutput {
            section,
            usage,
            input_tokens,
            output_tokens,
            compressed,
            retried: true,
        })
    }

    fn output_tokens(&self, input: &ReflectorInput<'_>, section: &OmMemorySection) -> u32 {
        let patterns = merge_patterns(input.patterns, &section.patterns);
        count_generation_tokens(self.counter, &section.observations, &patterns)
    }

    fn call(
        &self,
        input: &ReflectorInput<'_>,
        patterns_block: Option<&str>,
        compression_level: u8,
    ) -> Result<(OmMemorySection, OmInferenceUsage)> {
        let request = CompletionRequest {
            source: OmInferenceSource::Reflector,
            system_prompt: build_reflector_system_prompt(),
            user_prompt: build_reflector_user_prompt(OmReflectorPromptInput {
                observations: input.observations,
                patterns: patterns_block,
                manual_guidance: input.manual_guidance,
                compression_level,
            }),
        };
        let response =
            self.retry
                .complete(self.model, &request, self.sleeper, self.sink, self.scope_key)?;
        Ok((
            parse_memory_section_xml_accuracy_first(&response.text),
            response.usage,
        ))
    }
}
