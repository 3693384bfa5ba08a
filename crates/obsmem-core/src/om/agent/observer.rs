use serde_json::json;

use crate::error::{ObsmemError, OmInferenceFailureKind, OmInferenceSource, Result};
use crate::om::model::{OmMessage, OmPatterns};
use crate::om::parse::{
    OmMemorySection, OmThreadObservation, demultiplex_thread_sections,
    parse_memory_section_xml_accuracy_first, parse_multi_thread_observer_output_accuracy_first,
    render_patterns_block,
};
use crate::om::prompt::{
    OmMultiThreadObserverPromptInput, OmObserverPromptInput, OmObserverThreadMessages,
    build_multi_thread_observer_system_prompt, build_multi_thread_observer_user_prompt,
    build_observer_system_prompt, build_observer_user_prompt,
};
use crate::om::sink::{OmEvent, OmEventKind, OmEventSink};

use super::retry::{RetryPolicy, Sleeper};
use super::{CompletionModel, CompletionRequest, OmInferenceUsage};

const DIAGNOSTIC_PROMPT_PREVIEW_CHARS: usize = 2_000;
const DIAGNOSTIC_MESSAGE_SAMPLE: usize = 5;
const DIAGNOSTIC_MESSAGE_CHARS: usize = 200;

#[derive(Debug, Clone, Copy)]
pub struct ObserverInput<'a> {
    pub existing_observations: &'a str,
    pub existing_patterns: &'a OmPatterns,
    pub messages: &'a [OmMessage],
    pub other_conversation_context: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObserverOutput {
    pub section: OmMemorySection,
    pub usage: OmInferenceUsage,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultiThreadObserverOutput {
    /// One entry per requested thread, in request order.
    pub threads: Vec<OmThreadObservation>,
    pub usage: OmInferenceUsage,
}

/// Observer step bound to one scope key.
#[derive(Clone, Copy)]
pub struct Observer<'a> {
    pub model: &'a dyn CompletionModel,
    pub retry: RetryPolicy,
    pub sleeper: &'a dyn Sleeper,
    pub sink: &'a dyn OmEventSink,
    pub scope_key: &'a str,
}

fn preview(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

impl Observer<'_> {
    pub fn observe(&self, input: ObserverInput<'_>) -> Result<ObserverOutput> {
        let patterns_block = render_patterns_block(input.existing_patterns);
        let request = CompletionRequest {
            source: OmInferenceSource::Observer,
            system_prompt: build_observer_system_prompt(),
            user_prompt: build_observer_user_prompt(OmObserverPromptInput {
                existing_observations: Some(input.existing_observations),
                existing_patterns: patterns_block.as_deref(),
                messages: input.messages,
                other_conversation_context: input.other_conversation_context,
            }),
        };
        let response = self.complete(&request, input.messages)?;
        Ok(ObserverOutput {
            section: parse_memory_section_xml_accuracy_first(&response.text),
            usage: response.usage,
        })
    }

    /// Batched call over several threads. Threads the model did not answer
    /// for come back empty with `addressed == false`.
    pub fn observe_threads(
        &self,
        existing_observations: &str,
        existing_patterns: &OmPatterns,
        threads: &[OmObserverThreadMessages<'_>],
    ) -> Result<MultiThreadObserverOutput> {
        let patterns_block = render_patterns_block(existing_patterns);
        let request = CompletionRequest {
            source: OmInferenceSource::Observer,
            system_prompt: build_multi_thread_observer_system_prompt(),
            user_prompt: build_multi_thread_observer_user_prompt(
                OmMultiThreadObserverPromptInput {
                    existing_observations: Some(existing_observations),
                    existing_patterns: patterns_block.as_deref(),
                    threads,
                },
            ),
        };
        let sample = threads
            .iter()
            .flat_map(|thread| thread.messages.iter())
            .cloned()
            .collect::<Vec<_>>();
        let response = self.complete(&request, &sample)?;

        let sections = parse_multi_thread_observer_output_accuracy_first(&response.text);
        let thread_ids = threads
            .iter()
            .map(|thread| thread.thread_id.to_string())
            .collect::<Vec<_>>();
        let results = demultiplex_thread_sections(&sections, &thread_ids);
        for result in results.iter().filter(|result| !result.addressed) {
            tracing::debug!(
                scope_key = self.scope_key,
                thread_id = %result.thread_id,
                "observer output did not address thread"
            );
            self.sink.record(
                &OmEvent::new(OmEventKind::ThreadNotAddressed, self.scope_key)
                    .with_thread(result.thread_id.clone()),
            );
        }
        Ok(MultiThreadObserverOutput {
            threads: results,
            usage: response.usage,
        })
    }

    fn complete(
        &self,
        request: &CompletionRequest,
        messages: &[OmMessage],
    ) -> Result<super::CompletionResponse> {
        self.retry
            .complete(self.model, request, self.sleeper, self.sink, self.scope_key)
            .inspect_err(|err| self.report_content_policy(err, request, messages))
    }

    fn report_content_policy(
        &self,
        err: &ObsmemError,
        request: &CompletionRequest,
        messages: &[OmMessage],
    ) {
        let ObsmemError::OmInference {
            kind: OmInferenceFailureKind::ContentPolicy,
            message,
            ..
        } = err
        else {
            return;
        };
        let sample = messages
            .iter()
            .take(DIAGNOSTIC_MESSAGE_SAMPLE)
            .map(|message| {
                json!({
                    "id": message.id,
                    "thread_id": message.thread_id,
                    "role": message.role,
                    "content": preview(&message.content, DIAGNOSTIC_MESSAGE_CHARS),
                })
            })
            .collect::<Vec<_>>();
        self.sink.record(
            &OmEvent::new(OmEventKind::ContentPolicyRejected, self.scope_key).with_detail(json!({
                "source": request.source.as_str(),
                "message": message,
                "prompt_preview": preview(&request.user_prompt, DIAGNOSTIC_PROMPT_PREVIEW_CHARS),
                "message_sample": sample,
            })),
        );
    }
}
