mod formatter;
mod system;
mod user;

use crate::om::model::OmMessage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OmObserverPromptInput<'a> {
    pub existing_observations: Option<&'a str>,
    /// Rendered `<patterns>` block of the active generation.
    pub existing_patterns: Option<&'a str>,
    pub messages: &'a [OmMessage],
    pub other_conversation_context: Option<&'a str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OmObserverThreadMessages<'a> {
    pub thread_id: &'a str,
    pub messages: &'a [OmMessage],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OmMultiThreadObserverPromptInput<'a> {
    pub existing_observations: Option<&'a str>,
    pub existing_patterns: Option<&'a str>,
    pub threads: &'a [OmObserverThreadMessages<'a>],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OmReflectorPromptInput<'a> {
    pub observations: &'a str,
    pub patterns: Option<&'a str>,
    pub manual_guidance: Option<&'a str>,
    /// 0 = none, 1 = standard, 2 = aggressive.
    pub compression_level: u8,
}

pub use formatter::{
    format_multi_thread_observer_messages_for_prompt, format_observer_messages_for_prompt,
};
pub use system::{
    build_multi_thread_observer_system_prompt, build_observer_system_prompt,
    build_reflector_system_prompt,
};
pub use user::{
    build_multi_thread_observer_user_prompt, build_observer_user_prompt,
    build_reflector_user_prompt,
};
