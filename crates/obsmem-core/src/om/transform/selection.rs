use chrono::{DateTime, Utc};

use crate::om::model::OmMessage;

/// Unobserved messages of one thread together with their token cost.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadBacklog {
    pub thread_id: String,
    pub messages: Vec<OmMessage>,
    pub tokens: u32,
}

impl ThreadBacklog {
    #[must_use]
    pub fn oldest_at(&self) -> Option<DateTime<Utc>> {
        self.messages.iter().map(|message| message.created_at).min()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ThreadSelection {
    pub selected: Vec<ThreadBacklog>,
    pub deferred: Vec<ThreadBacklog>,
}

impl ThreadSelection {
    #[must_use]
    pub fn selected_tokens(&self) -> u32 {
        self.selected
            .iter()
            .fold(0u32, |sum, backlog| sum.saturating_add(backlog.tokens))
    }

    #[must_use]
    pub fn deferred_tokens(&self) -> u32 {
        self.deferred
            .iter()
            .fold(0u32, |sum, backlog| sum.saturating_add(backlog.tokens))
    }
}

/// Takes the largest backlogs first until their sum reaches `threshold`.
/// When everything together stays below it, every non-empty thread is taken.
#[must_use]
pub fn select_threads_for_observation(
    backlogs: Vec<ThreadBacklog>,
    threshold: u32,
) -> ThreadSelection {
    let mut backlogs = backlogs
        .into_iter()
        .filter(|backlog| !backlog.messages.is_empty())
        .collect::<Vec<_>>();
    backlogs.sort_by(|a, b| {
        b.tokens
            .cmp(&a.tokens)
            .then_with(|| a.thread_id.cmp(&b.thread_id))
    });

    let mut selection = ThreadSelection::default();
    let mut accumulated = 0u32;
    for backlog in backlogs {
        if !selection.selected.is_empty() && accumulated >= threshold {
            selection.deferred.push(backlog);
            continue;
        }
        accumulated = accumulated.saturating_add(backlog.tokens);
        selection.selected.push(backlog);
    }
    selection
}

/// Oldest backlog first so slow threads are not starved across cycles.
pub fn order_threads_for_fairness(threads: &mut [ThreadBacklog]) {
    threads.sort_by(|a, b| {
        a.oldest_at()
            .cmp(&b.oldest_at())
            .then_with(|| a.thread_id.cmp(&b.thread_id))
    });
}

/// Splits `threads` into Observer batches of at most `max_tokens_per_batch`.
/// A thread larger than the cap gets a batch of its own.
#[must_use]
pub fn chunk_threads_by_token_cap(
    threads: Vec<ThreadBacklog>,
    max_tokens_per_batch: u32,
) -> Vec<Vec<ThreadBacklog>> {
    let mut batches = Vec::<Vec<ThreadBacklog>>::new();
    let mut current = Vec::<ThreadBacklog>::new();
    let mut current_tokens = 0u32;
    for thread in threads {
        if !current.is_empty()
            && current_tokens.saturating_add(thread.tokens) > max_tokens_per_batch
        {
            batches.push(std::mem::take(&mut current));
            current_tokens = 0;
        }
        current_tokens = current_tokens.saturating_add(thread.tokens);
        current.push(thread);
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
}
