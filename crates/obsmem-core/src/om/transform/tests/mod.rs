use chrono::{DateTime, Duration, TimeZone, Utc};

use crate::om::model::{OmMessage, OmPatterns};

use super::*;

fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
}

fn message(id: &str, thread_id: &str, minute: i64, content: &str) -> OmMessage {
    OmMessage::new(
        id,
        thread_id,
        "r-1",
        "user",
        content,
        base_time() + Duration::minutes(minute),
    )
}

fn backlog(thread_id: &str, tokens: u32, oldest_minute: i64) -> ThreadBacklog {
    ThreadBacklog {
        thread_id: thread_id.to_string(),
        messages: vec![message(
            &format!("{thread_id}-m"),
            thread_id,
            oldest_minute,
            "x",
        )],
        tokens,
    }
}

fn patterns(entries: &[(&str, &[&str])]) -> OmPatterns {
    entries
        .iter()
        .map(|(name, items)| {
            (
                (*name).to_string(),
                items.iter().map(|item| (*item).to_string()).collect(),
            )
        })
        .collect()
}

mod selection;
