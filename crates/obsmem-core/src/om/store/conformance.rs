//! Behavior every `OmStore` implementation must share.

use chrono::{DateTime, Duration, TimeZone, Utc};

use super::*;
use crate::om::model::{OmOriginType, OmScope};

fn at(minute: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap() + Duration::minutes(minute)
}

fn message(id: &str, thread_id: &str, resource_id: &str, minute: i64) -> OmMessage {
    OmMessage::new(id, thread_id, resource_id, "user", format!("body {id}"), at(minute))
}

fn update(text: &str, tokens: u32, watermark: Option<DateTime<Utc>>, ids: &[&str]) -> ActiveObservationsUpdate {
    ActiveObservationsUpdate {
        active_observations: text.to_string(),
        observation_token_count: tokens,
        last_observed_at: watermark,
        patterns: OmPatterns::new(),
        observed_message_ids: ids.iter().map(ToString::to_string).collect(),
        pending_message_tokens: 0,
    }
}

pub(crate) fn run_all(store: &dyn OmStore) {
    initialize_is_idempotent(store);
    update_never_regresses_watermark(store);
    flags_are_compare_and_swap(store);
    reflection_appends_generation(store);
    stale_reflection_conflicts(store);
    messages_are_filtered_and_ordered(store);
    thread_metadata_round_trips(store);
    clear_removes_only_the_key(store);
    unknown_generation_is_not_found(store);
}

fn initialize_is_idempotent(store: &dyn OmStore) {
    let key = OmRecordKey::thread("init-t", "init-r");
    assert!(store.get_latest_generation(&key).expect("latest").is_none());
    let first = store
        .initialize_generation(&key, OmRecordInit { last_observed_at: Some(at(5)) })
        .expect("init");
    assert_eq!(first.scope, OmScope::Thread);
    assert_eq!(first.scope_key, "thread:init-r:init-t");
    assert_eq!(first.origin_type, OmOriginType::Observation);
    assert_eq!(first.last_observed_at, Some(at(5)));

    let second = store
        .initialize_generation(&key, OmRecordInit { last_observed_at: Some(at(50)) })
        .expect("init again");
    assert_eq!(second.id, first.id);
    assert_eq!(second.last_observed_at, Some(at(5)));
}

fn update_never_regresses_watermark(store: &dyn OmStore) {
    let key = OmRecordKey::thread("upd-t", "upd-r");
    let record = store
        .initialize_generation(&key, OmRecordInit::default())
        .expect("init");
    let mut patterns = OmPatterns::new();
    patterns.insert("tools".to_string(), vec!["ripgrep".to_string()]);
    let updated = store
        .update_active_observations(
            &record.id,
            ActiveObservationsUpdate {
                patterns: patterns.clone(),
                ..update("* one", 3, Some(at(10)), &["m1", "m2"])
            },
        )
        .expect("update");
    assert_eq!(updated.last_observed_at, Some(at(10)));
    assert_eq!(updated.patterns, patterns);

    let updated = store
        .update_active_observations(&record.id, update("* one\n* two", 6, Some(at(3)), &["m2", "m3"]))
        .expect("update");
    assert_eq!(updated.last_observed_at, Some(at(10)));
    assert_eq!(updated.observation_token_count, 6);
    assert_eq!(updated.observed_message_ids, vec!["m1", "m2", "m3"]);

    store.set_pending_message_tokens(&record.id, 321).expect("pending");
    let latest = store.get_latest_generation(&key).expect("latest").expect("record");
    assert_eq!(latest.pending_message_tokens, 321);
    assert_eq!(latest.active_observations, "* one\n* two");
}

fn flags_are_compare_and_swap(store: &dyn OmStore) {
    let key = OmRecordKey::resource("flag-r");
    let record = store
        .initialize_generation(&key, OmRecordInit::default())
        .expect("init");
    assert!(store.try_set_observing_flag(&record.id, true).expect("first"));
    assert!(!store.try_set_observing_flag(&record.id, true).expect("second"));
    assert!(store.try_set_reflecting_flag(&record.id, true).expect("reflect"));
    let latest = store.get_latest_generation(&key).expect("latest").expect("record");
    assert!(latest.is_observing && latest.is_reflecting);
    assert!(store.try_set_observing_flag(&record.id, false).expect("release"));
    assert!(!store.try_set_observing_flag(&record.id, false).expect("already released"));
}

fn reflection_appends_generation(store: &dyn OmStore) {
    let key = OmRecordKey::thread("refl-t", "refl-r");
    let original = store
        .initialize_generation(&key, OmRecordInit::default())
        .expect("init");
    let large = store
        .update_active_observations(&original.id, update("* fact", 25_000, Some(at(20)), &["m1", "m2"]))
        .expect("update");
    assert!(store.try_set_reflecting_flag(&large.id, true).expect("lock"));
    let large = store.get_generation(&large.id).expect("get").expect("record");

    let reflected = store
        .create_reflection_generation(
            &large,
            ReflectionGenerationInput {
                active_observations: "* condensed".to_string(),
                observation_token_count: 500,
                patterns: OmPatterns::new(),
                suggested_continuation: Some("ask about the move".to_string()),
            },
        )
        .expect("reflect");
    assert_ne!(reflected.id, original.id);
    assert_eq!(reflected.previous_generation_id.as_deref(), Some(original.id.as_str()));
    assert_eq!(reflected.origin_type, OmOriginType::Reflection);
    assert_eq!(reflected.observed_message_ids, vec!["m1", "m2"]);
    assert_eq!(reflected.last_observed_at, Some(at(20)));
    assert_eq!(reflected.generation_count, 1);
    assert_eq!(reflected.metadata.reflection_count, 1);
    assert_eq!(reflected.observation_token_count, 500);
    assert!(!reflected.is_observing && !reflected.is_reflecting);

    let latest = store.get_latest_generation(&key).expect("latest").expect("record");
    assert_eq!(latest.id, reflected.id);
    let superseded = store.get_generation(&original.id).expect("get").expect("old");
    assert_eq!(superseded.active_observations, "* fact");
    assert!(!superseded.is_reflecting);

    let history = store.get_history(&key, None).expect("history");
    assert_eq!(
        history.iter().map(|record| record.id.as_str()).collect::<Vec<_>>(),
        vec![reflected.id.as_str(), original.id.as_str()]
    );
    assert_eq!(store.get_history(&key, Some(1)).expect("history").len(), 1);
}

fn stale_reflection_conflicts(store: &dyn OmStore) {
    let key = OmRecordKey::resource("stale-r");
    let original = store
        .initialize_generation(&key, OmRecordInit::default())
        .expect("init");
    let input = ReflectionGenerationInput {
        active_observations: "* a".to_string(),
        observation_token_count: 1,
        patterns: OmPatterns::new(),
        suggested_continuation: None,
    };
    store
        .create_reflection_generation(&original, input.clone())
        .expect("first reflection");
    let err = store
        .create_reflection_generation(&original, input)
        .expect_err("stale generation");
    assert_eq!(err.code(), "CONFLICT");
    assert_eq!(store.get_history(&key, None).expect("history").len(), 2);
}

fn messages_are_filtered_and_ordered(store: &dyn OmStore) {
    store
        .save_messages(&[
            message("msg-3", "msg-b", "msg-r", 3),
            message("msg-1", "msg-a", "msg-r", 1),
            message("msg-2", "msg-a", "msg-r", 2),
            message("msg-x", "msg-c", "other-r", 2),
        ])
        .expect("save");
    let mut edited = message("msg-2", "msg-a", "msg-r", 2);
    edited.content = "edited".to_string();
    store.save_messages(&[edited]).expect("upsert");

    let thread = store
        .list_messages_since(&OmRecordKey::thread("msg-a", "msg-r"), None)
        .expect("thread messages");
    assert_eq!(
        thread.iter().map(|m| m.id.as_str()).collect::<Vec<_>>(),
        vec!["msg-1", "msg-2"]
    );
    assert_eq!(thread[1].content, "edited");

    let resource = store
        .list_messages_since(&OmRecordKey::resource("msg-r"), Some(at(2)))
        .expect("resource messages");
    assert_eq!(
        resource.iter().map(|m| m.id.as_str()).collect::<Vec<_>>(),
        vec!["msg-2", "msg-3"]
    );
    assert_eq!(
        store.list_resource_threads("msg-r").expect("threads"),
        vec!["msg-a".to_string(), "msg-b".to_string()]
    );
}

fn thread_metadata_round_trips(store: &dyn OmStore) {
    assert!(store.get_thread_metadata("meta-t").expect("get").is_none());
    let metadata = ThreadOmMetadata {
        last_observed_at: Some(at(7)),
        current_task: Some("pack boxes".to_string()),
        ..ThreadOmMetadata::default()
    };
    store.set_thread_metadata("meta-t", &metadata).expect("set");
    assert_eq!(
        store.get_thread_metadata("meta-t").expect("get"),
        Some(metadata)
    );
    store.clear_thread_metadata("meta-t").expect("clear");
    assert!(store.get_thread_metadata("meta-t").expect("get").is_none());
}

fn clear_removes_only_the_key(store: &dyn OmStore) {
    let doomed = OmRecordKey::thread("clear-t", "clear-r");
    let kept = OmRecordKey::resource("clear-r");
    let record = store
        .initialize_generation(&doomed, OmRecordInit::default())
        .expect("init");
    store
        .initialize_generation(&kept, OmRecordInit::default())
        .expect("init");
    store.clear(&doomed).expect("clear");
    assert!(store.get_latest_generation(&doomed).expect("latest").is_none());
    assert!(store.get_generation(&record.id).expect("get").is_none());
    assert!(store.get_history(&doomed, None).expect("history").is_empty());
    assert!(store.get_latest_generation(&kept).expect("latest").is_some());
}

fn unknown_generation_is_not_found(store: &dyn OmStore) {
    let err = store
        .set_pending_message_tokens("missing-generation", 1)
        .expect_err("missing");
    assert_eq!(err.code(), "NOT_FOUND");
    let err = store
        .try_set_observing_flag("missing-generation", true)
        .expect_err("missing");
    assert_eq!(err.code(), "NOT_FOUND");
}
