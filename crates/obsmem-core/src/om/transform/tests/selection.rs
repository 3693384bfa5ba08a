use super::*;

fn ids(threads: &[ThreadBacklog]) -> Vec<&str> {
    threads.iter().map(|t| t.thread_id.as_str()).collect()
}

#[test]
fn largest_thread_alone_can_satisfy_threshold() {
    let selection =
        select_threads_for_observation(vec![backlog("b", 50, 0), backlog("a", 600, 5)], 500);
    assert_eq!(ids(&selection.selected), vec!["a"]);
    assert_eq!(ids(&selection.deferred), vec!["b"]);
    assert_eq!(selection.selected_tokens(), 600);
    assert_eq!(selection.deferred_tokens(), 50);
}

#[test]
fn selection_takes_fewest_largest_threads_to_cross_threshold() {
    let selection = select_threads_for_observation(
        vec![
            backlog("small", 100, 0),
            backlog("big", 300, 1),
            backlog("mid", 250, 2),
            backlog("tiny", 10, 3),
        ],
        500,
    );
    assert_eq!(ids(&selection.selected), vec!["big", "mid"]);
    assert!(selection.selected_tokens() >= 500);
}

#[test]
fn everything_is_selected_when_total_stays_below_threshold() {
    let mut empty = backlog("empty", 0, 0);
    empty.messages.clear();
    let selection = select_threads_for_observation(
        vec![backlog("a", 100, 0), backlog("b", 200, 1), empty],
        500,
    );
    assert_eq!(ids(&selection.selected), vec!["b", "a"]);
    assert!(selection.deferred.is_empty());
}

#[test]
fn fairness_order_puts_oldest_backlog_first() {
    let mut threads = vec![backlog("new", 900, 30), backlog("old", 10, 1)];
    order_threads_for_fairness(&mut threads);
    assert_eq!(ids(&threads), vec!["old", "new"]);
}

#[test]
fn batches_respect_cap_and_never_come_out_empty() {
    let batches = chunk_threads_by_token_cap(
        vec![
            backlog("a", 400, 0),
            backlog("b", 500, 1),
            backlog("huge", 5_000, 2),
            backlog("c", 100, 3),
        ],
        1_000,
    );
    let shape = batches.iter().map(|batch| ids(batch)).collect::<Vec<_>>();
    assert_eq!(shape, vec![vec!["a", "b"], vec!["huge"], vec!["c"]]);
    assert!(chunk_threads_by_token_cap(Vec::new(), 1_000).is_empty());
}
