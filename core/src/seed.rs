//! Demo fixtures: deterministic boards of threads and nested replies for
//! tests and local tooling.

use std::collections::BTreeSet;

use crate::models::Message;

const BASE_DATE_MS: i64 = 1_700_000_000_000;

pub fn root_message(id: &str, author_id: &str, board_name: &str, date: i64) -> Message {
    Message {
        id: id.to_string(),
        thread_id: None,
        parent_id: None,
        author_id: author_id.to_string(),
        date,
        title: format!("Topic {}", id),
        body: Some(format!("Body of {}", id)),
        board_names: BTreeSet::from([board_name.to_string()]),
    }
}

pub fn reply_message(
    id: &str,
    thread_id: &str,
    parent_id: &str,
    author_id: &str,
    board_name: &str,
    date: i64,
) -> Message {
    Message {
        id: id.to_string(),
        thread_id: Some(thread_id.to_string()),
        parent_id: Some(parent_id.to_string()),
        author_id: author_id.to_string(),
        date,
        title: format!("Re: Topic {}", thread_id),
        body: Some(format!("Body of {}", id)),
        board_names: BTreeSet::from([board_name.to_string()]),
    }
}

/// Builds `threads` threads with `replies` replies each. Even replies answer
/// the root, odd ones answer the previous reply. Authors alternate between
/// `demo:alice` and `demo:bob`.
pub fn demo_messages(board_name: &str, threads: i64, replies: i64) -> Vec<Message> {
    let mut messages = Vec::new();
    for t in 0..threads {
        let thread_id = format!("demo:t{}", t + 1);
        let thread_date = BASE_DATE_MS + t * 3_600_000;
        messages.push(root_message(&thread_id, "demo:alice", board_name, thread_date));
        let mut previous = thread_id.clone();
        for r in 0..replies {
            let id = format!("{}:r{}", thread_id, r + 1);
            let parent = if r % 2 == 0 { thread_id.clone() } else { previous.clone() };
            let author = if r % 2 == 0 { "demo:bob" } else { "demo:alice" };
            let date = thread_date + (r + 1) * 60_000;
            messages.push(reply_message(&id, &thread_id, &parent, author, board_name, date));
            previous = id;
        }
    }
    messages
}
