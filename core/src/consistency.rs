use rusqlite::{params, Connection};

use crate::error::CoreError;

/// Each check selects `(thread_id, message_id)` pairs that break one rule.
const CHECKS: &[(&str, &str)] = &[
    (
        "thread link whose message id differs from its thread id",
        "SELECT thread_id, message_id FROM board_links \
         WHERE subscribed_board_id = ?1 AND kind = 'thread' AND message_id <> thread_id;",
    ),
    (
        "duplicate thread link",
        "SELECT thread_id, thread_id FROM board_links \
         WHERE subscribed_board_id = ?1 AND kind = 'thread' \
         GROUP BY thread_id HAVING COUNT(1) > 1;",
    ),
    (
        "reply without thread link",
        "SELECT r.thread_id, r.message_id FROM board_links r \
         WHERE r.subscribed_board_id = ?1 AND r.kind = 'reply' AND NOT EXISTS ( \
           SELECT 1 FROM board_links t WHERE t.subscribed_board_id = r.subscribed_board_id \
             AND t.kind = 'thread' AND t.thread_id = r.thread_id);",
    ),
    (
        "ghost thread link without real replies",
        "SELECT g.thread_id, g.message_id FROM board_links g \
         WHERE g.subscribed_board_id = ?1 AND g.kind = 'thread' AND g.has_message = 0 \
           AND NOT EXISTS ( \
             SELECT 1 FROM board_links r WHERE r.subscribed_board_id = g.subscribed_board_id \
               AND r.kind = 'reply' AND r.thread_id = g.thread_id AND r.has_message = 1);",
    ),
    (
        "ghost reply link without real children",
        "SELECT g.thread_id, g.message_id FROM board_links g \
         WHERE g.subscribed_board_id = ?1 AND g.kind = 'reply' AND g.has_message = 0 \
           AND NOT EXISTS ( \
             SELECT 1 FROM board_links r WHERE r.subscribed_board_id = g.subscribed_board_id \
               AND r.kind = 'reply' AND r.thread_id = g.thread_id \
               AND r.parent_id = g.message_id AND r.has_message = 1);",
    ),
    (
        "message both linked and unwanted",
        "SELECT l.thread_id, l.message_id FROM board_links l \
         JOIN unwanted_links u ON u.subscribed_board_id = l.subscribed_board_id \
           AND u.message_id = l.message_id \
         WHERE l.subscribed_board_id = ?1 AND l.has_message = 1;",
    ),
];

/// Lists every rule the board's links currently break.
pub fn find_violations(conn: &Connection, board_id: &str) -> Result<Vec<String>, CoreError> {
    let mut violations = Vec::new();
    for (rule, sql) in CHECKS {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params![board_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        for row in rows {
            let (thread_id, message_id) = row?;
            violations.push(format!(
                "{} (thread {}, message {})",
                rule, thread_id, message_id
            ));
        }
    }
    Ok(violations)
}

/// Fails with `InvariantViolation` when any rule is broken, so the caller's
/// transaction is rolled back instead of persisting a corrupted board.
pub fn verify_board(conn: &Connection, board_id: &str) -> Result<(), CoreError> {
    let violations = find_violations(conn, board_id)?;
    if violations.is_empty() {
        return Ok(());
    }
    Err(CoreError::InvariantViolation(format!(
        "subscribed board {}: {}",
        board_id,
        violations.join("; ")
    )))
}
