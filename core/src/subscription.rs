use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use crate::error::CoreError;
use crate::models::SubscribedBoard;

fn board_from_row(row: &Row<'_>) -> rusqlite::Result<SubscribedBoard> {
    Ok(SubscribedBoard {
        id: row.get(0)?,
        subscriber_id: row.get(1)?,
        board_name: row.get(2)?,
        created_at: row.get(3)?,
    })
}

/// Creates the subscription if it does not exist yet. The boolean is true when
/// a new row was written.
pub fn create_subscription(
    conn: &Connection,
    subscriber_id: &str,
    board_name: &str,
    now: i64,
) -> Result<(SubscribedBoard, bool), CoreError> {
    if subscriber_id.trim().is_empty() {
        return Err(CoreError::InvalidArgument("subscriber id is empty".to_string()));
    }
    if board_name.trim().is_empty() {
        return Err(CoreError::InvalidArgument("board name is empty".to_string()));
    }
    if let Some(existing) = find_subscription(conn, subscriber_id, board_name)? {
        return Ok((existing, false));
    }
    let board = SubscribedBoard {
        id: Uuid::new_v4().to_string(),
        subscriber_id: subscriber_id.to_string(),
        board_name: board_name.to_string(),
        created_at: now,
    };
    conn.execute(
        "INSERT INTO subscribed_boards (id, subscriber_id, board_name, created_at, next_free_index) \
         VALUES (?1, ?2, ?3, ?4, 0);",
        params![board.id, board.subscriber_id, board.board_name, board.created_at],
    )?;
    Ok((board, true))
}

pub fn find_subscription(
    conn: &Connection,
    subscriber_id: &str,
    board_name: &str,
) -> Result<Option<SubscribedBoard>, CoreError> {
    conn.query_row(
        "SELECT id, subscriber_id, board_name, created_at FROM subscribed_boards \
         WHERE subscriber_id = ?1 AND board_name = ?2;",
        params![subscriber_id, board_name],
        board_from_row,
    )
    .optional()
    .map_err(CoreError::from)
}

pub fn get_subscription(conn: &Connection, board_id: &str) -> Result<Option<SubscribedBoard>, CoreError> {
    conn.query_row(
        "SELECT id, subscriber_id, board_name, created_at FROM subscribed_boards WHERE id = ?1;",
        params![board_id],
        board_from_row,
    )
    .optional()
    .map_err(CoreError::from)
}

pub fn subscriptions_for_board(conn: &Connection, board_name: &str) -> Result<Vec<SubscribedBoard>, CoreError> {
    let mut stmt = conn.prepare(
        "SELECT id, subscriber_id, board_name, created_at FROM subscribed_boards \
         WHERE board_name = ?1 ORDER BY created_at ASC, id ASC;",
    )?;
    let rows = stmt.query_map(params![board_name], board_from_row)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub fn all_subscriptions(conn: &Connection) -> Result<Vec<SubscribedBoard>, CoreError> {
    let mut stmt = conn.prepare(
        "SELECT id, subscriber_id, board_name, created_at FROM subscribed_boards \
         ORDER BY created_at ASC, id ASC;",
    )?;
    let rows = stmt.query_map([], board_from_row)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// Drops a subscription with all of its links and unwanted records.
pub fn delete_subscription(conn: &Connection, board_id: &str) -> Result<bool, CoreError> {
    conn.execute(
        "DELETE FROM board_links WHERE subscribed_board_id = ?1;",
        params![board_id],
    )?;
    conn.execute(
        "DELETE FROM unwanted_links WHERE subscribed_board_id = ?1;",
        params![board_id],
    )?;
    let deleted = conn.execute("DELETE FROM subscribed_boards WHERE id = ?1;", params![board_id])?;
    Ok(deleted > 0)
}
