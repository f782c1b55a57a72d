use std::collections::BTreeSet;

use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::CoreError;
use crate::models::Message;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageListStatus {
    Fetched,
    /// The list exists but could not be parsed. Still counts for contiguity.
    ParseFailed,
}

impl MessageListStatus {
    fn as_str(&self) -> &'static str {
        match self {
            MessageListStatus::Fetched => "fetched",
            MessageListStatus::ParseFailed => "parse_failed",
        }
    }
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: row.get(0)?,
        thread_id: row.get(1)?,
        parent_id: row.get(2)?,
        author_id: row.get(3)?,
        date: row.get(4)?,
        title: row.get(5)?,
        body: row.get(6)?,
        board_names: BTreeSet::new(),
    })
}

fn load_board_names(conn: &Connection, message: &mut Message) -> Result<(), CoreError> {
    let mut stmt = conn.prepare(
        "SELECT board_name FROM message_boards WHERE message_id = ?1 ORDER BY board_name ASC;",
    )?;
    let rows = stmt.query_map(params![message.id], |row| row.get::<_, String>(0))?;
    for name in rows {
        message.board_names.insert(name?);
    }
    Ok(())
}

fn validate_message(message: &Message) -> Result<(), CoreError> {
    if message.id.trim().is_empty() {
        return Err(CoreError::InvalidArgument("message id is empty".to_string()));
    }
    if message.author_id.trim().is_empty() {
        return Err(CoreError::InvalidArgument("author id is empty".to_string()));
    }
    if message.board_names.is_empty() {
        return Err(CoreError::InvalidArgument(format!(
            "message {} names no board",
            message.id
        )));
    }
    if message.parent_id.as_deref() == Some(message.id.as_str()) {
        return Err(CoreError::InvalidArgument(format!(
            "message {} is its own parent",
            message.id
        )));
    }
    Ok(())
}

/// Stores a decoded message and files it into each of its boards. Returns
/// false if the message was already stored.
pub fn store_message(conn: &Connection, message: &Message, now: i64) -> Result<bool, CoreError> {
    validate_message(message)?;
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO messages \
         (id, thread_id, parent_id, author_id, date, title, body, stored_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8);",
        params![
            message.id,
            message.thread_id,
            message.parent_id,
            message.author_id,
            message.date,
            message.title,
            message.body,
            now
        ],
    )?;
    for board_name in &message.board_names {
        conn.execute(
            "INSERT OR IGNORE INTO boards (name, created_at, next_free_index) VALUES (?1, ?2, 0);",
            params![board_name, now],
        )?;
        let already: Option<i64> = conn
            .query_row(
                "SELECT board_index FROM message_boards WHERE message_id = ?1 AND board_name = ?2;",
                params![message.id, board_name],
                |row| row.get(0),
            )
            .optional()?;
        if already.is_some() {
            continue;
        }
        let board_index = take_board_index(conn, board_name)?;
        conn.execute(
            "INSERT INTO message_boards (message_id, board_name, board_index) VALUES (?1, ?2, ?3);",
            params![message.id, board_name, board_index],
        )?;
    }
    Ok(inserted > 0)
}

fn take_board_index(conn: &Connection, board_name: &str) -> Result<i64, CoreError> {
    let index: i64 = conn.query_row(
        "SELECT next_free_index FROM boards WHERE name = ?1;",
        params![board_name],
        |row| row.get(0),
    )?;
    conn.execute(
        "UPDATE boards SET next_free_index = next_free_index + 1 WHERE name = ?1;",
        params![board_name],
    )?;
    Ok(index)
}

pub fn get_message(conn: &Connection, message_id: &str) -> Result<Option<Message>, CoreError> {
    let message = conn
        .query_row(
            "SELECT id, thread_id, parent_id, author_id, date, title, body \
             FROM messages WHERE id = ?1;",
            params![message_id],
            message_from_row,
        )
        .optional()?;
    match message {
        Some(mut message) => {
            load_board_names(conn, &mut message)?;
            Ok(Some(message))
        }
        None => Ok(None),
    }
}

pub fn messages_by_author(conn: &Connection, author_id: &str) -> Result<Vec<Message>, CoreError> {
    let mut stmt = conn.prepare(
        "SELECT id, thread_id, parent_id, author_id, date, title, body \
         FROM messages WHERE author_id = ?1 ORDER BY date ASC, id ASC;",
    )?;
    let rows = stmt.query_map(params![author_id], message_from_row)?;
    let mut messages = Vec::new();
    for row in rows {
        let mut message = row?;
        load_board_names(conn, &mut message)?;
        messages.push(message);
    }
    Ok(messages)
}

/// Messages filed in a board, oldest first.
pub fn messages_in_board(conn: &Connection, board_name: &str) -> Result<Vec<Message>, CoreError> {
    let mut stmt = conn.prepare(
        "SELECT m.id, m.thread_id, m.parent_id, m.author_id, m.date, m.title, m.body \
         FROM messages m \
         JOIN message_boards mb ON mb.message_id = m.id \
         WHERE mb.board_name = ?1 \
         ORDER BY m.date ASC, mb.board_index ASC;",
    )?;
    let rows = stmt.query_map(params![board_name], message_from_row)?;
    let mut messages = Vec::new();
    for row in rows {
        let mut message = row?;
        load_board_names(conn, &mut message)?;
        messages.push(message);
    }
    Ok(messages)
}

pub fn board_message_by_index(
    conn: &Connection,
    board_name: &str,
    board_index: i64,
) -> Result<Option<Message>, CoreError> {
    let message_id: Option<String> = conn
        .query_row(
            "SELECT message_id FROM message_boards WHERE board_name = ?1 AND board_index = ?2;",
            params![board_name, board_index],
            |row| row.get(0),
        )
        .optional()?;
    match message_id {
        Some(id) => get_message(conn, &id),
        None => Ok(None),
    }
}

/// Removes a message from the store. Board indices it held are not reused.
pub fn delete_message(conn: &Connection, message_id: &str) -> Result<bool, CoreError> {
    conn.execute(
        "DELETE FROM message_boards WHERE message_id = ?1;",
        params![message_id],
    )?;
    let deleted = conn.execute("DELETE FROM messages WHERE id = ?1;", params![message_id])?;
    Ok(deleted > 0)
}

pub fn record_message_list(
    conn: &Connection,
    author_id: &str,
    list_index: i64,
    status: MessageListStatus,
    now: i64,
) -> Result<(), CoreError> {
    if list_index < 0 {
        return Err(CoreError::InvalidArgument(format!(
            "message list index {} is negative",
            list_index
        )));
    }
    conn.execute(
        "INSERT INTO message_lists (author_id, list_index, status, recorded_at) \
         VALUES (?1, ?2, ?3, ?4) \
         ON CONFLICT(author_id, list_index) DO UPDATE SET \
           status = CASE WHEN message_lists.status = 'fetched' THEN 'fetched' ELSE excluded.status END;",
        params![author_id, list_index, status.as_str(), now],
    )?;
    Ok(())
}

pub fn delete_message_list(conn: &Connection, author_id: &str, list_index: i64) -> Result<bool, CoreError> {
    let deleted = conn.execute(
        "DELETE FROM message_lists WHERE author_id = ?1 AND list_index = ?2;",
        params![author_id, list_index],
    )?;
    Ok(deleted > 0)
}

pub fn message_list_exists(conn: &Connection, author_id: &str, list_index: i64) -> Result<bool, CoreError> {
    let exists: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM message_lists WHERE author_id = ?1 AND list_index = ?2 LIMIT 1;",
            params![author_id, list_index],
            |row| row.get(0),
        )
        .optional()?;
    Ok(exists.is_some())
}

pub fn delete_author_lists(conn: &Connection, author_id: &str) -> Result<(), CoreError> {
    conn.execute("DELETE FROM message_lists WHERE author_id = ?1;", params![author_id])?;
    conn.execute(
        "DELETE FROM author_availability WHERE author_id = ?1;",
        params![author_id],
    )?;
    Ok(())
}
