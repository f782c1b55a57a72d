use board_sync_core::db::{apply_migrations, open_store};
use rusqlite::Connection;
use tempfile::tempdir;

fn index_exists(conn: &Connection, name: &str) -> bool {
    let count: i64 = conn
        .query_row(
            "SELECT COUNT(1) FROM sqlite_master WHERE type='index' AND name=?1;",
            [name],
            |row| row.get(0),
        )
        .expect("index query");
    count == 1
}

#[test]
fn board_link_indices_exist() {
    let conn = Connection::open_in_memory().expect("memory db");
    apply_migrations(&conn).expect("migrate");
    for name in [
        "idx_board_links_thread",
        "idx_board_links_reply",
        "idx_board_links_index",
        "idx_unwanted_links_next_retry",
        "idx_message_boards_index",
    ] {
        assert!(index_exists(&conn, name), "{} missing", name);
    }
}

#[test]
fn second_thread_link_for_same_thread_is_refused() {
    let conn = Connection::open_in_memory().expect("memory db");
    apply_migrations(&conn).expect("migrate");
    let insert = "INSERT INTO board_links \
                  (subscribed_board_id, kind, message_id, thread_id, title, date, link_index) \
                  VALUES ('b', 'thread', 't', 't', 'x', 0, ?1);";
    conn.execute(insert, [0_i64]).expect("first");
    assert!(conn.execute(insert, [1_i64]).is_err());
}

#[test]
fn migrations_are_idempotent_on_reopen() {
    let dir = tempdir().expect("temp");
    let path = dir.path().join("boards.sqlite");
    drop(open_store(&path).expect("open"));
    let store = open_store(&path).expect("reopen");
    let version: i64 = store
        .connect()
        .expect("connect")
        .query_row("PRAGMA user_version;", [], |row| row.get(0))
        .expect("version");
    assert_eq!(version, 3);
}
