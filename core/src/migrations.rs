pub const MIGRATIONS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS boards (
      name TEXT PRIMARY KEY,
      created_at INTEGER NOT NULL,
      next_free_index INTEGER NOT NULL DEFAULT 0
    );

    CREATE TABLE IF NOT EXISTS messages (
      id TEXT PRIMARY KEY,
      thread_id TEXT,
      parent_id TEXT,
      author_id TEXT NOT NULL,
      date INTEGER NOT NULL,
      title TEXT NOT NULL,
      body TEXT,
      stored_at INTEGER NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_messages_author_id ON messages(author_id);

    CREATE TABLE IF NOT EXISTS message_boards (
      message_id TEXT NOT NULL,
      board_name TEXT NOT NULL,
      board_index INTEGER NOT NULL,
      PRIMARY KEY (message_id, board_name),
      FOREIGN KEY (message_id) REFERENCES messages(id) ON DELETE CASCADE,
      FOREIGN KEY (board_name) REFERENCES boards(name) ON DELETE CASCADE
    );

    CREATE UNIQUE INDEX IF NOT EXISTS idx_message_boards_index
      ON message_boards(board_name, board_index);

    CREATE TABLE IF NOT EXISTS subscribed_boards (
      id TEXT PRIMARY KEY,
      subscriber_id TEXT NOT NULL,
      board_name TEXT NOT NULL,
      created_at INTEGER NOT NULL,
      next_free_index INTEGER NOT NULL DEFAULT 0,
      UNIQUE (subscriber_id, board_name)
    );

    CREATE INDEX IF NOT EXISTS idx_subscribed_boards_board
      ON subscribed_boards(board_name);
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS board_links (
      subscribed_board_id TEXT NOT NULL,
      kind TEXT NOT NULL CHECK (kind IN ('thread', 'reply')),
      message_id TEXT NOT NULL,
      thread_id TEXT NOT NULL,
      parent_id TEXT,
      author_id TEXT,
      title TEXT NOT NULL,
      date INTEGER NOT NULL,
      link_index INTEGER NOT NULL,
      is_read INTEGER NOT NULL DEFAULT 0,
      has_message INTEGER NOT NULL DEFAULT 0,
      last_reply_date INTEGER,
      thread_read INTEGER NOT NULL DEFAULT 0,
      wanted_check_count INTEGER NOT NULL DEFAULT 0,
      last_wanted_check INTEGER,
      next_wanted_check INTEGER,
      FOREIGN KEY (subscribed_board_id) REFERENCES subscribed_boards(id) ON DELETE CASCADE
    );

    CREATE UNIQUE INDEX IF NOT EXISTS idx_board_links_thread
      ON board_links(subscribed_board_id, thread_id) WHERE kind = 'thread';
    CREATE UNIQUE INDEX IF NOT EXISTS idx_board_links_reply
      ON board_links(subscribed_board_id, thread_id, message_id) WHERE kind = 'reply';
    CREATE UNIQUE INDEX IF NOT EXISTS idx_board_links_index
      ON board_links(subscribed_board_id, link_index);
    CREATE INDEX IF NOT EXISTS idx_board_links_message
      ON board_links(subscribed_board_id, message_id);
    CREATE INDEX IF NOT EXISTS idx_board_links_wanted_check
      ON board_links(subscribed_board_id, next_wanted_check) WHERE has_message = 1;

    CREATE TABLE IF NOT EXISTS unwanted_links (
      subscribed_board_id TEXT NOT NULL,
      message_id TEXT NOT NULL,
      author_id TEXT NOT NULL,
      retry_count INTEGER NOT NULL DEFAULT 0,
      last_retry INTEGER NOT NULL,
      next_retry INTEGER NOT NULL,
      PRIMARY KEY (subscribed_board_id, message_id),
      FOREIGN KEY (subscribed_board_id) REFERENCES subscribed_boards(id) ON DELETE CASCADE
    );

    CREATE INDEX IF NOT EXISTS idx_unwanted_links_next_retry
      ON unwanted_links(subscribed_board_id, next_retry);
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS message_lists (
      author_id TEXT NOT NULL,
      list_index INTEGER NOT NULL,
      status TEXT NOT NULL DEFAULT 'fetched',
      recorded_at INTEGER NOT NULL,
      PRIMARY KEY (author_id, list_index)
    );

    CREATE TABLE IF NOT EXISTS author_availability (
      author_id TEXT PRIMARY KEY,
      lowest_index INTEGER NOT NULL DEFAULT -1,
      highest_index INTEGER NOT NULL DEFAULT -1
    );
    "#,
];
