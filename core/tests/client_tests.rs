use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread;

use board_sync_core::config::{ClientConfig, MINUTE_MS};
use board_sync_core::consistency::find_violations;
use board_sync_core::db;
use board_sync_core::links::{self, LinkKey, NewLink};
use board_sync_core::models::{Message, SubscribedBoard};
use board_sync_core::fetch::{FetchFailure, FetchPipeline};
use board_sync_core::oracle::{AcceptabilityOracle, OracleError};
use board_sync_core::query::board_stats;
use board_sync_core::seed::{demo_messages, reply_message, root_message};
use board_sync_core::{CoreError, ForumClient};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tempfile::tempdir;

const BOARD: &str = "general";

#[derive(Default)]
struct FakeOracle {
    unwanted: Mutex<HashSet<String>>,
}

impl FakeOracle {
    fn block(&self, author: &str) {
        self.unwanted.lock().unwrap().insert(author.to_string());
    }

    fn allow(&self, author: &str) {
        self.unwanted.lock().unwrap().remove(author);
    }
}

impl AcceptabilityOracle for FakeOracle {
    fn is_wanted(&self, _subscriber_id: &str, author_id: &str) -> Result<bool, OracleError> {
        Ok(!self.unwanted.lock().unwrap().contains(author_id))
    }
}

#[derive(Default)]
struct RecordingPipeline {
    requests: Mutex<Vec<(String, i64, bool)>>,
}

impl FetchPipeline for RecordingPipeline {
    fn fetch_message_list(&self, author_id: &str, index: i64, follow_newer: bool) {
        self.requests
            .lock()
            .unwrap()
            .push((author_id.to_string(), index, follow_newer));
    }
}

fn open_client(dir: &Path, oracle: Arc<FakeOracle>) -> ForumClient {
    let config = ClientConfig {
        store_path: dir.join("boards.sqlite"),
        diagnostics_dir: Some(dir.join("logs")),
        ..ClientConfig::default()
    };
    ForumClient::open(config, oracle).expect("open client")
}

fn now() -> i64 {
    board_sync_core::client::now_ms()
}

#[test]
fn decoded_message_reaches_every_subscriber() {
    let dir = tempdir().expect("temp");
    let client = open_client(dir.path(), Arc::new(FakeOracle::default()));
    let mine = client.subscribe("me", BOARD).expect("subscribe");
    let theirs = client.subscribe("you", BOARD).expect("subscribe");

    let root = root_message("t", "alice", BOARD, now());
    let report = client.on_message_decoded(&root).expect("decode");
    assert!(report.newly_stored);
    assert_eq!(report.linked, 2);

    let again = client.on_message_decoded(&root).expect("decode again");
    assert!(!again.newly_stored);
    assert_eq!(again.duplicates, 2);

    for board in [&mine, &theirs] {
        let threads = client.list_threads(board, 10, 0).expect("threads");
        assert_eq!(threads.len(), 1);
        assert_eq!(threads[0].thread.common.message_id, "t");
    }
    let stored = client.board_message_by_index(BOARD, 0).expect("by index").expect("message");
    assert_eq!(stored.id, "t");
}

#[test]
fn late_subscription_backfills_from_the_store() {
    let dir = tempdir().expect("temp");
    let client = open_client(dir.path(), Arc::new(FakeOracle::default()));
    let date = now();
    client.on_message_decoded(&root_message("t", "alice", BOARD, date)).expect("decode");
    client
        .on_message_decoded(&reply_message("r1", "t", "t", "bob", BOARD, date + 1_000))
        .expect("decode");

    let board = client.subscribe("me", BOARD).expect("subscribe");
    let replies = client.list_replies(&board, "t").expect("replies");
    assert_eq!(replies.len(), 1);
    assert_eq!(client.unread_count(&board).expect("unread"), 2);

    client.mark_thread_read(&board, "t", true).expect("mark");
    assert_eq!(client.unread_count(&board).expect("unread"), 0);
    client.mark_message_read(&board, "r1", false).expect("mark");
    assert_eq!(client.unread_count(&board).expect("unread"), 1);

    let catch_up = client.links_after_index(&board, -1, 10).expect("catch up");
    assert_eq!(catch_up.len(), 2);
    let first = client.link_by_index(&board, catch_up[0].common().index).expect("link");
    assert_eq!(&first, &catch_up[0]);
}

#[test]
fn unsubscribe_drops_board_state() {
    let dir = tempdir().expect("temp");
    let client = open_client(dir.path(), Arc::new(FakeOracle::default()));
    let board = client.subscribe("me", BOARD).expect("subscribe");
    client.on_message_decoded(&root_message("t", "alice", BOARD, now())).expect("decode");

    assert!(client.unsubscribe("me", BOARD).expect("unsubscribe"));
    assert!(!client.unsubscribe("me", BOARD).expect("unsubscribe again"));
    assert!(client.subscription("me", BOARD).expect("lookup").is_none());
    assert!(client.list_threads(&board, 10, 0).expect("threads").is_empty());

    let report = client.on_message_decoded(&root_message("u", "alice", BOARD, now())).expect("decode");
    assert_eq!(report.linked, 0);
}

#[test]
fn retry_sweep_promotes_once_author_is_trusted() {
    let dir = tempdir().expect("temp");
    let oracle = Arc::new(FakeOracle::default());
    let client = open_client(dir.path(), oracle.clone());
    let board = client.subscribe("me", BOARD).expect("subscribe");
    oracle.block("mallory");

    let report = client
        .on_message_decoded(&root_message("t", "mallory", BOARD, now()))
        .expect("decode");
    assert_eq!(report.unwanted, 1);
    assert!(client.list_threads(&board, 10, 0).expect("threads").is_empty());

    oracle.allow("mallory");
    let sweep = client.run_retry_sweep(now() + 40 * MINUTE_MS).expect("sweep");
    assert_eq!(sweep.promoted, 1);
    assert_eq!(client.list_threads(&board, 10, 0).expect("threads").len(), 1);
}

#[test]
fn purging_an_author_unlinks_and_deletes() {
    let dir = tempdir().expect("temp");
    let client = open_client(dir.path(), Arc::new(FakeOracle::default()));
    let board = client.subscribe("me", BOARD).expect("subscribe");
    let date = now();
    client.on_message_decoded(&root_message("t", "alice", BOARD, date)).expect("decode");
    client
        .on_message_decoded(&reply_message("r1", "t", "t", "bob", BOARD, date + 1_000))
        .expect("decode");
    client.on_message_list_fetched("alice", 0).expect("list");

    assert_eq!(client.purge_author("alice").expect("purge"), 1);
    let threads = client.list_threads(&board, 10, 0).expect("threads");
    assert_eq!(threads.len(), 1);
    assert!(!threads[0].thread.common.has_message);
    assert!(client.availability("alice").expect("availability").is_empty());

    assert!(client.purge_message("r1").expect("purge message"));
    assert!(client.list_threads(&board, 10, 0).expect("threads").is_empty());
    assert!(!client.purge_message("r1").expect("purge again"));
}

#[test]
fn message_lists_drive_fetch_hints() {
    let dir = tempdir().expect("temp");
    let client = open_client(dir.path(), Arc::new(FakeOracle::default()));
    for index in [5, 3, 4] {
        client.on_message_list_fetched("alice", index).expect("fetched");
    }
    client.on_fetch_failed("alice", 6, FetchFailure::ParsingFailed).expect("parse failed");
    client.on_fetch_failed("alice", 9, FetchFailure::NotFound).expect("not found");
    assert_eq!(client.availability("alice").expect("availability").range(), (3, 6));

    let pipeline = RecordingPipeline::default();
    client.request_next_fetches("alice", &pipeline).expect("request");
    let requests = pipeline.requests.lock().unwrap().clone();
    assert_eq!(
        requests,
        vec![("alice".to_string(), 7, true), ("alice".to_string(), 2, false)]
    );

    let tracker = client.on_message_list_removed("alice", 6).expect("removed");
    assert_eq!(tracker.range(), (3, 5));
}

#[test]
fn removal_inside_range_is_refused_and_logged() {
    let dir = tempdir().expect("temp");
    let client = open_client(dir.path(), Arc::new(FakeOracle::default()));
    for index in 0..3 {
        client.on_message_list_fetched("alice", index).expect("fetched");
    }
    let err = client.on_message_list_removed("alice", 1);
    assert!(matches!(err, Err(CoreError::InvariantViolation(_))));
    assert_eq!(client.availability("alice").expect("availability").range(), (0, 2));

    let log = fs::read_to_string(dir.path().join("logs").join("diagnostics.log")).expect("log");
    assert!(log.contains("invariant_violation"));
}

#[test]
fn config_loads_from_json_file() {
    let dir = tempdir().expect("temp");
    let path = dir.path().join("client.json");
    let store = dir.path().join("boards.sqlite");
    fs::write(
        &path,
        format!(
            r#"{{"store_path":{},"wanted_check":{{"min_delay_ms":60000,"max_delay_ms":120000}}}}"#,
            serde_json::to_string(&store).expect("path json")
        ),
    )
    .expect("write");
    let config = ClientConfig::load(&path).expect("load");
    assert_eq!(config.store_path, store);
    assert_eq!(config.wanted_check.max_delay_ms, 120_000);
    assert_eq!(config.unwanted_retry.min_delay_ms, 10 * MINUTE_MS);

    fs::write(&path, r#"{"unwanted_retry":{"min_delay_ms":0}}"#).expect("write");
    assert!(matches!(ClientConfig::load(&path), Err(CoreError::Config(_))));
}

fn break_board(dir: &Path, board: &SubscribedBoard) {
    let conn = db::connect(dir.join("boards.sqlite")).expect("connect");
    let ghost = NewLink::ghost(LinkKey::thread("zz"), "orphan".to_string(), now());
    links::insert_link(&conn, &board.id, &ghost).expect("insert");
}

#[test]
fn broken_board_does_not_block_sweeping_the_others() {
    let dir = tempdir().expect("temp");
    let oracle = Arc::new(FakeOracle::default());
    let client = open_client(dir.path(), oracle.clone());
    let broken = client.subscribe("me", BOARD).expect("subscribe");
    let healthy = client.subscribe("you", BOARD).expect("subscribe");
    oracle.block("mallory");
    let report = client
        .on_message_decoded(&root_message("t", "mallory", BOARD, now()))
        .expect("decode");
    assert_eq!(report.unwanted, 2);
    break_board(dir.path(), &broken);

    oracle.allow("mallory");
    let sweep = client.run_retry_sweep(now() + 40 * MINUTE_MS).expect("sweep");
    assert_eq!(sweep.promoted, 1);
    assert_eq!(sweep.failed, 1);
    assert_eq!(client.list_threads(&healthy, 10, 0).expect("threads").len(), 1);

    let log = fs::read_to_string(dir.path().join("logs").join("diagnostics.log")).expect("log");
    assert!(log.contains(&broken.id));
}

#[test]
fn purge_continues_past_a_broken_board() {
    let dir = tempdir().expect("temp");
    let client = open_client(dir.path(), Arc::new(FakeOracle::default()));
    let broken = client.subscribe("me", BOARD).expect("subscribe");
    let healthy = client.subscribe("you", BOARD).expect("subscribe");
    client.on_message_decoded(&root_message("t", "alice", BOARD, now())).expect("decode");
    break_board(dir.path(), &broken);

    assert_eq!(client.purge_author("alice").expect("purge"), 1);
    assert!(client.list_threads(&healthy, 10, 0).expect("threads").is_empty());
    assert!(client.board_message_by_index(BOARD, 0).expect("lookup").is_none());
}

fn deliver_all(client: &ForumClient, messages: &[Message]) {
    for message in messages {
        let report = client.on_message_decoded(message).expect("decode");
        assert_eq!(report.failed + report.deferred, 0);
    }
}

fn shape(client: &ForumClient, board: &SubscribedBoard) -> Vec<(String, i64, bool)> {
    let mut threads: Vec<(String, i64, bool)> = client
        .list_threads(board, 100, 0)
        .expect("threads")
        .into_iter()
        .map(|summary| {
            (
                summary.thread.common.message_id,
                summary.reply_count,
                summary.thread.common.has_message,
            )
        })
        .collect();
    threads.sort();
    threads
}

#[test]
fn parallel_deliveries_match_a_sequential_run() {
    let messages = demo_messages(BOARD, 4, 6);

    let sequential_dir = tempdir().expect("temp");
    let sequential = open_client(sequential_dir.path(), Arc::new(FakeOracle::default()));
    let sequential_board = sequential.subscribe("me", BOARD).expect("subscribe");
    deliver_all(&sequential, &messages);
    let expected = shape(&sequential, &sequential_board);

    let dir = tempdir().expect("temp");
    let client = open_client(dir.path(), Arc::new(FakeOracle::default()));
    let board = client.subscribe("me", BOARD).expect("subscribe");
    // replies first, then roots, shuffled inside each half
    let mut rng = StdRng::seed_from_u64(11);
    let (mut roots, mut replies): (Vec<Message>, Vec<Message>) =
        messages.iter().cloned().partition(|message| message.parent_id.is_none());
    replies.shuffle(&mut rng);
    roots.shuffle(&mut rng);
    let ordered: Vec<Message> = replies.into_iter().chain(roots).collect();
    let workers = 4;
    let chunks: Vec<Vec<Message>> = (0..workers)
        .map(|w| ordered.iter().skip(w).step_by(workers).cloned().collect())
        .collect();
    thread::scope(|scope| {
        for chunk in &chunks {
            let client = &client;
            scope.spawn(move || deliver_all(client, chunk));
        }
    });

    assert_eq!(shape(&client, &board), expected);
    let conn = db::connect(dir.path().join("boards.sqlite")).expect("connect");
    assert!(find_violations(&conn, &board.id).expect("violations").is_empty());
    let stats = board_stats(&conn, &board.id).expect("stats");
    assert_eq!(stats.threads, 4);
    assert_eq!(stats.replies, 24);
    assert_eq!(stats.ghosts, 0);
}
