use std::collections::HashSet;
use std::sync::Mutex;

use board_sync_core::config::{RetrySettings, HOUR_MS};
use board_sync_core::consistency::find_violations;
use board_sync_core::db::apply_migrations;
use board_sync_core::engine::BoardEngine;
use board_sync_core::models::{Message, SubscribedBoard};
use board_sync_core::oracle::{AcceptabilityOracle, OracleError};
use board_sync_core::query::board_stats;
use board_sync_core::seed::demo_messages;
use board_sync_core::store::store_message;
use board_sync_core::subscription::create_subscription;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rusqlite::Connection;

const BOARD: &str = "general";
const NOW: i64 = 1_700_000_000_000;

#[derive(Default)]
struct ToggleOracle {
    unwanted: Mutex<HashSet<String>>,
}

impl ToggleOracle {
    fn toggle(&self, author: &str) {
        let mut unwanted = self.unwanted.lock().unwrap();
        if !unwanted.remove(author) {
            unwanted.insert(author.to_string());
        }
    }

    fn clear(&self) {
        self.unwanted.lock().unwrap().clear();
    }
}

impl AcceptabilityOracle for ToggleOracle {
    fn is_wanted(&self, _subscriber_id: &str, author_id: &str) -> Result<bool, OracleError> {
        Ok(!self.unwanted.lock().unwrap().contains(author_id))
    }
}

fn setup_db(messages: &[Message]) -> (Connection, SubscribedBoard) {
    let conn = Connection::open_in_memory().expect("memory db");
    apply_migrations(&conn).expect("migrate");
    for message in messages {
        store_message(&conn, message, NOW).expect("store");
    }
    let (board, _) = create_subscription(&conn, "me", BOARD, NOW).expect("subscribe");
    (conn, board)
}

fn run_sequence(seed: u64) {
    let messages = demo_messages(BOARD, 3, 5);
    let (conn, board) = setup_db(&messages);
    let oracle = ToggleOracle::default();
    let engine = BoardEngine::new(&conn, &oracle, RetrySettings::default(), RetrySettings::default());
    let mut rng = StdRng::seed_from_u64(seed);
    let mut now = NOW;

    for step in 0..120 {
        now += rng.gen_range(0..HOUR_MS);
        let message = &messages[rng.gen_range(0..messages.len())];
        match rng.gen_range(0..10) {
            0..=5 => {
                engine.add_message(&board, message, now).expect("add");
            }
            6 | 7 => {
                engine.remove_message(&board, &message.id).expect("remove");
            }
            8 => {
                oracle.toggle(&message.author_id);
            }
            _ => {
                engine.retry_unwanted(&board, now).expect("retry");
                engine.revalidate_wanted(&board, now).expect("recheck");
            }
        }
        let violations = find_violations(&conn, &board.id).expect("violations");
        assert!(
            violations.is_empty(),
            "seed {} step {}: {:?}",
            seed,
            step,
            violations
        );
    }

    oracle.clear();
    for message in &messages {
        engine.add_message(&board, message, now).expect("final add");
    }
    let stats = board_stats(&conn, &board.id).expect("stats");
    assert_eq!(stats.threads, 3, "seed {}", seed);
    assert_eq!(stats.replies, 15, "seed {}", seed);
    assert_eq!(stats.ghosts, 0, "seed {}", seed);
    assert_eq!(stats.unwanted, 0, "seed {}", seed);
}

#[test]
fn random_arrivals_and_purges_keep_boards_consistent() {
    for seed in 0..40 {
        run_sequence(seed);
    }
}

#[test]
fn any_arrival_order_converges_to_the_same_board() {
    let messages = demo_messages(BOARD, 2, 4);
    let mut rng = StdRng::seed_from_u64(7);
    for _ in 0..20 {
        let mut order: Vec<&Message> = messages.iter().collect();
        for i in (1..order.len()).rev() {
            let j = rng.gen_range(0..=i);
            order.swap(i, j);
        }
        let (conn, board) = setup_db(&messages);
        let oracle = ToggleOracle::default();
        let engine = BoardEngine::new(&conn, &oracle, RetrySettings::default(), RetrySettings::default());
        for message in order {
            engine.add_message(&board, message, NOW).expect("add");
            assert!(find_violations(&conn, &board.id).expect("violations").is_empty());
        }
        let stats = board_stats(&conn, &board.id).expect("stats");
        assert_eq!(stats.threads, 2);
        assert_eq!(stats.replies, 8);
        assert_eq!(stats.ghosts, 0);
    }
}
