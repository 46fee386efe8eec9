//! Chaos property tests for Storage implementations
//!
//! These tests verify that storage implementations maintain invariants even
//! when wrapped in `ChaoticStorage`:
//! - A failed append stores nothing (no gaps, no partial messages)
//! - Successful appends get consecutive indices in call order
//! - Pagination over the surviving log is consistent

use chrono::Utc;
use eventrelay_proto::{ChatMessage, RoomId, UserId};
use eventrelay_server::storage::{
    ChaoticStorage, MemoryStorage, RedbStorage, Storage, StorageError,
};
use proptest::prelude::*;
use tempfile::tempdir;

fn message(room_id: &RoomId, i: usize) -> ChatMessage {
    ChatMessage {
        user_id: UserId::from("u1"),
        username: "ada".to_string(),
        content: i.to_string(),
        timestamp: Utc::now(),
        room_id: room_id.clone(),
    }
}

/// Append `count` messages through chaos and return the contents that
/// reported success, in order.
fn append_through_chaos<S: Storage>(
    storage: &ChaoticStorage<S>,
    room_id: &RoomId,
    count: usize,
) -> Vec<String> {
    let mut accepted = Vec::new();
    for i in 0..count {
        match storage.append_message(room_id, &message(room_id, i)) {
            Ok(index) => {
                assert_eq!(index, accepted.len() as u64, "indices must be consecutive");
                accepted.push(i.to_string());
            },
            Err(StorageError::Io(_)) => {},
            Err(e) => panic!("Unexpected error: {e:?}"),
        }
    }
    accepted
}

#[test]
fn prop_memory_chaos_never_leaves_gaps() {
    proptest!(|(
        failure_rate in 0.0..0.8,
        seed in any::<u64>(),
        count in 10usize..100,
    )| {
        let room_id = RoomId::parse("chaos").unwrap();
        let storage = ChaoticStorage::with_seed(MemoryStorage::new(), failure_rate, seed);

        let accepted = append_through_chaos(&storage, &room_id, count);

        // ORACLE: the inner log holds exactly the successful appends, in order
        let inner = storage.inner();
        prop_assert_eq!(inner.total_message_count(), accepted.len());
        if accepted.is_empty() {
            prop_assert_eq!(inner.latest_log_index(&room_id).unwrap(), None);
        } else {
            let stored: Vec<String> = inner
                .load_messages(&room_id, 0, count)
                .unwrap()
                .into_iter()
                .map(|m| m.content)
                .collect();
            prop_assert_eq!(stored, accepted.clone());
            prop_assert_eq!(
                inner.latest_log_index(&room_id).unwrap(),
                Some(accepted.len() as u64 - 1)
            );
        }
    });
}

#[test]
fn prop_redb_chaos_never_leaves_gaps() {
    proptest!(ProptestConfig::with_cases(16), |(
        failure_rate in 0.0..0.8,
        seed in any::<u64>(),
        count in 5usize..40,
    )| {
        let dir = tempdir().unwrap();
        let room_id = RoomId::parse("chaos").unwrap();
        let redb = RedbStorage::open(dir.path().join("chaos.redb")).unwrap();
        let storage = ChaoticStorage::with_seed(redb, failure_rate, seed);

        let accepted = append_through_chaos(&storage, &room_id, count);

        if !accepted.is_empty() {
            let stored: Vec<String> = storage
                .inner()
                .load_messages(&room_id, 0, count)
                .unwrap()
                .into_iter()
                .map(|m| m.content)
                .collect();
            prop_assert_eq!(stored, accepted);
        }
    });
}

#[test]
fn prop_pagination_covers_log_exactly_once() {
    proptest!(|(count in 1usize..120, page in 1usize..17)| {
        let room_id = RoomId::parse("paged").unwrap();
        let storage = MemoryStorage::new();
        for i in 0..count {
            storage.append_message(&room_id, &message(&room_id, i)).unwrap();
        }

        let mut seen = Vec::new();
        let mut from = 0u64;
        loop {
            let batch = storage.load_messages(&room_id, from, page).unwrap();
            if batch.is_empty() {
                break;
            }
            prop_assert!(batch.len() <= page);
            from += batch.len() as u64;
            seen.extend(batch.into_iter().map(|m| m.content));
        }

        let expected: Vec<String> = (0..count).map(|i| i.to_string()).collect();
        prop_assert_eq!(seen, expected);
    });
}

#[test]
fn chaos_operation_count_tracks_every_call() {
    let room_id = RoomId::parse("counted").unwrap();
    let storage = ChaoticStorage::with_seed(MemoryStorage::new(), 0.3, 99);

    let _ = append_through_chaos(&storage, &room_id, 25);
    let _ = storage.latest_log_index(&room_id);
    let _ = storage.list_rooms();

    assert_eq!(storage.operation_count(), 27);
}
