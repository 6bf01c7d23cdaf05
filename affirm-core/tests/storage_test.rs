//! Integration tests for the storage layer
//!
//! These tests verify the persistence contract the practice session relies
//! on: atomic repetition counting, field-scoped updates and persistence
//! across connections.

use affirm::storage::{AffirmationStore, SETTING_PREFERRED_LANGUAGE, Storage};
use affirm::types::{Affirmation, WordTiming};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

// ============ Repetition Counting ============

#[test]
fn test_record_repetition_increments() {
    let storage = Storage::in_memory().expect("Failed to create in-memory storage");
    let affirmation = storage
        .create_affirmation("I am enough", Path::new("ref.wav"))
        .unwrap();

    let updated = storage.record_repetition(&affirmation.id).unwrap();
    assert_eq!(updated.repeat_count, 1);
    let updated = storage.record_repetition(&affirmation.id).unwrap();
    assert_eq!(updated.repeat_count, 2);
    assert_eq!(storage.load(&affirmation.id).unwrap().repeat_count, 2);
}

#[test]
fn test_concurrent_repetitions_are_not_lost() {
    let storage = Arc::new(Storage::in_memory().unwrap());
    let affirmation = storage
        .create_affirmation("I am enough", Path::new("ref.wav"))
        .unwrap();

    let mut handles = vec![];
    for _ in 0..10 {
        let storage_clone = Arc::clone(&storage);
        let id = affirmation.id;
        let handle = thread::spawn(move || {
            for _ in 0..10 {
                storage_clone.record_repetition(&id).unwrap();
            }
        });
        handles.push(handle);
    }

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(storage.load(&affirmation.id).unwrap().repeat_count, 100);
}

// ============ Field-scoped Updates ============

#[test]
fn test_save_never_touches_counters() {
    let storage = Storage::in_memory().unwrap();
    let affirmation = Affirmation::new("I am calm", "ref.wav", 50);
    storage.save(&affirmation).unwrap();
    storage.record_repetition(&affirmation.id).unwrap();

    // stale copy with edited text and counters
    let mut stale = affirmation.clone();
    stale.text = "I am calm and focused".to_string();
    stale.repeat_count = 0;
    stale.target_count = 5;
    storage.save(&stale).unwrap();

    let loaded = storage.load(&affirmation.id).unwrap();
    assert_eq!(loaded.text, "I am calm and focused");
    assert_eq!(loaded.repeat_count, 1);
    assert_eq!(loaded.target_count, 50);
}

#[test]
fn test_word_timings_roundtrip() {
    let storage = Storage::in_memory().unwrap();
    let affirmation = storage
        .create_affirmation("我很好", Path::new("ref.wav"))
        .unwrap();

    let timings = vec![
        WordTiming::new("我", 0.0, 0.3, 0.9),
        WordTiming::new("很", 0.3, 0.3, 0.8),
        WordTiming::new("好", 0.6, 0.4, 0.0),
    ];
    storage
        .update_word_timings(&affirmation.id, &timings)
        .unwrap();

    let loaded = storage.load(&affirmation.id).unwrap();
    assert_eq!(loaded.word_timings, timings);
    assert_eq!(loaded.repeat_count, 0);
}

#[test]
fn test_replace_audio() {
    let storage = Storage::in_memory().unwrap();
    let affirmation = storage
        .create_affirmation("I am calm", Path::new("old.wav"))
        .unwrap();

    storage
        .replace_audio(&affirmation.id, Path::new("new.wav"))
        .unwrap();
    assert_eq!(
        storage.load(&affirmation.id).unwrap().audio_path,
        PathBuf::from("new.wav")
    );
}

// ============ Listing ============

#[test]
fn test_listing_newest_first_and_archived_filter() {
    let storage = Storage::in_memory().unwrap();
    let mut first = Affirmation::new("first", "1.wav", 10);
    first.created_at = first.created_at - chrono::Duration::minutes(5);
    let second = Affirmation::new("second", "2.wav", 10);
    storage.insert_affirmation(&first).unwrap();
    storage.insert_affirmation(&second).unwrap();

    let listed = storage.get_affirmations(false).unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].text, "second");

    storage.set_archived(&second.id, true).unwrap();
    let active = storage.get_affirmations(false).unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].text, "first");
}

// ============ Persistence ============

#[test]
fn test_persistence_across_connections() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("affirm.db");

    let id = {
        let storage = Storage::open(&db_path).unwrap();
        storage.set_setting(SETTING_PREFERRED_LANGUAGE, "fr").unwrap();
        let affirmation = storage
            .create_affirmation("Je suis calme", Path::new("ref.wav"))
            .unwrap();
        storage.record_repetition(&affirmation.id).unwrap();
        affirmation.id
    };

    let storage = Storage::open(&db_path).unwrap();
    let loaded = storage.load(&id).unwrap();
    assert_eq!(loaded.text, "Je suis calme");
    assert_eq!(loaded.repeat_count, 1);
    assert_eq!(
        storage.get_setting(SETTING_PREFERRED_LANGUAGE).unwrap(),
        Some("fr".to_string())
    );
}
