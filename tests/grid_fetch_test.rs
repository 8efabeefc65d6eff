mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;

use gridshard::error::GridShardError;
use gridshard::query::{Relation, TermListRequest};
use gridshard::spill::TermRecord;
use tempfile::TempDir;

use common::{ScriptedGrid, build, fruit_records, open_scripted, open_store, terms_of};

#[test]
fn test_second_lookup_is_served_from_cache() {
    let writer_cache = TempDir::new().unwrap();
    build(&open_store(&writer_cache, "gf-cache"), "title", &fruit_records());

    let grid = ScriptedGrid::new("gf-cache");
    let reader_cache = TempDir::new().unwrap();
    let store = open_scripted(&reader_cache, Arc::clone(&grid));

    let request = TermListRequest::new("banana").relation(Relation::Ge).limit(2);
    let first = store.fetch_term_list("title", &request).unwrap();
    assert_eq!(terms_of(&first), vec!["banana", "cherry"]);
    let downloads = grid.gets();
    assert_eq!(downloads, 2);

    let second = store.fetch_term_list("title", &request).unwrap();
    assert_eq!(first, second);
    assert_eq!(grid.gets(), downloads);

    assert_eq!(store.fetch_term("title", "cherry").unwrap().total_records, 1);
    assert_eq!(grid.gets(), downloads);
}

#[test]
fn test_concurrent_lookups_download_once() {
    let writer_cache = TempDir::new().unwrap();
    build(&open_store(&writer_cache, "gf-once"), "title", &fruit_records());

    let grid = ScriptedGrid::new("gf-once");
    let reader_cache = TempDir::new().unwrap();
    let store = open_scripted(&reader_cache, Arc::clone(&grid));

    std::thread::scope(|s| {
        for _ in 0..8 {
            s.spawn(|| {
                let apple = store.fetch_term("title", "apple").unwrap();
                assert_eq!(apple.total_occurrences, 1);
            });
        }
    });
    assert_eq!(grid.gets(), 1);
}

#[test]
fn test_missing_everywhere_is_empty() {
    let cache = TempDir::new().unwrap();
    let store = open_store(&cache, "gf-missing");
    build(&store, "title", &fruit_records());

    assert!(store.fetch_term("title", "zucchini").unwrap().is_empty());
    assert!(store.fetch_packed("title", "zucchini").unwrap().is_none());
    let request = TermListRequest::new("zucchini").relation(Relation::Ge);
    assert!(store.fetch_term_list("title", &request).unwrap().is_empty());

    assert!(store.fetch_term("never-built", "apple").unwrap().is_empty());
}

#[test]
fn test_stale_connection_is_replaced_once() {
    let grid = ScriptedGrid::with_stale("gf-stale", 1);
    let cache = TempDir::new().unwrap();
    let store = open_scripted(&cache, Arc::clone(&grid));

    store.create_index("title").unwrap();
    assert_eq!(grid.connects.load(Ordering::SeqCst), 2);

    // Parallel uploads may open one connection per shard at most.
    build(&store, "title", &fruit_records());
    let after_build = grid.connects.load(Ordering::SeqCst);
    assert!(after_build <= 2 + 4, "{after_build} connects");
    assert_eq!(
        store.remote().list_shards("title").unwrap(),
        vec!["a", "b", "c", "d"]
    );
    assert_eq!(grid.connects.load(Ordering::SeqCst), after_build);
}

#[test]
fn test_unreachable_grid_keeps_local_shards_for_resume() {
    let grid = ScriptedGrid::new("gf-down");
    let cache = TempDir::new().unwrap();
    let store = open_scripted(&cache, Arc::clone(&grid));

    store.create_index("title").unwrap();
    grid.set_down(true);
    store.begin_indexing("title").unwrap();
    store.store_terms("title", &fruit_records()).unwrap();
    let err = store.commit_indexing("title").unwrap_err();
    assert!(matches!(err, GridShardError::Transport(_)));

    // Every shard was still written locally and is queryable.
    assert_eq!(store.local().list_shards("title").unwrap(), vec!["a", "b", "c", "d"]);
    assert_eq!(store.fetch_term("title", "date").unwrap().total_records, 1);

    grid.set_down(false);
    assert!(store.remote().list_shards("title").unwrap().is_empty());
    let uploaded = store.resume_uploads("title").unwrap();
    assert_eq!(uploaded, vec!["a", "b", "c", "d"]);
    assert!(store.resume_uploads("title").unwrap().is_empty());

    let reader_cache = TempDir::new().unwrap();
    let reader = open_store(&reader_cache, "gf-down");
    assert_eq!(reader.fetch_term("title", "apple").unwrap().total_records, 1);
}

#[test]
fn test_failed_lookup_leaves_store_usable() {
    let writer_cache = TempDir::new().unwrap();
    build(&open_store(&writer_cache, "gf-recover"), "title", &fruit_records());

    let grid = ScriptedGrid::new("gf-recover");
    let cache = TempDir::new().unwrap();
    let store = open_scripted(&cache, Arc::clone(&grid));

    grid.set_down(true);
    assert!(store.fetch_term("title", "kiwi").unwrap_err().is_transport());
    assert!(!store.local().exists("title", "k"));

    grid.set_down(false);
    assert_eq!(store.fetch_term("title", "banana").unwrap().total_records, 1);
    assert!(store.fetch_term("title", "kiwi").unwrap().is_empty());
}

#[test]
fn test_clean_removes_grid_and_cache() {
    let cache = TempDir::new().unwrap();
    let store = open_store(&cache, "gf-clean");
    build(&store, "title", &[TermRecord::new("apple", 1, 0, 1)]);

    store.clean_index("title").unwrap();
    assert!(store.remote().list_shards("title").unwrap().is_empty());
    assert!(store.fetch_term("title", "apple").unwrap().is_empty());
}
