//! All-or-nothing commits, rollback and concurrent modification.

mod common;

use common::*;
use std::thread;
use talkingbook_catalog::catalog::Playlist;
use talkingbook_catalog::metadata_store::{
    retry_once_on_stale, Edit, MetadataStore, TransactionState,
};
use talkingbook_catalog::CatalogError;

#[test]
fn test_failed_commit_leaves_nothing_visible() {
    let (store, _dir) = create_tmp_store();
    let handle = init_taxonomy(&store, REV1_YAML);
    let change_count = store.change_count().unwrap();

    let mut item = audio_item(handle.taxonomy(), "item-1", "Planting", "en", &["A1"]);
    let mut playlist = Playlist::new("playlist-1", "Farming");
    playlist.add_audio_item("item-1");
    playlist.add_audio_item("ghost");

    let mut transaction = store.new_transaction();
    transaction.add(&mut playlist);
    transaction.add(&mut item);
    let err = transaction.commit().unwrap_err();

    assert!(matches!(
        err,
        CatalogError::TransactionFailed {
            staged: 1,
            total: 2,
            ..
        }
    ));
    assert_eq!(transaction.state(), TransactionState::Failed);
    assert!(store.get_audio_item("item-1").unwrap().is_none());

    transaction.rollback().unwrap();
    assert_eq!(transaction.state(), TransactionState::RolledBack);
    drop(transaction);

    assert!(store.get_audio_item("item-1").unwrap().is_none());
    assert!(store.get_playlist("playlist-1").unwrap().is_none());
    assert_eq!(store.change_count().unwrap(), change_count);
    assert!(item.is_new());
}

#[test]
fn test_rollback_reverts_enqueued_instances() {
    let (store, _dir) = create_tmp_store();
    let handle = init_taxonomy(&store, REV1_YAML);
    let mut item = import_item(&store, handle.taxonomy(), "item-1", "Before", "en", &["A1"]);
    assert_eq!(item.row_version, 1);

    item.metadata_mut().title = "After".to_string();
    item.add_category(handle.taxonomy(), "B1").unwrap();
    let mut transaction = store.new_transaction();
    transaction.add(&mut item);
    transaction.delete_playlist("missing-playlist");
    assert!(transaction.commit().is_err());
    transaction.rollback().unwrap();
    drop(transaction);

    assert_eq!(item.title(), "Before");
    assert_eq!(item.row_version, 1);
    assert!(!item.has_category("B1"));
    let stored = store.get_audio_item("item-1").unwrap().unwrap();
    assert_eq!(stored, item);
}

#[test]
fn test_dropping_failed_transaction_releases_store() {
    let (store, _dir) = create_tmp_store();
    init_taxonomy(&store, REV1_YAML);

    {
        let mut transaction = store.new_transaction();
        transaction.delete_audio_item("missing");
        assert!(transaction.commit().is_err());
    }

    let handle = init_taxonomy(&store, REV1_YAML);
    import_item(&store, handle.taxonomy(), "item-1", "After drop", "en", &[]);
    assert!(store.get_audio_item("item-1").unwrap().is_some());
}

#[test]
fn test_closed_transaction_rejects_further_calls() {
    let (store, _dir) = create_tmp_store();
    let handle = init_taxonomy(&store, REV1_YAML);
    let mut item = audio_item(handle.taxonomy(), "item-1", "Song", "en", &[]);

    let mut transaction = store.new_transaction();
    transaction.add(&mut item);
    transaction.commit().unwrap();
    assert_eq!(transaction.state(), TransactionState::Committed);
    assert!(matches!(
        transaction.commit(),
        Err(CatalogError::TransactionClosed(TransactionState::Committed))
    ));
    assert!(matches!(
        transaction.rollback(),
        Err(CatalogError::TransactionClosed(TransactionState::Committed))
    ));
    drop(transaction);
    assert_eq!(item.row_version, 1);

    let mut abandoned = store.new_transaction();
    abandoned.rollback().unwrap();
    assert!(matches!(
        abandoned.commit(),
        Err(CatalogError::TransactionClosed(TransactionState::RolledBack))
    ));
}

#[test]
fn test_edits_apply_in_referential_order() {
    let (store, _dir) = create_tmp_store();
    let handle = init_taxonomy(&store, REV1_YAML);
    let mut first = audio_item(handle.taxonomy(), "item-1", "One", "en", &[]);
    let mut second = audio_item(handle.taxonomy(), "item-2", "Two", "en", &[]);
    let mut playlist = Playlist::new("playlist-1", "Both");
    playlist.add_audio_item("item-1");
    playlist.add_audio_item("item-2");

    // Playlist enqueued before the items it references.
    store
        .commit(vec![
            Edit::from(&mut playlist),
            Edit::from(&mut second),
            Edit::from(&mut first),
        ])
        .unwrap();

    let stored = store.get_playlist("playlist-1").unwrap().unwrap();
    assert_eq!(stored.audio_items(), ids(&["item-1", "item-2"]).as_slice());

    // Item deleted before the playlist holding it.
    let mut transaction = store.new_transaction();
    transaction.delete_audio_item("item-1");
    transaction.delete_playlist("playlist-1");
    transaction.commit().unwrap();
    drop(transaction);

    assert!(store.get_playlist("playlist-1").unwrap().is_none());
    assert!(store.get_audio_item("item-1").unwrap().is_none());
    assert!(store.get_audio_item("item-2").unwrap().is_some());
}

#[test]
fn test_concurrent_edit_is_stale_and_retry_succeeds() {
    let (store, _dir) = create_tmp_store();
    let handle = init_taxonomy(&store, REV1_YAML);
    import_item(&store, handle.taxonomy(), "item-1", "Original", "en", &["A1"]);

    let stale_copy = store.get_audio_item("item-1").unwrap().unwrap();
    let mut theirs = store.get_audio_item("item-1").unwrap().unwrap();

    theirs.metadata_mut().set_field("speaker", "Theirs");
    store.commit(vec![Edit::from(&mut theirs)]).unwrap();

    let mut mine = stale_copy.clone();
    mine.add_category(handle.taxonomy(), "B1").unwrap();
    let err = store.commit(vec![Edit::from(&mut mine)]).unwrap_err();
    assert!(err.is_stale());
    // The failed commit reloaded the instance.
    assert_eq!(mine.row_version, 2);
    assert!(!mine.has_category("B1"));

    let mut attempts = 0;
    let saved = retry_once_on_stale(|| {
        attempts += 1;
        let mut item = if attempts == 1 {
            stale_copy.clone()
        } else {
            store.get_audio_item("item-1")?.unwrap()
        };
        item.add_category(handle.taxonomy(), "B1")?;
        store.commit(vec![Edit::from(&mut item)])?;
        Ok(item)
    })
    .unwrap();

    assert_eq!(attempts, 2);
    assert_eq!(saved.metadata().field("speaker"), Some("Theirs"));
    assert!(saved.has_category("B1"));
    assert_eq!(saved.row_version, 3);
}

#[test]
fn test_import_from_worker_thread() {
    let (store, _dir) = create_tmp_store();
    let handle = init_taxonomy(&store, REV1_YAML);
    let change_count = store.change_count().unwrap();

    let worker_store = store.clone();
    let taxonomy = handle.taxonomy().clone();
    let worker = thread::spawn(move || {
        for i in 0..10 {
            import_item(
                &worker_store,
                &taxonomy,
                &format!("item-{:02}", i),
                &format!("Message {}", i),
                "en",
                &["A"],
            );
        }
    });
    worker.join().unwrap();

    let items = store.get_audio_items().unwrap();
    assert_eq!(items.len(), 10);
    let order: Vec<&str> = items.iter().map(|i| i.id.as_str()).collect();
    assert_eq!(order.first(), Some(&"item-00"));
    assert_eq!(order.last(), Some(&"item-09"));
    assert!(items.windows(2).all(|w| w[0].import_order < w[1].import_order));
    assert!(items.iter().all(|i| i.has_category("A1")));
    assert_eq!(store.change_count().unwrap(), change_count + 10);
}
