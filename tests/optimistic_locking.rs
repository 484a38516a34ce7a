//! Integration tests for the database driver's optimistic concurrency

use std::sync::Arc;

use anyhow::Result;
use tally::{
    cart::{Cart, CartError},
    identity::Identity,
    items::{ItemUpdate, NewItem},
    money::Money,
    storage::{DatabaseStore, Storage, StorageError},
};

fn widget(id: &str) -> NewItem {
    NewItem::new(id, "Widget", Money::from_minor(10_00, "USD"), 1)
}

#[test]
fn racing_writers_resolve_to_exactly_one_winner() -> Result<()> {
    let storage = Arc::new(DatabaseStore::new());

    // Both carts read the same persisted state (and version).
    let mut writer_a = Cart::new(Identity::customer("42"), Arc::clone(&storage) as Arc<dyn Storage>)?;
    writer_a.add(widget("p1"))?;

    let mut writer_b = Cart::new(Identity::customer("42"), Arc::clone(&storage) as Arc<dyn Storage>)?;
    let read_version = writer_b.version();

    // Writer A commits first.
    writer_a.add(widget("p2"))?;

    // Writer B is now stale and must lose the round.
    let result = writer_b.add(widget("p3"));

    let conflict = match result {
        Err(CartError::Storage(StorageError::Conflict(conflict))) => conflict,
        other => {
            assert!(
                matches!(other, Err(CartError::Storage(StorageError::Conflict(_)))),
                "expected a version conflict, got {other:?}"
            );
            return Ok(());
        }
    };

    assert_eq!(conflict.attempted_version(), read_version);
    assert_eq!(conflict.current_version(), read_version + 1);
    assert!(conflict.is_minor_conflict());
    assert_eq!(
        conflict.resolution_suggestions(),
        ["retry_with_refresh", "merge_changes"]
    );

    // The loser's write never landed.
    assert_eq!(storage.get_items("42", "default")?.len(), 2);

    Ok(())
}

#[test]
fn reload_then_retry_recovers_from_a_conflict() -> Result<()> {
    let storage = Arc::new(DatabaseStore::new());

    let mut writer_a = Cart::new(Identity::customer("42"), Arc::clone(&storage) as Arc<dyn Storage>)?;
    writer_a.add(widget("p1"))?;

    let mut writer_b = Cart::new(Identity::customer("42"), Arc::clone(&storage) as Arc<dyn Storage>)?;

    writer_a.add(widget("p2"))?;

    assert!(writer_b.add(widget("p3")).is_err());

    // The engine never retries on its own; the caller refreshes explicitly.
    writer_b.reload()?;
    writer_b.add(widget("p3"))?;

    assert_eq!(storage.get_items("42", "default")?.len(), 3);

    Ok(())
}

#[test]
fn conflict_payload_travels_to_the_api_layer() -> Result<()> {
    let storage = Arc::new(DatabaseStore::new());

    let mut writer_a = Cart::new(Identity::customer("7"), Arc::clone(&storage) as Arc<dyn Storage>)?;
    writer_a.add(widget("p1"))?;

    let mut writer_b = Cart::new(Identity::customer("7"), Arc::clone(&storage) as Arc<dyn Storage>)?;
    writer_a.update("p1", ItemUpdate::quantity(5))?;

    let conflict = match writer_b.clear() {
        Err(CartError::Storage(StorageError::Conflict(conflict))) => conflict,
        other => {
            assert!(
                matches!(other, Err(CartError::Storage(StorageError::Conflict(_)))),
                "expected a version conflict, got {other:?}"
            );
            return Ok(());
        }
    };

    let payload = conflict.to_payload();

    assert_eq!(payload["error"], "cart_conflict");
    assert_eq!(payload["attempted_version"], 1);
    assert_eq!(payload["current_version"], 2);
    assert_eq!(payload["is_minor_conflict"], true);
    assert_eq!(
        payload["resolution_suggestions"],
        serde_json::json!(["retry_with_refresh", "merge_changes"])
    );

    Ok(())
}

#[test]
fn far_behind_writers_get_the_major_conflict_suggestions() -> Result<()> {
    let storage = Arc::new(DatabaseStore::new());

    let mut writer_a = Cart::new(Identity::customer("9"), Arc::clone(&storage) as Arc<dyn Storage>)?;
    writer_a.add(widget("p1"))?;

    let mut stale = Cart::new(Identity::customer("9"), Arc::clone(&storage) as Arc<dyn Storage>)?;

    // Three more committed rounds leave the stale reader far behind.
    writer_a.add(widget("p2"))?;
    writer_a.add(widget("p3"))?;
    writer_a.add(widget("p4"))?;

    let conflict = match stale.add(widget("p5")) {
        Err(CartError::Storage(StorageError::Conflict(conflict))) => conflict,
        other => {
            assert!(
                matches!(other, Err(CartError::Storage(StorageError::Conflict(_)))),
                "expected a version conflict, got {other:?}"
            );
            return Ok(());
        }
    };

    assert_eq!(conflict.version_difference(), 3);
    assert!(!conflict.is_minor_conflict());
    assert_eq!(
        conflict.resolution_suggestions(),
        ["reload_cart", "manual_resolution_required"]
    );

    Ok(())
}

#[test]
fn session_driver_accepts_stale_writers_silently() -> Result<()> {
    use tally::storage::SessionStore;

    let storage = Arc::new(SessionStore::new());

    let mut writer_a = Cart::new(Identity::guest("s1"), Arc::clone(&storage) as Arc<dyn Storage>)?;
    writer_a.add(widget("p1"))?;

    let mut writer_b = Cart::new(Identity::guest("s1"), Arc::clone(&storage) as Arc<dyn Storage>)?;
    writer_a.add(widget("p2"))?;

    // Last write wins; no conflict is raised.
    writer_b.add(widget("p3"))?;

    Ok(())
}
