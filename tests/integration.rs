//! Integration tests for the state container.

use futures::executor::block_on;
use lodestore::{
    derive, handler, ItemKey, ReadOutcome, Store, StoreConfig, StoreError, StoreEvent,
    SubscriptionConfig,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

const QUOTES: &[(&str, &str)] = &[
    (
        "Care About Your Craft",
        "Why spend your life developing software unless you care about doing it well?",
    ),
    (
        "Think! About Your Work",
        "Turn off the autopilot and take control. Constantly critique and appraise your work.",
    ),
    (
        "Provide Options, Don't Make Lame Excuses",
        "Instead of excuses, provide options. Don't say it can't be done; explain what can be done.",
    ),
    (
        "Don't Live with Broken Windows",
        "Fix bad designs, wrong decisions, and poor code when you see them.",
    ),
];

const MAX_QUOTE_ID: i64 = QUOTES.len() as i64;

fn fetch_quote(id: i64) -> Option<Value> {
    let index = usize::try_from(id - 1).ok()?;
    let (title, description) = QUOTES.get(index)?;
    Some(json!({ "title": title, "description": description }))
}

fn quote_store() -> Store {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let store = Store::new(StoreConfig {
        initial_state: HashMap::from([
            ("quoteId".to_string(), json!(1)),
            ("color".to_string(), json!("blue")),
        ]),
        initializers: HashMap::from([("quotes".to_string(), "loadQuote".to_string())]),
        patch_history: 32,
        ..Default::default()
    });

    store.register_action(
        "loadQuote",
        handler(|scope, payload| async move {
            let id = payload.first().and_then(Value::as_i64).unwrap_or(1);
            let quote = fetch_quote(id)
                .ok_or_else(|| StoreError::handler(format!("no quote {id}")))?;
            scope.update(|draft| draft.set_item("quotes", &ItemKey::from(id), quote));
            Ok(Some(json!({ "quoteId": id })))
        }),
    );

    store.register_action(
        "nextQuote",
        handler(|scope, _payload| async move {
            scope.update(|draft| {
                let id = draft.get("quoteId").and_then(Value::as_i64).unwrap_or(1);
                let next = if id >= MAX_QUOTE_ID { 1 } else { id + 1 };
                draft.set("quoteId", json!(next));
            });
            Ok(None)
        }),
    );

    store.register_action(
        "toggleColor",
        handler(|scope, _payload| async move {
            scope.update(|draft| {
                let next = match draft.get("color").and_then(Value::as_str) {
                    Some("blue") => "green",
                    _ => "blue",
                };
                draft.set("color", json!(next));
            });
            Ok(None)
        }),
    );

    store
}

/// Await a pending read, then read again.
fn read_through(store: &Store, name: &str, item: Option<&ItemKey>) -> ReadOutcome {
    match store.read(name, item).unwrap() {
        ReadOutcome::Pending(loading) => {
            block_on(loading);
            store.read(name, item).unwrap()
        }
        outcome => outcome,
    }
}

// --- Reads & lazy loading ---

#[test]
fn test_initial_state_reads_synchronously() {
    let store = quote_store();
    let outcome = store.read("quoteId", None).unwrap();
    assert_eq!(**outcome.ready().unwrap(), json!(1));
}

#[test]
fn test_lazy_read_suspends_then_resolves() {
    let store = quote_store();
    let item = ItemKey::from(1);

    // First read starts the load and suspends.
    let loading = store.read("quotes", Some(&item)).unwrap().pending().unwrap();
    block_on(loading);

    // After settlement the value reads synchronously.
    let outcome = store.read("quotes", Some(&item)).unwrap();
    let quote = outcome.ready().unwrap();
    assert_eq!(quote["title"], "Care About Your Craft");
}

#[test]
fn test_whole_slice_read_uses_item_all_sentinel() {
    let store = quote_store();
    // No item key: the initializer is dispatched with an empty payload and
    // its default loads quote 1.
    let outcome = read_through(&store, "quotes", None);
    let quotes = outcome.ready().unwrap();
    assert_eq!(quotes["1"]["title"], "Care About Your Craft");
}

#[test]
fn test_single_flight_shares_one_load() {
    let store = quote_store();
    let calls = Arc::new(std::sync::atomic::AtomicU64::new(0));
    let seen = Arc::clone(&calls);
    // A second handler on the initializer action counts dispatches.
    store.register_action(
        "loadQuote",
        handler(move |_scope, _payload| {
            let seen = Arc::clone(&seen);
            async move {
                seen.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Ok(None)
            }
        }),
    );

    let item = ItemKey::from(2);
    let first = store.read("quotes", Some(&item)).unwrap().pending().unwrap();
    let second = store.read("quotes", Some(&item)).unwrap().pending().unwrap();
    assert!(first.same_load(&second));

    block_on(async { futures::join!(first, second) });

    assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    let outcome = store.read("quotes", Some(&item)).unwrap();
    assert_eq!(outcome.ready().unwrap()["title"], "Think! About Your Work");
}

#[test]
fn test_distinct_items_load_independently() {
    let store = quote_store();
    let first = read_through(&store, "quotes", Some(&ItemKey::from(1)));
    let fourth = read_through(&store, "quotes", Some(&ItemKey::from(4)));
    assert_eq!(first.ready().unwrap()["title"], "Care About Your Craft");
    assert_eq!(fourth.ready().unwrap()["title"], "Don't Live with Broken Windows");
}

// --- Actions & dispatch ---

#[test]
fn test_next_quote_wraps_at_maximum() {
    let store = quote_store();
    store.update(|draft| draft.set("quoteId", json!(MAX_QUOTE_ID)));

    block_on(store.dispatch("nextQuote", vec![])).unwrap();
    assert_eq!(*store.get("quoteId", None).unwrap(), json!(1));
}

#[test]
fn test_next_quote_increments_below_maximum() {
    let store = quote_store();
    block_on(store.dispatch("nextQuote", vec![])).unwrap();
    assert_eq!(*store.get("quoteId", None).unwrap(), json!(2));
}

#[test]
fn test_two_handlers_merge_partial_results() {
    let store = quote_store();
    store.register_action(
        "profile",
        handler(|_scope, _payload| async { Ok(Some(json!({ "name": "ada" }))) }),
    );
    store.register_action(
        "profile",
        handler(|_scope, _payload| async { Ok(Some(json!({ "role": "engineer" }))) }),
    );

    let result = block_on(store.dispatch("profile", vec![])).unwrap();
    assert_eq!(result.get("name"), Some(&json!("ada")));
    assert_eq!(result.get("role"), Some(&json!("engineer")));
}

#[test]
fn test_register_actions_merge_is_idempotent() {
    let store = Store::new(StoreConfig::default());
    let calls = Arc::new(std::sync::atomic::AtomicU64::new(0));
    let seen = Arc::clone(&calls);
    let count = handler(move |_scope, _payload| {
        let seen = Arc::clone(&seen);
        async move {
            seen.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(None)
        }
    });

    // Overlapping registration of the same handler identity merges to one.
    store.register_actions([("bump".to_string(), count.clone())]);
    store.register_actions([("bump".to_string(), count)]);

    block_on(store.dispatch("bump", vec![])).unwrap();
    assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
}

#[test]
fn test_dispatch_result_from_initializer_handler() {
    let store = quote_store();
    let result = block_on(store.dispatch("loadQuote", vec![json!(3)])).unwrap();
    assert_eq!(result.get("quoteId"), Some(&json!(3)));
    assert_eq!(
        store
            .get("quotes", Some(&ItemKey::from(3)))
            .unwrap()["title"],
        "Provide Options, Don't Make Lame Excuses"
    );
}

#[test]
fn test_shared_context_reaches_handlers() {
    let store = quote_store();
    store.context().insert("greeting", "hello".to_string());
    store.register_action(
        "greet",
        handler(|scope, _payload| async move {
            let greeting = scope
                .context()
                .get::<String>("greeting")
                .map(|g| g.to_string())
                .unwrap_or_default();
            Ok(Some(json!({ "greeting": greeting })))
        }),
    );

    let result = block_on(store.dispatch("greet", vec![])).unwrap();
    assert_eq!(result.get("greeting"), Some(&json!("hello")));
}

// --- Structural sharing & notification ---

#[test]
fn test_update_preserves_untouched_slice_identity() {
    let store = quote_store();
    let before = store.snapshot();
    block_on(store.dispatch("nextQuote", vec![])).unwrap();
    let after = store.snapshot();

    assert!(Arc::ptr_eq(
        before.slice("color").unwrap(),
        after.slice("color").unwrap()
    ));
    assert!(!Arc::ptr_eq(
        before.slice("quoteId").unwrap(),
        after.slice("quoteId").unwrap()
    ));
}

#[test]
fn test_subscribers_notified_only_for_observed_slices() {
    let store = quote_store();
    let quote_sub = store.subscribe(SubscriptionConfig::slices(["quoteId"]));
    let color_sub = store.subscribe(SubscriptionConfig::slices(["color"]));

    block_on(store.dispatch("nextQuote", vec![])).unwrap();

    match quote_sub.recv_timeout(Duration::from_millis(100)).unwrap() {
        StoreEvent::Changed { prev, next, changed_mask } => {
            assert_eq!(changed_mask & store.mask_for("quoteId"), store.mask_for("quoteId"));
            assert_eq!(*prev.slice("quoteId").unwrap().as_ref(), json!(1));
            assert_eq!(*next.slice("quoteId").unwrap().as_ref(), json!(2));
        }
        event => panic!("expected Changed, got {event:?}"),
    }
    assert!(color_sub.recv_timeout(Duration::from_millis(50)).is_err());
}

#[test]
fn test_changed_mask_matches_touched_slices_only() {
    let store = quote_store();
    let sub = store.subscribe(SubscriptionConfig::all());

    block_on(store.dispatch("toggleColor", vec![])).unwrap();

    match sub.recv_timeout(Duration::from_millis(100)).unwrap() {
        StoreEvent::Changed { changed_mask, .. } => {
            assert_eq!(changed_mask, store.mask_for("color"));
        }
        event => panic!("expected Changed, got {event:?}"),
    }
}

// --- Derived slices ---

fn register_quote_lengths(store: &Store) {
    store.register_derived(
        "quoteLengths",
        derive(|ctx, item| {
            let quote = ctx.get("quotes", item)?;
            let description = quote["description"].as_str().unwrap_or_default();
            Ok(json!(description.len()))
        }),
    );
}

#[test]
fn test_derived_read_suspends_on_missing_dependency() {
    let store = quote_store();
    register_quote_lengths(&store);

    // The derived read suspends on loading quotes[1], not on a fictitious
    // quoteLengths initializer.
    let outcome = read_through(&store, "quoteLengths", Some(&ItemKey::from(1)));
    assert_eq!(**outcome.ready().unwrap(), json!(76));
}

#[test]
fn test_derived_memoization_returns_stable_reference() {
    let store = quote_store();
    register_quote_lengths(&store);
    let item = ItemKey::from(1);

    let first = read_through(&store, "quoteLengths", Some(&item));
    let first = first.ready().unwrap();

    // An unrelated update leaves the dependency untouched, so the derived
    // value is the same reference, not a recomputation.
    block_on(store.dispatch("toggleColor", vec![])).unwrap();
    let second = store.read("quoteLengths", Some(&item)).unwrap();
    assert!(Arc::ptr_eq(first, second.ready().unwrap()));
}

#[test]
fn test_derived_observer_notified_via_dependency_mask() {
    let store = quote_store();
    register_quote_lengths(&store);
    read_through(&store, "quoteLengths", Some(&ItemKey::from(1)));

    // After first evaluation the derived mask narrows to its dependencies.
    assert_eq!(store.mask_for("quoteLengths"), store.mask_for("quotes"));

    let sub = store.subscribe(SubscriptionConfig::slices(["quoteLengths"]));
    block_on(store.dispatch("loadQuote", vec![json!(2)])).unwrap();
    assert!(sub.recv_timeout(Duration::from_millis(100)).is_ok());
}

// --- Patch log ---

#[test]
fn test_update_records_patches_and_reverts() {
    let store = quote_store();
    let event = block_on(store.dispatch("nextQuote", vec![])).unwrap();

    let updates = store.patch_log().recent(1);
    assert_eq!(updates.len(), 1);
    let update = &updates[0];
    assert_eq!(update.action.as_deref(), Some("nextQuote"));
    assert_eq!(update.dispatch_id, Some(event.dispatch_id));
    assert_eq!(update.patches[0].path, vec!["quoteId"]);
    assert_eq!(update.patches[0].value, Some(json!(2)));
    assert_eq!(update.reverts[0].value, Some(json!(1)));
}

#[test]
fn test_stats_reflect_activity() {
    let store = quote_store();
    read_through(&store, "quotes", Some(&ItemKey::from(1)));
    let stats = store.stats();
    assert_eq!(stats.slice_count, 3); // quoteId, color, quotes
    assert_eq!(stats.pending_loads, 0);
    assert!(stats.dispatch_count >= 1);
    assert!(stats.update_count >= 1);
}
