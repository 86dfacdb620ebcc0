//! Read-through caching, invalidation and cross-process events.

use entidal_codec::Value;
use entidal_core::{CoreError, EntityAccessService, EventKind, ListOptions, UpdateOptions, SYSTEM_OPERATOR};
use entidal_storage::{Backend, Criteria, FindOptions};
use entidal_testkit::prelude::*;
use parking_lot::Mutex;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[test]
fn repeated_reads_hit_the_cache() {
    let rt = TestRuntime::relational();
    let service = rt.service();
    let id = service
        .create(&ctx(), USER, row(json!({"username": "ann"})))
        .unwrap();
    service.stats().reset();

    for _ in 0..3 {
        service
            .find_one_by_id(USER, id.clone(), &FindOptions::default())
            .unwrap()
            .unwrap();
    }
    let stats = service.stats().snapshot();
    assert_eq!(stats.cache_misses, 1);
    assert_eq!(stats.cache_hits, 2);
    assert_eq!(stats.store_queries, 1);
}

#[test]
fn writes_never_leave_stale_reads() {
    for backend in [Backend::Document, Backend::Relational] {
        let rt = TestRuntime::for_backend(backend);
        let service = rt.service();
        let id = service
            .create(&ctx(), USER, row(json!({"username": "ann", "age": 1})))
            .unwrap();
        let by_age = ListOptions::new(Criteria::eq("age", 1));

        assert_eq!(service.list(USER, &by_age).unwrap().total, Some(1));
        service
            .find_one_by_id(USER, id.clone(), &FindOptions::default())
            .unwrap();

        service
            .create(&ctx(), USER, row(json!({"username": "bob", "age": 1})))
            .unwrap();
        assert_eq!(service.list(USER, &by_age).unwrap().total, Some(2), "{backend:?}");

        service
            .update_one_by_criteria(
                &ctx(),
                USER,
                &Criteria::eq("_id", id.clone()),
                row(json!({"age": 2})),
                &UpdateOptions::default(),
            )
            .unwrap();
        let found = service
            .find_one_by_id(USER, id.clone(), &FindOptions::default())
            .unwrap()
            .unwrap();
        assert_eq!(found["age"], Value::Integer(2));
        assert_eq!(service.list(USER, &by_age).unwrap().total, Some(1));

        // Updates by non-id criteria drop every cached id read.
        service
            .update_many_by_criteria(&ctx(), USER, &Criteria::eq("age", 2), row(json!({"age": 3})))
            .unwrap();
        let found = service
            .find_one_by_id(USER, id.clone(), &FindOptions::default())
            .unwrap()
            .unwrap();
        assert_eq!(found["age"], Value::Integer(3));

        service
            .remove_many_by_criteria(&ctx(), USER, &Criteria::eq("age", 3))
            .unwrap();
        assert!(service
            .find_one_by_id(USER, id, &FindOptions::default())
            .unwrap()
            .is_none());
    }
}

#[test]
fn uncached_entities_always_read_the_store() {
    let rt = TestRuntime::relational();
    let service = rt.service();
    let id = service
        .create(&ctx(), AUDIT, row(json!({"action": "login"})))
        .unwrap();
    service.stats().reset();
    for _ in 0..2 {
        service
            .find_one_by_id(AUDIT, id.clone(), &FindOptions::default())
            .unwrap()
            .unwrap();
    }
    let stats = service.stats().snapshot();
    assert_eq!(stats.cache_hits, 0);
    assert_eq!(stats.cache_misses, 0);
    assert_eq!(stats.store_queries, 2);
}

#[test]
fn clear_cache_forces_store_reads() {
    let rt = TestRuntime::document();
    let service = rt.service();
    service
        .create(&ctx(), USER, row(json!({"username": "ann"})))
        .unwrap();
    service.list(USER, &ListOptions::default()).unwrap();
    service.clear_cache().unwrap();
    service.stats().reset();
    service.list(USER, &ListOptions::default()).unwrap();
    assert_eq!(service.stats().cache_misses(), 1);
}

#[test]
fn local_listeners_see_every_change() {
    let rt = TestRuntime::relational();
    let service = rt.service();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    service.listeners().on_updated_or_removed(move |ctx, event| {
        sink.lock().push((ctx.operator().to_string(), event.kind));
        Ok(())
    });
    let events = service.listeners().subscribe();

    let id = service
        .create(&ctx(), USER, row(json!({"username": "ann"})))
        .unwrap();
    let by_id = Criteria::eq("_id", id.clone());
    service
        .update_one_by_criteria(&ctx(), USER, &by_id, row(json!({"age": 1})), &UpdateOptions::default())
        .unwrap();
    service.remove_many_by_criteria(&ctx(), USER, &by_id).unwrap();

    assert_eq!(
        *seen.lock(),
        vec![
            ("tester".to_string(), EventKind::Updated),
            ("tester".to_string(), EventKind::Removed),
        ]
    );
    let kinds: Vec<_> = events.try_iter().map(|e| e.kind).collect();
    assert_eq!(kinds, vec![EventKind::Created, EventKind::Updated, EventKind::Removed]);
}

#[test]
fn failing_listener_fails_the_call_after_the_write() {
    let rt = TestRuntime::relational();
    let service = rt.service();
    service
        .listeners()
        .on_entity_created(|_, _| Err(CoreError::listener("rejected")));

    let err = service
        .create(&ctx(), USER, row(json!({"username": "ann"})))
        .unwrap_err();
    assert_eq!(err.code(), "ListenerError");
    assert!(err.is_server_error());
    assert_eq!(err.describe().message, "internal error");

    let listed = service.list(USER, &ListOptions::default()).unwrap();
    assert_eq!(listed.total, Some(1));
}

fn age_of(service: &EntityAccessService, id: &Value) -> Value {
    service
        .find_one_by_id(USER, id.clone(), &FindOptions::default())
        .unwrap()
        .unwrap()["age"]
        .clone()
}

#[test]
fn cluster_writes_invalidate_the_shared_cache() {
    for backend in [Backend::Document, Backend::Relational] {
        let cluster = TestCluster::open(backend);
        let first = cluster.first.service();
        let second = cluster.second.service();

        let id = first
            .create(&ctx(), USER, row(json!({"username": "ann", "age": 1})))
            .unwrap();
        assert_eq!(age_of(first, &id), Value::Integer(1));
        assert_eq!(age_of(second, &id), Value::Integer(1));
        assert!(second.stats().cache_hits() >= 1, "{backend:?}");

        second
            .update_one_by_criteria(
                &ctx(),
                USER,
                &Criteria::eq("_id", id.clone()),
                row(json!({"age": 2})),
                &UpdateOptions::default(),
            )
            .unwrap();
        assert_eq!(age_of(first, &id), Value::Integer(2), "{backend:?}");
    }
}

#[test]
fn cluster_events_reach_the_other_process() {
    let cluster = TestCluster::open(Backend::Relational);
    assert!(cluster.first.is_cluster());

    let remote = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&remote);
    cluster
        .first
        .service()
        .listeners()
        .on_entity_updated(move |ctx, event| {
            sink.lock().push((ctx.operator().to_string(), event.ids.clone()));
            Ok(())
        });
    let local = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&local);
    cluster
        .second
        .service()
        .listeners()
        .on_entity_updated(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

    let id = cluster
        .second
        .service()
        .create(&ctx(), ARTICLE, row(json!({"title": "t"})))
        .unwrap();
    cluster
        .second
        .service()
        .update_one_by_criteria(
            &ctx(),
            ARTICLE,
            &Criteria::eq("_id", id.clone()),
            row(json!({"title": "u"})),
            &UpdateOptions::default(),
        )
        .unwrap();

    assert_eq!(local.load(Ordering::SeqCst), 1);
    assert!(remote.lock().is_empty());
    assert_eq!(cluster.first.poll_bus(), 2);
    assert_eq!(
        *remote.lock(),
        vec![(SYSTEM_OPERATOR.to_string(), Some(vec![id]))]
    );

    // Each message is delivered once, and never back to its sender.
    assert_eq!(cluster.first.poll_bus(), 0);
    assert_eq!(cluster.second.poll_bus(), 0);
    assert_eq!(local.load(Ordering::SeqCst), 1);
}
