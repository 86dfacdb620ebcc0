//! Access service behavior on both backends.

use entidal_codec::{EntityValue, Value};
use entidal_core::{Context, ListOptions, UpdateOptions};
use entidal_storage::{Backend, Criteria, FindOptions, Operator, Repo, SortField};
use entidal_testkit::prelude::*;
use serde_json::json;

fn runtimes() -> Vec<TestRuntime> {
    vec![TestRuntime::document(), TestRuntime::relational()]
}

fn by_id(id: &Value) -> Criteria {
    Criteria::eq("_id", id.clone())
}

fn ids(rows: &[EntityValue]) -> Vec<Value> {
    rows.iter().map(|r| r["_id"].clone()).collect()
}

#[test]
fn create_stamps_system_fields() {
    for rt in runtimes() {
        let service = rt.service();
        let id = service
            .create(
                &ctx(),
                USER,
                row(json!({"username": "ann", "age": 3, "_version": 7, "_createdBy": "mallory"})),
            )
            .unwrap();

        let found = service
            .find_one_by_id(USER, id, &FindOptions::default())
            .unwrap()
            .unwrap();
        assert_eq!(found["_version"], Value::Integer(1), "{:?}", rt.backend());
        assert_eq!(found["_createdOn"], found["_modifiedOn"]);
        assert_eq!(found["_createdBy"], Value::from("tester"));
        assert_eq!(found["_modifiedBy"], Value::from("tester"));
        assert_eq!(found["age"], Value::Integer(3));
    }
}

#[test]
fn create_rejects_empty_and_unknown() {
    for rt in runtimes() {
        let service = rt.service();
        let err = service.create(&ctx(), USER, EntityValue::new()).unwrap_err();
        assert_eq!(err.code(), "CreateEmpty");

        let err = service
            .create(&ctx(), "Nope", row(json!({"a": 1})))
            .unwrap_err();
        assert_eq!(err.code(), "NoSuchEntity");
        assert!(err.is_client_error());
    }
}

#[test]
fn duplicate_username_is_a_conflict() {
    for rt in runtimes() {
        let service = rt.service();
        service
            .create(&ctx(), USER, row(json!({"username": "ann"})))
            .unwrap();
        let err = service
            .create(&ctx(), USER, row(json!({"username": "ann"})))
            .unwrap_err();
        assert_eq!(err.code(), "DupKey", "{:?}", rt.backend());
        assert_eq!(err.to_string(), USERNAME_TAKEN);
        assert!(err.is_client_error());
        assert_eq!(err.describe().message, USERNAME_TAKEN);

        let listed = service.list(USER, &ListOptions::default()).unwrap();
        assert_eq!(listed.total, Some(1));
    }
}

#[test]
fn update_sets_unsets_and_bumps_version() {
    for rt in runtimes() {
        let service = rt.service();
        let id = service
            .create(&ctx(), USER, row(json!({"username": "ann", "name": "Ann"})))
            .unwrap();
        let before = service
            .find_one_by_id(USER, id.clone(), &FindOptions::default())
            .unwrap()
            .unwrap();

        let result = service
            .update_one_by_criteria(
                &Context::new("editor"),
                USER,
                &by_id(&id),
                row(json!({"name": null, "age": 4})),
                &UpdateOptions::default(),
            )
            .unwrap();
        assert_eq!(result.matched_count, 1);

        let after = service
            .find_one_by_id(USER, id.clone(), &FindOptions::default())
            .unwrap()
            .unwrap();
        assert!(after.get("name").is_none(), "{:?}", rt.backend());
        assert_eq!(after["age"], Value::Integer(4));
        assert_eq!(after["_version"], Value::Integer(2));
        assert_eq!(after["_modifiedBy"], Value::from("editor"));
        assert_eq!(after["_createdOn"], before["_createdOn"]);

        for n in 0..3 {
            service
                .update_one_by_criteria(
                    &ctx(),
                    USER,
                    &by_id(&id),
                    row(json!({ "age": n })),
                    &UpdateOptions::default(),
                )
                .unwrap();
        }
        let after = service
            .find_one_by_id(USER, id, &FindOptions::default())
            .unwrap()
            .unwrap();
        assert_eq!(after["_version"], Value::Integer(5));
    }
}

#[test]
fn server_owned_fields_alone_are_a_noop() {
    for rt in runtimes() {
        let service = rt.service();
        let id = service
            .create(&ctx(), USER, row(json!({"username": "ann"})))
            .unwrap();
        let result = service
            .update_one_by_criteria(
                &ctx(),
                USER,
                &by_id(&id),
                row(json!({"_version": 40, "_createdBy": "x"})),
                &UpdateOptions::default(),
            )
            .unwrap();
        assert_eq!(result.matched_count, 0);
        let found = service
            .find_one_by_id(USER, id, &FindOptions::default())
            .unwrap()
            .unwrap();
        assert_eq!(found["_version"], Value::Integer(1));
    }
}

#[test]
fn optimistic_update_detects_conflicts() {
    for rt in runtimes() {
        let service = rt.service();
        let id = service
            .create(&ctx(), USER, row(json!({"username": "ann"})))
            .unwrap();
        service
            .update_one_by_criteria(
                &ctx(),
                USER,
                &by_id(&id),
                row(json!({"name": "first"})),
                &UpdateOptions::expecting(1),
            )
            .unwrap();
        let err = service
            .update_one_by_criteria(
                &ctx(),
                USER,
                &by_id(&id),
                row(json!({"name": "second"})),
                &UpdateOptions::expecting(1),
            )
            .unwrap_err();
        assert_eq!(err.code(), "ConcurrentUpdate", "{:?}", rt.backend());

        let found = service
            .find_one_by_id(USER, id, &FindOptions::default())
            .unwrap()
            .unwrap();
        assert_eq!(found["name"], Value::from("first"));
    }
}

#[test]
fn update_many_and_remove_many() {
    for rt in runtimes() {
        let service = rt.service();
        for (username, age) in [("a", 1), ("b", 1), ("c", 2)] {
            service
                .create(&ctx(), USER, row(json!({"username": username, "age": age})))
                .unwrap();
        }
        let changed = service
            .update_many_by_criteria(
                &ctx(),
                USER,
                &Criteria::eq("age", 1),
                row(json!({"active": true})),
            )
            .unwrap();
        assert_eq!(changed, 2, "{:?}", rt.backend());

        let active = service
            .find_many_by_criteria(USER, ListOptions::new(Criteria::eq("active", true)))
            .unwrap();
        assert_eq!(active.len(), 2);

        let err = service
            .remove_many_by_criteria(&ctx(), USER, &Criteria::All)
            .unwrap_err();
        assert_eq!(err.code(), "DeleteAllForbidden");
        let err = service
            .remove_many_by_criteria(&ctx(), USER, &Criteria::And(vec![]))
            .unwrap_err();
        assert_eq!(err.code(), "DeleteAllForbidden");

        let removed = service
            .remove_many_by_criteria(&ctx(), USER, &Criteria::eq("age", 1))
            .unwrap();
        assert_eq!(removed, 2);
        let listed = service.list(USER, &ListOptions::default()).unwrap();
        assert_eq!(listed.total, Some(1));
        assert_eq!(listed.rows[0]["username"], Value::from("c"));
    }
}

#[test]
fn trash_remove_and_recover() {
    for rt in runtimes() {
        let service = rt.service();
        let id = service
            .create(&ctx(), ARTICLE, row(json!({"title": "draft"})))
            .unwrap();
        let trash = FindOptions {
            repo: Repo::Trash,
            ..FindOptions::default()
        };

        assert_eq!(
            service.remove_many_by_criteria(&ctx(), ARTICLE, &by_id(&id)).unwrap(),
            1
        );
        assert!(service
            .find_one_by_id(ARTICLE, id.clone(), &FindOptions::default())
            .unwrap()
            .is_none());
        let trashed = service
            .find_one_by_id(ARTICLE, id.clone(), &trash)
            .unwrap()
            .unwrap();
        assert_eq!(trashed["title"], Value::from("draft"));

        assert_eq!(
            service.recover_many(&ctx(), ARTICLE, vec![id.clone()]).unwrap(),
            1
        );
        let recovered = service
            .find_one_by_id(ARTICLE, id.clone(), &FindOptions::default())
            .unwrap()
            .unwrap();
        assert_eq!(recovered["_version"], Value::Integer(3), "{:?}", rt.backend());
        assert!(matches!(recovered["_modifiedOn"], Value::Date(_)));
        assert!(service.find_one_by_id(ARTICLE, id, &trash).unwrap().is_none());

        let in_trash = service
            .list(ARTICLE, &ListOptions::default().repo(Repo::Trash))
            .unwrap();
        assert_eq!(in_trash.total, Some(0));

        let err = service.recover_many(&ctx(), ARTICLE, vec![]).unwrap_err();
        assert_eq!(err.code(), "EmptyOperation");
    }
}

#[test]
fn list_pages_follow_the_full_ordering() {
    for rt in runtimes() {
        let service = rt.service();
        for i in 0..25 {
            service
                .create(&ctx(), USER, row(json!({"username": format!("u{i:02}"), "age": i % 5})))
                .unwrap();
        }

        let everything = service
            .list(USER, &ListOptions::default().page(1, -1).without_total())
            .unwrap();
        assert_eq!(everything.rows.len(), 25, "{:?}", rt.backend());
        assert_eq!(everything.total, None);
        assert_eq!(everything.page_size, -1);

        let second = service
            .list(USER, &ListOptions::default().page(2, 10))
            .unwrap();
        assert_eq!(second.total, Some(25));
        assert_eq!(second.page_no, 2);
        assert_eq!(ids(&second.rows), ids(&everything.rows[10..20]));

        let last = service
            .list(USER, &ListOptions::default().page(3, 10))
            .unwrap();
        assert_eq!(last.rows.len(), 5);

        let defaulted = service
            .list(USER, &ListOptions::default().page(0, 0))
            .unwrap();
        assert_eq!(defaulted.page_no, 1);
        assert_eq!(defaulted.page_size, 20);
        assert_eq!(defaulted.rows.len(), 20);

        let capped = service
            .list(USER, &ListOptions::default().page(1, 100_000))
            .unwrap();
        assert_eq!(capped.page_size, 200);
    }
}

#[test]
fn list_sorts_and_projects() {
    for rt in runtimes() {
        let service = rt.service();
        for (username, age) in [("a", 3), ("b", 1), ("c", 2)] {
            service
                .create(&ctx(), USER, row(json!({"username": username, "age": age, "name": "n"})))
                .unwrap();
        }
        let options = ListOptions::new(Criteria::leaf("age", Operator::Gte, 2))
            .sort_by(SortField::asc("age"))
            .included_fields(["username"]);
        let listed = service.list(USER, &options).unwrap();
        assert_eq!(listed.total, Some(2));
        let names: Vec<_> = listed.rows.iter().map(|r| r["username"].clone()).collect();
        assert_eq!(names, vec![Value::from("c"), Value::from("a")]);
        assert!(listed.rows[0].get("name").is_none(), "{:?}", rt.backend());
        assert!(listed.rows[0].get("_id").is_some());
    }
}

#[test]
fn find_many_by_ids_and_criteria() {
    for rt in runtimes() {
        let service = rt.service();
        let created: Vec<Value> = ["a", "b", "c"]
            .iter()
            .map(|u| {
                service
                    .create(&ctx(), USER, row(json!({"username": u})))
                    .unwrap()
            })
            .collect();

        let found = service
            .find_many_by_ids(USER, created[..2].to_vec(), ListOptions::default())
            .unwrap();
        assert_eq!(found.len(), 2, "{:?}", rt.backend());

        let none = service
            .find_many_by_ids(USER, vec![], ListOptions::default())
            .unwrap();
        assert!(none.is_empty());

        let one = service
            .find_one_by_criteria(USER, &Criteria::eq("username", "b"), &FindOptions::default())
            .unwrap()
            .unwrap();
        assert_eq!(one["_id"], service
            .find_one_by_id(USER, created[1].clone(), &FindOptions::default())
            .unwrap()
            .unwrap()["_id"]);

        let missing = service
            .find_one_by_criteria(USER, &Criteria::eq("username", "zzz"), &FindOptions::default())
            .unwrap();
        assert!(missing.is_none());
    }
}

#[test]
fn invalid_criteria_match_nothing() {
    for rt in runtimes() {
        let service = rt.service();
        service
            .create(&ctx(), USER, row(json!({"username": "a"})))
            .unwrap();
        let rows = service
            .find_many_by_criteria(USER, ListOptions::new(Criteria::from_json(&json!({"operator": "eq"}))))
            .unwrap();
        assert!(rows.is_empty(), "{:?}", rt.backend());
    }
}

#[test]
fn singleton_reads_with_empty_criteria() {
    for rt in runtimes() {
        let service = rt.service();
        assert!(service
            .find_one_by_criteria(SETTINGS, &Criteria::All, &FindOptions::default())
            .unwrap()
            .is_none());
        service
            .create(&ctx(), SETTINGS, row(json!({"siteName": "demo"})))
            .unwrap();
        let settings = service
            .find_one_by_criteria(SETTINGS, &Criteria::All, &FindOptions::default())
            .unwrap()
            .unwrap();
        assert_eq!(settings["siteName"], Value::from("demo"), "{:?}", rt.backend());
    }
}

#[test]
fn history_is_listed_read_and_restored() {
    for rt in runtimes() {
        let service = rt.service();
        let id = service
            .create(&ctx(), PAGE, row(json!({"title": "one"})))
            .unwrap();
        for title in ["two", "three"] {
            service
                .update_one_by_criteria(
                    &ctx(),
                    PAGE,
                    &by_id(&id),
                    row(json!({ "title": title })),
                    &UpdateOptions::default(),
                )
                .unwrap();
        }

        let history = service.list_history(PAGE, id.clone(), 1, 0).unwrap();
        assert_eq!(history.total, Some(2), "{:?}", rt.backend());
        assert_eq!(history.rows[0]["_version"], Value::Integer(2));
        assert_eq!(history.rows[1]["_version"], Value::Integer(1));

        let first = service.get_history_item(PAGE, id.clone(), 1).unwrap();
        assert_eq!(first["title"], Value::from("one"));
        let err = service.get_history_item(PAGE, id.clone(), 9).unwrap_err();
        assert_eq!(err.code(), "NoSuchHistory");

        let version = service
            .restore_history(&Context::new("restorer"), PAGE, id.clone(), Some(1))
            .unwrap();
        assert_eq!(version, 4);
        let current = service
            .find_one_by_id(PAGE, id.clone(), &FindOptions::default())
            .unwrap()
            .unwrap();
        assert_eq!(current["title"], Value::from("one"));
        assert_eq!(current["_version"], Value::Integer(4));
        assert_eq!(current["_modifiedBy"], Value::from("restorer"));

        let history = service.list_history(PAGE, id.clone(), 1, 0).unwrap();
        assert_eq!(history.total, Some(3));
        assert_eq!(history.rows[0]["title"], Value::from("three"));
    }
}

#[test]
fn history_pages_past_the_end_are_empty() {
    for rt in runtimes() {
        let service = rt.service();
        let id = service
            .create(&ctx(), PAGE, row(json!({"title": "one"})))
            .unwrap();
        service
            .update_one_by_criteria(
                &ctx(),
                PAGE,
                &by_id(&id),
                row(json!({"title": "two"})),
                &UpdateOptions::default(),
            )
            .unwrap();
        let history = service.list_history(PAGE, id, u64::MAX, 10).unwrap();
        assert!(history.rows.is_empty(), "{:?}", rt.backend());
        assert_eq!(history.total, Some(1));
        assert_eq!(history.page_no, u64::MAX);
    }
}

#[test]
fn failed_history_update_loses_no_version() {
    for rt in runtimes() {
        let service = rt.service();
        service
            .create(&ctx(), PAGE, row(json!({"title": "a", "slug": "a"})))
            .unwrap();
        let id = service
            .create(&ctx(), PAGE, row(json!({"title": "b", "slug": "b"})))
            .unwrap();

        let err = service
            .update_one_by_criteria(
                &ctx(),
                PAGE,
                &by_id(&id),
                row(json!({"slug": "a"})),
                &UpdateOptions::default(),
            )
            .unwrap_err();
        assert_eq!(err.code(), "DupKey", "{:?}", rt.backend());
        assert_eq!(err.to_string(), SLUG_TAKEN);

        let current = service
            .find_one_by_id(PAGE, id.clone(), &FindOptions::default())
            .unwrap()
            .unwrap();
        assert_eq!(current["slug"], Value::from("b"));
        assert_eq!(current["_version"], Value::Integer(1));

        // Whatever history holds is the untouched pre-image.
        let history = service.list_history(PAGE, id, 1, 0).unwrap();
        assert!(history
            .rows
            .iter()
            .all(|r| r["slug"] == Value::from("b") && r["_version"] == Value::Integer(1)));
        if rt.backend() == Backend::Document {
            assert_eq!(history.total, Some(1));
        }
    }
}

#[test]
fn history_of_plain_entities_is_empty() {
    for rt in runtimes() {
        let service = rt.service();
        let id = service
            .create(&ctx(), USER, row(json!({"username": "ann"})))
            .unwrap();
        let history = service.list_history(USER, id.clone(), 1, 10).unwrap();
        assert!(history.rows.is_empty());
        assert_eq!(history.total, Some(0));

        let err = service
            .restore_history(&ctx(), USER, id, None)
            .unwrap_err();
        assert_eq!(err.code(), "NoSuchHistory");
    }
}

#[test]
fn history_page_size_is_capped() {
    let rt = TestRuntime::for_backend(Backend::Relational);
    let id = rt
        .service()
        .create(&ctx(), PAGE, row(json!({"title": "one"})))
        .unwrap();
    let history = rt.service().list_history(PAGE, id, 1, 5_000).unwrap();
    assert_eq!(history.page_size, 100);
}

#[test]
fn stats_count_calls_and_errors() {
    let rt = TestRuntime::relational();
    let service = rt.service();
    service
        .create(&ctx(), USER, row(json!({"username": "ann"})))
        .unwrap();
    let _ = service.create(&ctx(), USER, EntityValue::new());
    let stats = service.stats().snapshot();
    assert!(stats.service_calls >= 2);
    assert_eq!(stats.errors, 1);
    assert!(stats.writes >= 1);
}
