//! Property tests: both backends agree on criteria semantics.

use entidal_codec::{EntityValue, Value};
use entidal_core::{EntityAccessService, ListOptions, UpdateOptions};
use entidal_storage::{Backend, Criteria, FindOptions};
use entidal_testkit::prelude::*;
use proptest::prelude::*;
use std::collections::BTreeSet;

fn seed(service: &EntityAccessService, rows: &[EntityValue]) {
    for (i, fields) in rows.iter().enumerate() {
        let mut instance = fields.clone();
        instance.insert("username".into(), Value::Text(format!("u{i}")));
        service.create(&ctx(), USER, instance).unwrap();
    }
}

fn matching(service: &EntityAccessService, criteria: &Criteria) -> BTreeSet<String> {
    service
        .find_many_by_criteria(
            USER,
            ListOptions::new(criteria.clone()).included_fields(["username"]),
        )
        .unwrap()
        .into_iter()
        .filter_map(|row| row.get("username").and_then(Value::as_text).map(str::to_string))
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn backends_match_the_same_rows(
        rows in prop::collection::vec(user_row_strategy(), 0..8),
        criteria in prop::collection::vec(criteria_strategy(), 1..6),
    ) {
        let document = TestRuntime::document();
        let relational = TestRuntime::relational();
        seed(document.service(), &rows);
        seed(relational.service(), &rows);

        for criteria in &criteria {
            let left = matching(document.service(), criteria);
            let right = matching(relational.service(), criteria);
            prop_assert_eq!(left, right, "criteria {:?}", criteria);
        }
    }

    #[test]
    fn every_update_bumps_the_version_once(updates in prop::collection::vec(age_strategy(), 0..6)) {
        for backend in [Backend::Document, Backend::Relational] {
            let rt = TestRuntime::for_backend(backend);
            let service = rt.service();
            let id = service
                .create(&ctx(), USER, row(serde_json::json!({"username": "ann"})))
                .unwrap();
            for age in &updates {
                service
                    .update_one_by_criteria(
                        &ctx(),
                        USER,
                        &Criteria::eq("_id", id.clone()),
                        row(serde_json::json!({ "age": age })),
                        &UpdateOptions::default(),
                    )
                    .unwrap();
            }
            let found = service
                .find_one_by_id(USER, id, &FindOptions::default())
                .unwrap()
                .unwrap();
            prop_assert_eq!(&found["_version"], &Value::Integer(1 + updates.len() as i64));
            prop_assert_eq!(&found["_createdBy"], &found["_modifiedBy"]);
        }
    }

    #[test]
    fn all_and_invalid_bracket_every_match(
        rows in prop::collection::vec(user_row_strategy(), 0..6),
        criteria in criteria_strategy(),
    ) {
        let rt = TestRuntime::relational();
        seed(rt.service(), &rows);
        let everything = matching(rt.service(), &Criteria::All);
        prop_assert_eq!(everything.len(), rows.len());

        let some = matching(rt.service(), &criteria);
        prop_assert!(some.is_subset(&everything));
        prop_assert!(matching(rt.service(), &Criteria::Invalid("x".into())).is_empty());
        prop_assert_eq!(
            matching(rt.service(), &Criteria::Or(vec![criteria, Criteria::All])),
            everything
        );
    }
}
