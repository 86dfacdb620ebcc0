//! Property-based test generators using proptest.
//!
//! Criteria and rows are generated over the fields of the sample `User`
//! entity. Most operands match the declared field types; a share of leaves
//! is deliberately mistyped, so both backends must agree on what can never
//! match.

use entidal_codec::{EntityValue, Value};
use entidal_storage::{Criteria, Operator};
use proptest::prelude::*;

/// Strategy for short text over a tiny alphabet, so text matches hit.
pub fn short_text_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[ab_%]{0,3}").expect("Invalid regex")
}

/// Strategy for `User.age` values.
pub fn age_strategy() -> impl Strategy<Value = i64> + Clone {
    0i64..6
}

/// Strategy for `User.score` values.
pub fn score_strategy() -> impl Strategy<Value = f64> {
    prop::sample::select(vec![-1.5, 0.0, 0.5, 2.25, 10.0])
}

/// Strategy for `User.tags` values.
pub fn tags_strategy() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec(prop::sample::select(vec!["a".to_string(), "b".to_string()]), 1..3)
}

/// Strategy for one seeded `User` row, without its username.
///
/// Every field may be missing.
pub fn user_row_strategy() -> impl Strategy<Value = EntityValue> {
    (
        prop::option::of(short_text_strategy()),
        prop::option::of(age_strategy()),
        prop::option::of(score_strategy()),
        prop::option::of(any::<bool>()),
        prop::option::of(tags_strategy()),
    )
        .prop_map(|(name, age, score, active, tags)| {
            let mut row = EntityValue::new();
            if let Some(name) = name {
                row.insert("name".into(), Value::Text(name));
            }
            if let Some(age) = age {
                row.insert("age".into(), Value::Integer(age));
            }
            if let Some(score) = score {
                row.insert("score".into(), Value::Float(score));
            }
            if let Some(active) = active {
                row.insert("active".into(), Value::Bool(active));
            }
            if let Some(tags) = tags {
                row.insert("tags".into(), Value::Array(tags.into_iter().map(Value::Text).collect()));
            }
            row
        })
}

fn comparison_operator() -> impl Strategy<Value = Operator> {
    prop::sample::select(vec![
        Operator::Eq,
        Operator::Ne,
        Operator::Gt,
        Operator::Gte,
        Operator::Lt,
        Operator::Lte,
    ])
}

fn list_leaf<S>(field: &'static str, values: S) -> impl Strategy<Value = Criteria>
where
    S: Strategy<Value = Value> + Clone,
{
    (
        prop::sample::select(vec![Operator::In, Operator::Nin]),
        prop::collection::vec(values, 0..3),
    )
        .prop_map(move |(op, values)| Criteria::leaf(field, op, Value::Array(values)))
}

/// Strategy for a single valid leaf over the `User` fields.
pub fn leaf_strategy() -> impl Strategy<Value = Criteria> {
    let age = age_strategy().prop_map(Value::Integer);
    let score = score_strategy().prop_map(Value::Float);
    let name = short_text_strategy().prop_map(Value::Text).boxed();
    prop_oneof![
        (comparison_operator(), age.clone()).prop_map(|(op, v)| Criteria::leaf("age", op, v)),
        (comparison_operator(), score).prop_map(|(op, v)| Criteria::leaf("score", op, v)),
        (prop::sample::select(vec![Operator::Eq, Operator::Ne]), any::<bool>())
            .prop_map(|(op, v)| Criteria::leaf("active", op, v)),
        (
            prop::sample::select(vec![
                Operator::Eq,
                Operator::Ne,
                Operator::Start,
                Operator::End,
                Operator::Contain,
            ]),
            name.clone(),
        )
            .prop_map(|(op, v)| Criteria::leaf("name", op, v)),
        prop::sample::select(vec!["name", "age", "active"])
            .prop_flat_map(|field| {
                prop::sample::select(vec![Operator::Eq, Operator::Ne])
                    .prop_map(move |op| Criteria::leaf(field, op, Value::Null))
            }),
        list_leaf("age", age),
        list_leaf("name", name),
    ]
}

fn text_matcher() -> impl Strategy<Value = Operator> {
    prop::sample::select(vec![Operator::Start, Operator::End, Operator::Contain])
}

/// Strategy for leaves that can never match a `User` row.
///
/// Covers text matchers on non-text fields, operands of the wrong type,
/// comparisons on the list-valued `tags` and fields that are not declared.
pub fn mistyped_leaf_strategy() -> impl Strategy<Value = Criteria> {
    let junk = prop::sample::select(vec![
        Value::from("abc"),
        Value::from("a"),
        Value::Bool(true),
        Value::Array(vec![Value::from("a")]),
    ]);
    prop_oneof![
        (
            prop::sample::select(vec!["age", "score", "active", "tags"]),
            text_matcher(),
            short_text_strategy(),
        )
            .prop_map(|(field, op, v)| Criteria::leaf(field, op, Value::Text(v))),
        (comparison_operator(), junk.clone()).prop_map(|(op, v)| Criteria::leaf("age", op, v)),
        (comparison_operator(), age_strategy())
            .prop_map(|(op, v)| Criteria::leaf("active", op, Value::Integer(v))),
        (comparison_operator(), junk).prop_map(|(op, v)| Criteria::leaf("tags", op, v)),
        list_leaf("tags", prop::sample::select(vec![Value::from("a"), Value::from("b")])),
        (comparison_operator(), age_strategy())
            .prop_map(|(op, v)| Criteria::leaf("nickname", op, Value::Integer(v))),
    ]
}

/// Strategy for criteria trees up to three levels deep.
pub fn criteria_strategy() -> impl Strategy<Value = Criteria> {
    let leaf = prop_oneof![
        8 => leaf_strategy(),
        3 => mistyped_leaf_strategy(),
        1 => Just(Criteria::All),
        1 => Just(Criteria::Invalid("missing field".into())),
        1 => Just(Criteria::Or(Vec::new())),
    ];
    leaf.prop_recursive(3, 16, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Criteria::And),
            prop::collection::vec(inner, 0..4).prop_map(Criteria::Or),
        ]
    })
}

/// Strategy for 24-character hex object ids.
pub fn object_id_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[0-9a-f]{24}").expect("Invalid regex")
}

/// Strategy for any value the relational envelope must carry.
pub fn value_strategy() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Integer),
        (-1.0e12f64..1.0e12).prop_map(Value::Float),
        ".{0,12}".prop_map(Value::Text),
        prop::collection::vec(any::<u8>(), 0..16).prop_map(Value::Bytes),
        (0i64..4_102_444_800_000).prop_map(Value::Date),
        object_id_strategy().prop_map(Value::ObjectId),
    ];
    leaf.prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::btree_map("[a-z]{1,6}", inner, 0..4).prop_map(Value::Map),
        ]
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::strategy::ValueTree;
    use proptest::test_runner::TestRunner;

    #[test]
    fn generated_leaves_are_valid() {
        let mut runner = TestRunner::default();
        for _ in 0..64 {
            let leaf = leaf_strategy().new_tree(&mut runner).unwrap().current();
            assert!(matches!(leaf, Criteria::Leaf(_)), "{leaf:?}");
        }
    }

    #[test]
    fn rows_only_use_user_fields() {
        let mut runner = TestRunner::default();
        for _ in 0..32 {
            let row = user_row_strategy().new_tree(&mut runner).unwrap().current();
            assert!(row
                .keys()
                .all(|k| ["name", "age", "score", "active", "tags"].contains(&k.as_str())));
        }
    }

    #[test]
    fn mistyped_leaves_are_leaves() {
        let mut runner = TestRunner::default();
        for _ in 0..64 {
            let leaf = mistyped_leaf_strategy().new_tree(&mut runner).unwrap().current();
            assert!(matches!(leaf, Criteria::Leaf(_)), "{leaf:?}");
        }
    }
}
