//! Property-based test generators using proptest.
//!
//! Provides strategies for generating random test data
//! that maintains required invariants.

use entigrid_codec::Value;
use entigrid_core::{Entity, Id, Scope};
use proptest::prelude::*;
use std::collections::BTreeMap;

/// Strategy for generating valid entity type names.
pub fn entity_type_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9_]{0,15}").expect("Invalid regex")
}

/// Strategy for generating valid ids of `entity_type`.
pub fn id_strategy(entity_type: &'static str) -> impl Strategy<Value = Id> {
    any::<u128>()
        .prop_filter("uuid must not be nil", |bits| *bits != 0)
        .prop_map(move |bits| Id::new(uuid::Uuid::from_u128(bits), entity_type))
}

/// Strategy for generating valid scopes.
pub fn scope_strategy() -> impl Strategy<Value = Scope> {
    (
        id_strategy("organization"),
        id_strategy("application"),
        prop::string::string_regex("[a-z]{1,12}").expect("Invalid regex"),
    )
        .prop_map(|(org, app, name)| Scope::new(org, app, name).expect("Generated invalid scope"))
}

/// Strategy for generating property values, nested up to three levels.
pub fn value_strategy() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Integer),
        "[a-zA-Z0-9 ]{0,16}".prop_map(Value::Text),
        prop::collection::vec(any::<u8>(), 0..16).prop_map(Value::Bytes),
    ];
    leaf.prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::btree_map("[a-z]{1,6}", inner, 0..4).prop_map(Value::Map),
        ]
    })
}

/// Strategy for generating property maps.
pub fn properties_strategy() -> impl Strategy<Value = BTreeMap<String, Value>> {
    prop::collection::btree_map("[a-z]{1,8}", value_strategy(), 0..6)
}

/// Strategy for generating new, unwritten entities of `entity_type`.
pub fn entity_strategy(entity_type: &'static str) -> impl Strategy<Value = Entity> {
    properties_strategy().prop_map(move |properties| {
        let mut entity = Entity::new(entity_type);
        for (name, value) in properties {
            entity.set(name, value);
        }
        entity
    })
}
