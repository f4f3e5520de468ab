//! Shared fixture: a todo-list resource graph and seeded memory source.
//!
//! | id | description    | priority | owner | tags       |
//! |----|----------------|----------|-------|------------|
//! | 1  | Buy milk       | 3        | John  | home       |
//! | 2  | Build shed     | 1        | John  | home, work |
//! | 3  | Call mom       | 2        | Jane  |            |
//! | 4  | Write report   | 3        | Jane  | work       |
//! | 5  | Backup disk    | null     |       |            |

#![allow(dead_code)]

use resource_query::{
    props, Capabilities, Capability, Cardinality, QueryEngine, QueryOptions, RelationshipField, ResourceGraph,
    Row, Value, ValueType,
};
use resource_query::graph::AttrField;
use resource_query::MemorySource;

pub fn graph() -> ResourceGraph {
    ResourceGraph::builder()
        .resource("todoItems", ValueType::Int, |r| {
            r.attr("description", ValueType::String)
                .attr("priority", ValueType::Int)
                .attribute(
                    AttrField::new("internalNote", ValueType::String)
                        .property("internal_note")
                        .capabilities(Capabilities::ATTRIBUTE.without(Capability::Filter).without(Capability::Sort)),
                )
                .has_one("owner", "people")
                .has_many("tags", "tags")
        })
        .resource("people", ValueType::Int, |r| {
            r.attr("firstName", ValueType::String)
                .attr("lastName", ValueType::String)
                .has_many("todoItems", "todoItems")
        })
        .resource("tags", ValueType::Int, |r| {
            r.attr("name", ValueType::String).relationship(
                RelationshipField::new("todoItem", Cardinality::ToOne, "todoItems")
                    .capabilities(Capabilities::RELATIONSHIP.without(Capability::Include)),
            )
        })
        .build()
        .unwrap()
}

/// Log to the test writer, filtered by `RUST_LOG`.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn engine() -> QueryEngine {
    engine_with(QueryOptions::default())
}

pub fn engine_with(options: QueryOptions) -> QueryEngine {
    init_test_logging();
    QueryEngine::new(graph(), options)
}

fn todo(id: i64, description: &str, priority: Option<i64>) -> resource_query::PropertyMap {
    props([
        ("id", Value::Int(id)),
        ("description", Value::from(description)),
        ("priority", priority.map_or(Value::Null, Value::Int)),
        ("internal_note", Value::from(format!("note {id}"))),
    ])
}

pub fn source() -> MemorySource {
    let source = MemorySource::new(&graph());
    for (id, description, priority) in [
        (1, "Buy milk", Some(3)),
        (2, "Build shed", Some(1)),
        (3, "Call mom", Some(2)),
        (4, "Write report", Some(3)),
        (5, "Backup disk", None),
    ] {
        source.insert("todoItems", todo(id, description, priority)).unwrap();
    }
    source.insert("people", props([("id", Value::Int(1)), ("firstName", "John".into()), ("lastName", "Doe".into())])).unwrap();
    source.insert("people", props([("id", Value::Int(2)), ("firstName", "Jane".into()), ("lastName", "Roe".into())])).unwrap();
    source.insert("people", props([("id", Value::Int(3)), ("firstName", "Nobody".into()), ("lastName", Value::Null)])).unwrap();
    for (id, name) in [(10, "home"), (11, "work"), (12, "garden")] {
        source.insert("tags", props([("id", Value::Int(id)), ("name", Value::from(name))])).unwrap();
    }

    for (item, owner) in [(1, 1), (2, 1), (3, 2), (4, 2)] {
        source.link("todoItems", item, "owner", owner).unwrap();
        source.link("people", owner, "todoItems", item).unwrap();
    }
    for (item, tag) in [(1, 10), (2, 10), (2, 11), (4, 11)] {
        source.link("todoItems", item, "tags", tag).unwrap();
        source.link("tags", tag, "todoItem", item).unwrap();
    }
    source
}

pub fn ids(rows: &[Row]) -> Vec<i64> {
    rows.iter().filter_map(|r| r.id.as_int()).collect()
}
