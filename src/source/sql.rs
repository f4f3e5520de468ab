//! PostgreSQL queryable source.
//!
//! Instructions are lowered into SQL text with positional `$n` parameters.
//! Relationship hops in predicates and order keys become correlated
//! subqueries; included relationships run as one extra statement per
//! relationship and nesting level, batched over all parent rows, with
//! `ROW_NUMBER() OVER (PARTITION BY ...)` bounding each parent's window.
//!
//! Statements are executed through an [`SqlConnection`], so any driver can
//! sit underneath.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{QueryableSource, SourceCapabilities};
use crate::compiler::plan::{Hop, OrderKey, Predicate, Projection, PropertyPath, Scalar, Window};
use crate::error::CompileError;
use crate::expr::ast::{ComparisonOp, TextMatchKind};
use crate::model::{PropertyMap, Related, Row, Value};
use crate::{Error, Result};

const ID: &str = "__id";
const PARENT: &str = "__parent";
const ROW: &str = "__row";

// ============================================================================
// Mapping
// ============================================================================

/// How a relationship is stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JoinMapping {
    /// A column on the owning table holds the target's identity.
    ForeignKey { column: String },
    /// A column on the target table holds the owner's identity.
    Inverse { column: String },
    /// A join table holds both identities.
    Through { table: String, source_column: String, target_column: String },
}

/// Storage of one resource type. Attribute properties are column names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableMapping {
    pub table: String,
    #[serde(default = "default_identity")]
    pub identity: String,
    /// Relationship property → join.
    #[serde(default)]
    pub joins: HashMap<String, JoinMapping>,
}

fn default_identity() -> String {
    "id".to_owned()
}

/// Tables and joins for every resource type served by a [`SqlSource`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SqlMapping {
    tables: HashMap<String, TableMapping>,
}

impl SqlMapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Config(format!("invalid SQL mapping: {e}")))
    }

    /// Map a resource type to a table with an `id` identity column.
    pub fn table(mut self, resource_type: impl Into<String>, table: impl Into<String>) -> Self {
        let mapping = TableMapping { table: table.into(), identity: default_identity(), joins: HashMap::new() };
        self.tables.insert(resource_type.into(), mapping);
        self
    }

    /// Declare how a relationship of an already mapped type is joined.
    pub fn join(mut self, resource_type: &str, relationship: impl Into<String>, join: JoinMapping) -> Self {
        if let Some(table) = self.tables.get_mut(resource_type) {
            table.joins.insert(relationship.into(), join);
        }
        self
    }

    pub fn get(&self, resource_type: &str) -> std::result::Result<&TableMapping, CompileError> {
        self.tables
            .get(resource_type)
            .ok_or_else(|| CompileError::UnknownMapping(format!("no table for resource type '{resource_type}'")))
    }

    fn join_of(&self, resource_type: &str, hop: &Hop) -> std::result::Result<&JoinMapping, CompileError> {
        self.get(resource_type)?.joins.get(&hop.property).ok_or_else(|| {
            CompileError::UnknownMapping(format!("no join for relationship '{}' of '{resource_type}'", hop.name))
        })
    }
}

pub fn escape_ident(s: impl AsRef<str>) -> String {
    format!("\"{}\"", s.as_ref().replace('"', "\"\""))
}

fn column(alias: &str, name: &str) -> String {
    format!("{alias}.{}", escape_ident(name))
}

fn like_pattern(kind: TextMatchKind, text: &str) -> String {
    let escaped = text.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_");
    match kind {
        TextMatchKind::Contains => format!("%{escaped}%"),
        TextMatchKind::StartsWith => format!("{escaped}%"),
        TextMatchKind::EndsWith => format!("%{escaped}"),
    }
}

fn operator(op: ComparisonOp) -> &'static str {
    match op {
        ComparisonOp::Equals => "=",
        ComparisonOp::LessThan => "<",
        ComparisonOp::LessOrEqual => "<=",
        ComparisonOp::GreaterThan => ">",
        ComparisonOp::GreaterOrEqual => ">=",
    }
}

// ============================================================================
// Lowered form
// ============================================================================

/// A statement plus its positional parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedQuery {
    pub sql: String,
    pub params: Vec<Value>,
}

/// A query lowered into SQL fragments over the alias `t0`.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlQuery {
    resource: String,
    table: String,
    identity: String,
    conditions: Vec<String>,
    params: Vec<Value>,
    aliases: usize,
    /// Rendered key expressions with their direction.
    order: Vec<(String, bool)>,
    window: Option<Window>,
    columns: Vec<String>,
    nested: Vec<NestedSql>,
}

#[derive(Debug, Clone, PartialEq)]
struct NestedSql {
    hop: Hop,
    join: JoinMapping,
    query: SqlQuery,
}

enum Leaf<'p> {
    Attribute(&'p str),
    Count,
    Exists(Option<&'p Predicate>),
}

/// Renders instructions into one query's fragments, allocating its
/// parameters and aliases.
struct Renderer<'a> {
    mapping: &'a SqlMapping,
    query: &'a mut SqlQuery,
}

impl Renderer<'_> {
    fn param(&mut self, value: Value) -> String {
        if value.is_null() {
            return "NULL".to_owned();
        }
        self.query.params.push(value);
        format!("${}", self.query.params.len())
    }

    fn alias(&mut self) -> String {
        self.query.aliases += 1;
        format!("t{}", self.query.aliases)
    }

    /// FROM clause and join condition for one hop out of `alias`, plus the
    /// alias of the reached table.
    fn link(&mut self, resource: &str, alias: &str, hop: &Hop) -> std::result::Result<(String, String, String), CompileError> {
        let join = self.mapping.join_of(resource, hop)?.clone();
        let source_identity = self.mapping.get(resource)?.identity.clone();
        let target = self.mapping.get(&hop.target)?;
        let (table, target_identity) = (escape_ident(&target.table), target.identity.clone());
        let reached = self.alias();
        Ok(match join {
            JoinMapping::ForeignKey { column: fk } => (
                format!("{table} {reached}"),
                format!("{} = {}", column(&reached, &target_identity), column(alias, &fk)),
                reached,
            ),
            JoinMapping::Inverse { column: fk } => (
                format!("{table} {reached}"),
                format!("{} = {}", column(&reached, &fk), column(alias, &source_identity)),
                reached,
            ),
            JoinMapping::Through { table: through, source_column, target_column } => {
                let j = format!("j{}", self.query.aliases);
                (
                    format!(
                        "{table} {reached} JOIN {} {j} ON {} = {}",
                        escape_ident(&through),
                        column(&j, &target_column),
                        column(&reached, &target_identity)
                    ),
                    format!("{} = {}", column(&j, &source_column), column(alias, &source_identity)),
                    reached,
                )
            }
        })
    }

    fn navigate(&mut self, resource: &str, alias: &str, hops: &[Hop], leaf: Leaf<'_>) -> std::result::Result<String, CompileError> {
        match (hops, leaf) {
            ([], Leaf::Attribute(attribute)) => Ok(column(alias, attribute)),
            ([], _) => Err(CompileError::Unsupported("aggregate over a path without relationships".into())),
            ([last], Leaf::Count) => {
                let (from, condition, _) = self.link(resource, alias, last)?;
                Ok(format!("(SELECT COUNT(*) FROM {from} WHERE {condition})"))
            }
            ([last], Leaf::Exists(filter)) => {
                let (from, condition, reached) = self.link(resource, alias, last)?;
                let mut conditions = vec![condition];
                if let Some(filter) = filter {
                    conditions.push(self.predicate(&last.target, &reached, filter)?);
                }
                Ok(format!("EXISTS (SELECT 1 FROM {from} WHERE {})", conditions.join(" AND ")))
            }
            ([first, rest @ ..], leaf) => {
                let (from, condition, reached) = self.link(resource, alias, first)?;
                let inner = self.navigate(&first.target, &reached, rest, leaf)?;
                Ok(format!("(SELECT {inner} FROM {from} WHERE {condition})"))
            }
        }
    }

    fn path(&mut self, resource: &str, alias: &str, path: &PropertyPath) -> std::result::Result<String, CompileError> {
        let attribute = path
            .attribute
            .as_deref()
            .ok_or_else(|| CompileError::Unsupported(format!("path '{path}' has no attribute")))?;
        self.navigate(resource, alias, &path.hops, Leaf::Attribute(attribute))
    }

    fn scalar(&mut self, resource: &str, alias: &str, scalar: &Scalar) -> std::result::Result<String, CompileError> {
        match scalar {
            Scalar::Property(path) => self.path(resource, alias, path),
            Scalar::Count(path) => self.navigate(resource, alias, &path.hops, Leaf::Count),
            Scalar::Value(value) => Ok(self.param(value.clone())),
        }
    }

    fn predicate(&mut self, resource: &str, alias: &str, predicate: &Predicate) -> std::result::Result<String, CompileError> {
        Ok(match predicate {
            Predicate::Compare { op, left, right } => {
                let left = self.scalar(resource, alias, left)?;
                let right = self.scalar(resource, alias, right)?;
                format!("{left} {} {right}", operator(*op))
            }
            Predicate::IsNull(operand) => format!("{} IS NULL", self.scalar(resource, alias, operand)?),
            Predicate::Text { kind, path, text } => {
                let value = self.path(resource, alias, path)?;
                format!("{value} LIKE {}", self.param(Value::String(like_pattern(*kind, text))))
            }
            Predicate::In { path, values } if values.is_empty() => {
                self.path(resource, alias, path)?;
                "FALSE".to_owned()
            }
            Predicate::In { path, values } => {
                let value = self.path(resource, alias, path)?;
                let params: Vec<String> = values.iter().map(|v| self.param(v.clone())).collect();
                format!("{value} IN ({})", params.join(", "))
            }
            Predicate::Exists { path, filter } => {
                self.navigate(resource, alias, &path.hops, Leaf::Exists(filter.as_deref()))?
            }
            Predicate::And(parts) => self.join(resource, alias, parts, " AND ")?,
            Predicate::Or(parts) => self.join(resource, alias, parts, " OR ")?,
            Predicate::Not(inner) => format!("NOT ({})", self.predicate(resource, alias, inner)?),
            Predicate::False => "FALSE".to_owned(),
        })
    }

    fn join(&mut self, resource: &str, alias: &str, parts: &[Predicate], separator: &str) -> std::result::Result<String, CompileError> {
        let rendered = parts
            .iter()
            .map(|p| self.predicate(resource, alias, p))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(format!("({})", rendered.join(separator)))
    }
}

// ============================================================================
// Connection
// ============================================================================

/// Executes rendered statements. Records are keyed by column alias.
#[async_trait]
pub trait SqlConnection: Send + Sync {
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<PropertyMap>>;
}

// ============================================================================
// SqlSource
// ============================================================================

/// Queries a PostgreSQL database described by a [`SqlMapping`].
pub struct SqlSource<C> {
    mapping: SqlMapping,
    connection: C,
}

/// Restricts a nested statement to the rows of a parent batch.
struct ParentScope<'a> {
    join: &'a JoinMapping,
    keys: Vec<Value>,
}

type Fetched = Vec<(Value, Row)>;

impl<C: SqlConnection> SqlSource<C> {
    pub fn new(mapping: SqlMapping, connection: C) -> Self {
        Self { mapping, connection }
    }

    pub fn connection(&self) -> &C {
        &self.connection
    }

    /// The statement for a root query.
    pub fn statement(&self, query: &SqlQuery) -> RenderedQuery {
        self.render(query, None)
    }

    fn render(&self, query: &SqlQuery, parent: Option<&ParentScope<'_>>) -> RenderedQuery {
        let mut params = query.params.clone();
        let mut select = vec![format!("{} AS {}", column("t0", &query.identity), escape_ident(ID))];
        select.extend(query.columns.iter().map(|c| column("t0", c)));
        select.extend(query.order.iter().enumerate().map(|(i, (expr, _))| format!("{expr} AS \"__k{i}\"")));
        for (i, nested) in query.nested.iter().enumerate() {
            if let JoinMapping::ForeignKey { column: fk } = &nested.join {
                select.push(format!("{} AS \"__fk{i}\"", column("t0", fk)));
            }
        }

        let mut from = format!("{} t0", escape_ident(&query.table));
        let mut conditions = query.conditions.clone();
        let mut partition = None;
        if let Some(parent) = parent {
            params.push(Value::List(parent.keys.clone()));
            let placeholder = format!("${}", params.len());
            let parent_column = match parent.join {
                JoinMapping::ForeignKey { .. } => column("t0", &query.identity),
                JoinMapping::Inverse { column: fk } => column("t0", fk),
                JoinMapping::Through { table, source_column, target_column } => {
                    from.push_str(&format!(
                        " JOIN {} j0 ON {} = {}",
                        escape_ident(table),
                        column("j0", target_column),
                        column("t0", &query.identity)
                    ));
                    column("j0", source_column)
                }
            };
            select.push(format!("{parent_column} AS {}", escape_ident(PARENT)));
            conditions.insert(0, format!("{parent_column} = ANY({placeholder})"));
            partition = Some(parent_column);
        }

        let order_by: Vec<String> = query
            .order
            .iter()
            .map(|(expr, descending)| {
                if *descending { format!("{expr} DESC NULLS LAST") } else { format!("{expr} ASC NULLS FIRST") }
            })
            .collect();

        let mut sql = String::new();
        match (&partition, &query.window) {
            (Some(partition), Some(window)) => {
                let over = if order_by.is_empty() {
                    format!("PARTITION BY {partition}")
                } else {
                    format!("PARTITION BY {partition} ORDER BY {}", order_by.join(", "))
                };
                select.push(format!("ROW_NUMBER() OVER ({over}) AS {}", escape_ident(ROW)));
                let (skip, take) = match window {
                    Window::Offset { skip, take } => (*skip, *take),
                    Window::Cursor { take, .. } => (0, *take),
                };
                sql.push_str(&format!("SELECT * FROM (SELECT {} FROM {from}", select.join(", ")));
                if !conditions.is_empty() {
                    sql.push_str(&format!(" WHERE {}", conditions.join(" AND ")));
                }
                sql.push_str(&format!(
                    ") AS \"nested\" WHERE {row} > {skip} AND {row} <= {} ORDER BY {}, {row}",
                    skip + take,
                    escape_ident(PARENT),
                    row = escape_ident(ROW),
                ));
            }
            _ => {
                sql.push_str(&format!("SELECT {} FROM {from}", select.join(", ")));
                if !conditions.is_empty() {
                    sql.push_str(&format!(" WHERE {}", conditions.join(" AND ")));
                }
                if !order_by.is_empty() {
                    sql.push_str(&format!(" ORDER BY {}", order_by.join(", ")));
                }
                if let Some(Window::Offset { skip, take }) = &query.window {
                    sql.push_str(&format!(" LIMIT {take}"));
                    if *skip > 0 {
                        sql.push_str(&format!(" OFFSET {skip}"));
                    }
                }
            }
        }
        RenderedQuery { sql, params }
    }

    /// Run a query and its nested queries. Each row is paired with its
    /// `__parent` key (Null for root rows).
    fn fetch<'a>(
        &'a self,
        query: &'a SqlQuery,
        parent: Option<ParentScope<'a>>,
    ) -> Pin<Box<dyn Future<Output = Result<Fetched>> + Send + 'a>> {
        Box::pin(async move {
            let statement = self.render(query, parent.as_ref());
            tracing::trace!(sql = %statement.sql, params = statement.params.len(), "executing statement");
            let records = self.connection.query(&statement.sql, &statement.params).await?;

            let mut fetched = Vec::with_capacity(records.len());
            let mut foreign_keys: Vec<Vec<Value>> = Vec::with_capacity(records.len());
            for mut record in records {
                let id = record.remove(ID).unwrap_or(Value::Null);
                let parent_key = record.remove(PARENT).unwrap_or(Value::Null);
                let mut row = Row::new(query.resource.clone(), id);
                row.sort_key = (0..query.order.len())
                    .map(|i| record.remove(&format!("__k{i}")).unwrap_or(Value::Null))
                    .collect();
                foreign_keys.push(
                    (0..query.nested.len())
                        .map(|i| record.remove(&format!("__fk{i}")).unwrap_or(Value::Null))
                        .collect(),
                );
                for name in &query.columns {
                    row.attributes.insert(name.clone(), record.remove(name).unwrap_or(Value::Null));
                }
                fetched.push((parent_key, row));
            }

            for (i, nested) in query.nested.iter().enumerate() {
                let link_of = |index: usize, row: &Row| match nested.join {
                    JoinMapping::ForeignKey { .. } => foreign_keys[index][i].clone(),
                    _ => row.id.clone(),
                };
                let mut keys: Vec<Value> = Vec::new();
                for (index, (_, row)) in fetched.iter().enumerate() {
                    let key = link_of(index, row);
                    if !key.is_null() && !keys.contains(&key) {
                        keys.push(key);
                    }
                }
                let children = if keys.is_empty() {
                    Vec::new()
                } else {
                    self.fetch(&nested.query, Some(ParentScope { join: &nested.join, keys })).await?
                };
                for (index, (_, row)) in fetched.iter_mut().enumerate() {
                    let key = link_of(index, row);
                    let matching: Vec<Row> = children
                        .iter()
                        .filter(|(parent_key, _)| !key.is_null() && *parent_key == key)
                        .map(|(_, child)| child.clone())
                        .collect();
                    let related = if nested.hop.to_many {
                        Related::Many(matching)
                    } else {
                        Related::One(matching.into_iter().next().map(Box::new))
                    };
                    row.relationships.insert(nested.hop.property.clone(), related);
                }
            }
            Ok(fetched)
        })
    }
}

#[async_trait]
impl<C: SqlConnection> QueryableSource for SqlSource<C> {
    type Query = SqlQuery;

    fn capabilities(&self) -> SourceCapabilities {
        SourceCapabilities { supports_cursor: false, supports_nested_window: true }
    }

    fn root(&self, resource: &str) -> std::result::Result<SqlQuery, CompileError> {
        let table = self.mapping.get(resource)?;
        Ok(SqlQuery {
            resource: resource.to_owned(),
            table: table.table.clone(),
            identity: table.identity.clone(),
            conditions: Vec::new(),
            params: Vec::new(),
            aliases: 0,
            order: Vec::new(),
            window: None,
            columns: Vec::new(),
            nested: Vec::new(),
        })
    }

    fn apply_predicate(&self, mut query: SqlQuery, predicate: &Predicate) -> std::result::Result<SqlQuery, CompileError> {
        let resource = query.resource.clone();
        let condition = Renderer { mapping: &self.mapping, query: &mut query }.predicate(&resource, "t0", predicate)?;
        query.conditions.push(condition);
        Ok(query)
    }

    fn apply_order(&self, mut query: SqlQuery, keys: &[OrderKey]) -> std::result::Result<SqlQuery, CompileError> {
        let resource = query.resource.clone();
        let mut renderer = Renderer { mapping: &self.mapping, query: &mut query };
        let order = keys
            .iter()
            .map(|k| Ok((renderer.scalar(&resource, "t0", &k.key)?, k.descending)))
            .collect::<std::result::Result<Vec<_>, CompileError>>()?;
        query.order = order;
        Ok(query)
    }

    fn apply_window(&self, mut query: SqlQuery, window: &Window) -> std::result::Result<SqlQuery, CompileError> {
        if matches!(window, Window::Cursor { .. }) {
            return Err(CompileError::Unsupported("cursor windows; use keyset predicates".into()));
        }
        query.window = Some(window.clone());
        Ok(query)
    }

    fn apply_projection(
        &self,
        mut query: SqlQuery,
        projection: &Projection,
        nested: Vec<(Hop, SqlQuery)>,
    ) -> std::result::Result<SqlQuery, CompileError> {
        query.identity = projection.identity.clone();
        query.columns = projection.attributes.clone();
        for hop in &projection.linkage {
            let identities_only = self.root(&hop.target)?;
            query.nested.push(NestedSql {
                hop: hop.clone(),
                join: self.mapping.join_of(&query.resource, hop)?.clone(),
                query: identities_only,
            });
        }
        for (hop, child) in nested {
            let join = self.mapping.join_of(&query.resource, &hop)?.clone();
            query.nested.push(NestedSql { hop, join, query: child });
        }
        Ok(query)
    }

    async fn execute(&self, query: &SqlQuery) -> Result<Vec<Row>> {
        let fetched = self.fetch(query, None).await?;
        Ok(fetched.into_iter().map(|(_, row)| row).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        statements: Mutex<Vec<RenderedQuery>>,
        responses: Mutex<Vec<Vec<PropertyMap>>>,
    }

    #[async_trait]
    impl SqlConnection for Recorder {
        async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<PropertyMap>> {
            self.statements.lock().push(RenderedQuery { sql: sql.to_owned(), params: params.to_vec() });
            let mut responses = self.responses.lock();
            Ok(if responses.is_empty() { Vec::new() } else { responses.remove(0) })
        }
    }

    fn mapping() -> SqlMapping {
        SqlMapping::new()
            .table("todoItems", "todo_items")
            .table("people", "people")
            .table("tags", "tags")
            .join("todoItems", "owner", JoinMapping::ForeignKey { column: "owner_id".into() })
            .join(
                "todoItems",
                "tags",
                JoinMapping::Through { table: "todo_tags".into(), source_column: "todo_id".into(), target_column: "tag_id".into() },
            )
            .join("people", "todoItems", JoinMapping::Inverse { column: "owner_id".into() })
    }

    fn owner() -> Hop {
        Hop { name: "owner".into(), property: "owner".into(), target: "people".into(), to_many: false }
    }

    fn tags() -> Hop {
        Hop { name: "tags".into(), property: "tags".into(), target: "tags".into(), to_many: true }
    }

    fn projection(attributes: &[&str]) -> Projection {
        Projection { identity: "id".into(), attributes: attributes.iter().map(|a| a.to_string()).collect(), linkage: Vec::new() }
    }

    #[test]
    fn test_predicate_through_to_one() {
        let source = SqlSource::new(mapping(), Recorder::default());
        let query = source.root("todoItems").unwrap();
        let predicate = Predicate::Compare {
            op: ComparisonOp::Equals,
            left: Scalar::Property(PropertyPath { hops: vec![owner()], attribute: Some("first_name".into()) }),
            right: Scalar::Value(Value::from("John")),
        };
        let query = source.apply_predicate(query, &predicate).unwrap();
        let query = source.apply_window(query, &Window::Offset { skip: 20, take: 10 }).unwrap();
        let query = source.apply_projection(query, &projection(&["description"]), Vec::new()).unwrap();

        let statement = source.statement(&query);
        assert_eq!(
            statement.sql,
            "SELECT t0.\"id\" AS \"__id\", t0.\"description\" FROM \"todo_items\" t0 \
             WHERE (SELECT t1.\"first_name\" FROM \"people\" t1 WHERE t1.\"id\" = t0.\"owner_id\") = $1 \
             LIMIT 10 OFFSET 20"
        );
        assert_eq!(statement.params, vec![Value::from("John")]);
    }

    #[test]
    fn test_exists_count_and_like() {
        let source = SqlSource::new(mapping(), Recorder::default());
        let tags_path = PropertyPath { hops: vec![tags()], attribute: None };
        let predicate = Predicate::And(vec![
            Predicate::Exists {
                path: tags_path.clone(),
                filter: Some(Box::new(Predicate::Text {
                    kind: TextMatchKind::StartsWith,
                    path: PropertyPath::attribute("name"),
                    text: "50%".into(),
                })),
            },
            Predicate::Compare { op: ComparisonOp::GreaterThan, left: Scalar::Count(tags_path), right: Scalar::Value(Value::Int(1)) },
        ]);
        let query = source.apply_predicate(source.root("todoItems").unwrap(), &predicate).unwrap();
        assert_eq!(
            query.conditions[0],
            "(EXISTS (SELECT 1 FROM \"tags\" t1 JOIN \"todo_tags\" j1 ON j1.\"tag_id\" = t1.\"id\" \
             WHERE j1.\"todo_id\" = t0.\"id\" AND t1.\"name\" LIKE $1) AND \
             (SELECT COUNT(*) FROM \"tags\" t2 JOIN \"todo_tags\" j2 ON j2.\"tag_id\" = t2.\"id\" WHERE j2.\"todo_id\" = t0.\"id\") > $2)"
        );
        assert_eq!(query.params, vec![Value::from("50\\%%"), Value::Int(1)]);
    }

    #[test]
    fn test_order_and_null_semantics() {
        let source = SqlSource::new(mapping(), Recorder::default());
        let query = source.root("todoItems").unwrap();
        let query = source
            .apply_predicate(query, &Predicate::IsNull(Scalar::Property(PropertyPath::attribute("description"))))
            .unwrap();
        let keys = [
            OrderKey { key: Scalar::Property(PropertyPath::attribute("priority")), descending: true },
            OrderKey { key: Scalar::Property(PropertyPath::attribute("id")), descending: false },
        ];
        let query = source.apply_order(query, &keys).unwrap();
        let query = source.apply_projection(query, &projection(&[]), Vec::new()).unwrap();
        assert_eq!(
            source.statement(&query).sql,
            "SELECT t0.\"id\" AS \"__id\", t0.\"priority\" AS \"__k0\", t0.\"id\" AS \"__k1\" FROM \"todo_items\" t0 \
             WHERE t0.\"description\" IS NULL ORDER BY t0.\"priority\" DESC NULLS LAST, t0.\"id\" ASC NULLS FIRST"
        );
        assert!(matches!(
            source.apply_window(source.root("tags").unwrap(), &Window::Cursor { after: None, take: 1 }),
            Err(CompileError::Unsupported(_))
        ));
    }

    #[test]
    fn test_unknown_mapping() {
        let source = SqlSource::new(mapping(), Recorder::default());
        assert!(matches!(source.root("comments"), Err(CompileError::UnknownMapping(_))));
        let predicate = Predicate::Exists {
            path: PropertyPath {
                hops: vec![Hop { name: "x".into(), property: "x".into(), target: "tags".into(), to_many: true }],
                attribute: None,
            },
            filter: None,
        };
        assert!(matches!(
            source.apply_predicate(source.root("todoItems").unwrap(), &predicate),
            Err(CompileError::UnknownMapping(_))
        ));
    }

    #[tokio::test]
    async fn test_nested_window_per_parent() {
        let recorder = Recorder::default();
        *recorder.responses.lock() = vec![
            vec![
                PropertyMap::from([("__id".to_owned(), Value::Int(1))]),
                PropertyMap::from([("__id".to_owned(), Value::Int(2))]),
            ],
            vec![
                PropertyMap::from([
                    ("__id".to_owned(), Value::Int(10)),
                    ("__parent".to_owned(), Value::Int(1)),
                    ("description".to_owned(), Value::from("a")),
                ]),
                PropertyMap::from([
                    ("__id".to_owned(), Value::Int(11)),
                    ("__parent".to_owned(), Value::Int(2)),
                    ("description".to_owned(), Value::from("b")),
                ]),
            ],
        ];
        let source = SqlSource::new(mapping(), recorder);

        let child = source.root("todoItems").unwrap();
        let child = source
            .apply_order(child, &[OrderKey { key: Scalar::Property(PropertyPath::attribute("id")), descending: false }])
            .unwrap();
        let child = source.apply_window(child, &Window::Offset { skip: 0, take: 2 }).unwrap();
        let child = source.apply_projection(child, &projection(&["description"]), Vec::new()).unwrap();
        let todo_items = Hop { name: "todoItems".into(), property: "todoItems".into(), target: "todoItems".into(), to_many: true };
        let root = source.apply_projection(source.root("people").unwrap(), &projection(&[]), vec![(todo_items, child)]).unwrap();

        let rows = source.execute(&root).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].related("todoItems")[0].id, Value::Int(10));
        assert_eq!(rows[1].related("todoItems")[0].get("description"), Some(&Value::from("b")));

        let statements = source.connection().statements.lock();
        assert_eq!(statements.len(), 2);
        assert_eq!(
            statements[1].sql,
            "SELECT * FROM (SELECT t0.\"id\" AS \"__id\", t0.\"description\", t0.\"id\" AS \"__k0\", \
             t0.\"owner_id\" AS \"__parent\", ROW_NUMBER() OVER (PARTITION BY t0.\"owner_id\" ORDER BY t0.\"id\" ASC NULLS FIRST) AS \"__row\" \
             FROM \"todo_items\" t0 WHERE t0.\"owner_id\" = ANY($1)) AS \"nested\" \
             WHERE \"__row\" > 0 AND \"__row\" <= 2 ORDER BY \"__parent\", \"__row\""
        );
        assert_eq!(statements[1].params, vec![Value::List(vec![Value::Int(1), Value::Int(2)])]);
    }

    #[tokio::test]
    async fn test_to_one_linkage_uses_foreign_key() {
        let recorder = Recorder::default();
        *recorder.responses.lock() = vec![
            vec![PropertyMap::from([("__id".to_owned(), Value::Int(1)), ("__fk0".to_owned(), Value::Int(7))])],
            vec![PropertyMap::from([("__id".to_owned(), Value::Int(7)), ("__parent".to_owned(), Value::Int(7))])],
        ];
        let source = SqlSource::new(mapping(), recorder);
        let projection = Projection { identity: "id".into(), attributes: Vec::new(), linkage: vec![owner()] };
        let root = source.apply_projection(source.root("todoItems").unwrap(), &projection, Vec::new()).unwrap();

        let rows = source.execute(&root).await.unwrap();
        assert_eq!(rows[0].related("owner")[0].id, Value::Int(7));
        let statements = source.connection().statements.lock();
        assert_eq!(
            statements[0].sql,
            "SELECT t0.\"id\" AS \"__id\", t0.\"owner_id\" AS \"__fk0\" FROM \"todo_items\" t0"
        );
        assert_eq!(
            statements[1].sql,
            "SELECT t0.\"id\" AS \"__id\", t0.\"id\" AS \"__parent\" FROM \"people\" t0 WHERE t0.\"id\" = ANY($1)"
        );
    }

    #[test]
    fn test_mapping_from_json() {
        let mapping = SqlMapping::from_json(
            r#"{ "todoItems": { "table": "todo_items", "joins": { "owner": { "kind": "foreign_key", "column": "owner_id" } } } }"#,
        )
        .unwrap();
        let table = mapping.get("todoItems").unwrap();
        assert_eq!(table.identity, "id");
        assert_eq!(table.joins["owner"], JoinMapping::ForeignKey { column: "owner_id".into() });
    }
}
