//! Dependency Tracker (C5): given any `DatabaseChange`, returns the minimal
//! set of stream-ids whose output could have changed. False positives are
//! permitted; false negatives are a bug (spec.md §4.5).

use crate::row::RowMap;
use crate::schema::Schema;
use crate::value::Value;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeOperation {
    Insert,
    Update,
    Delete,
    BulkInsert,
    BulkUpdate,
    BulkDelete,
}

/// Describes one committed mutation, emitted by `ReactiveDataAccess` after
/// the underlying write commits.
#[derive(Debug, Clone)]
pub struct DatabaseChange {
    pub table: String,
    pub operation: ChangeOperation,
    pub affected_columns: HashSet<String>,
    pub where_clause: Option<String>,
    pub where_args: Option<Vec<Value>>,
    pub primary_key: Option<Vec<Value>>,
    pub old_values: Option<RowMap>,
    pub new_values: Option<RowMap>,
}

impl DatabaseChange {
    pub fn new(table: impl Into<String>, operation: ChangeOperation) -> Self {
        Self {
            table: table.into(),
            operation,
            affected_columns: HashSet::new(),
            where_clause: None,
            where_args: None,
            primary_key: None,
            old_values: None,
            new_values: None,
        }
    }

    pub fn with_columns(mut self, columns: HashSet<String>) -> Self {
        self.affected_columns = columns;
        self
    }

    pub fn with_new_values(mut self, values: RowMap) -> Self {
        self.new_values = Some(values);
        self
    }

    pub fn with_old_values(mut self, values: RowMap) -> Self {
        self.old_values = Some(values);
        self
    }

    pub fn with_primary_key(mut self, pk: Vec<Value>) -> Self {
        self.primary_key = Some(pk);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DependencyKind {
    WholeTable,
    ColumnWise,
    WhereClause,
    RelatedTable,
}

impl DependencyKind {
    fn as_str(self) -> &'static str {
        match self {
            DependencyKind::WholeTable => "whole_table",
            DependencyKind::ColumnWise => "column_wise",
            DependencyKind::WhereClause => "where_clause",
            DependencyKind::RelatedTable => "related_table",
        }
    }
}

/// What a registered stream depends on. `related_tables` is populated
/// separately from the schema's relationships, never by the caller.
#[derive(Debug, Clone)]
pub struct StreamDependency {
    pub stream_id: String,
    pub table: String,
    pub kind: DependencyKind,
    pub columns: Option<HashSet<String>>,
    pub where_clause: Option<String>,
    pub where_args: Option<Vec<Value>>,
    pub related_tables: HashSet<String>,
}

/// A structured registration spec, the common case (spec.md §4.5a).
#[derive(Debug, Clone, Default)]
pub struct QuerySpec {
    pub table: String,
    pub where_clause: Option<String>,
    pub where_args: Option<Vec<Value>>,
    pub columns: Option<HashSet<String>>,
    pub order_by: Option<String>,
}

impl QuerySpec {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Default::default()
        }
    }

    pub fn with_where(mut self, clause: impl Into<String>, args: Vec<Value>) -> Self {
        self.where_clause = Some(clause.into());
        self.where_args = Some(args);
        self
    }

    pub fn with_columns(mut self, columns: HashSet<String>) -> Self {
        self.columns = Some(columns);
        self
    }
}

/// How a stream was registered: a structured spec, or a raw SQL string
/// pattern-scanned for table/column references (spec.md §4.5b).
pub enum RegistrationSpec {
    Structured(QuerySpec),
    RawSql(String),
}

#[derive(Debug, Clone, Default)]
pub struct DependencyStats {
    pub total_streams: usize,
    pub total_dependencies: usize,
    pub counts_per_kind: HashMap<&'static str, usize>,
    pub tables_with_dependents: usize,
}

/// Forward index (stream → dependencies) plus its inversion (table →
/// streams). The reverse index is rebuilt incrementally on register/
/// unregister so `get_affected_streams` is a single map lookup.
#[derive(Default)]
pub struct DependencyTracker {
    forward: HashMap<String, Vec<StreamDependency>>,
    reverse: HashMap<String, HashSet<String>>,
}

impl DependencyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, stream_id: impl Into<String>, spec: RegistrationSpec, schema: &Schema) {
        let stream_id = stream_id.into();
        let mut deps = match spec {
            RegistrationSpec::Structured(q) => vec![classify_structured(&stream_id, q)],
            RegistrationSpec::RawSql(sql) => classify_raw_sql(&stream_id, &sql),
        };

        for dep in &mut deps {
            dep.related_tables = schema
                .relationships_touching(&dep.table)
                .flat_map(|r| {
                    let mut tables = vec![r.parent_table.clone(), r.child_table.clone()];
                    if let Some(j) = &r.junction_table {
                        tables.push(j.clone());
                    }
                    tables
                })
                .filter(|t| t != &dep.table)
                .collect();
        }

        for dep in &deps {
            self.reverse
                .entry(dep.table.clone())
                .or_default()
                .insert(stream_id.clone());
            for related in &dep.related_tables {
                self.reverse
                    .entry(related.clone())
                    .or_default()
                    .insert(stream_id.clone());
            }
        }
        self.forward.insert(stream_id, deps);
    }

    /// Removes all of a stream's forward/reverse entries, garbage
    /// collecting any table bucket left empty.
    pub fn unregister(&mut self, stream_id: &str) {
        if let Some(deps) = self.forward.remove(stream_id) {
            let mut touched_tables: HashSet<String> = HashSet::new();
            for dep in &deps {
                touched_tables.insert(dep.table.clone());
                touched_tables.extend(dep.related_tables.iter().cloned());
            }
            for table in touched_tables {
                if let Some(streams) = self.reverse.get_mut(&table) {
                    streams.remove(stream_id);
                    if streams.is_empty() {
                        self.reverse.remove(&table);
                    }
                }
            }
        }
    }

    /// Fan-out: every stream whose output *might* have changed. Over-
    /// approximation is acceptable; under-approximation is forbidden.
    pub fn get_affected_streams(&self, change: &DatabaseChange) -> HashSet<String> {
        let mut affected = HashSet::new();
        let Some(candidates) = self.reverse.get(&change.table) else {
            return affected;
        };

        for stream_id in candidates {
            let Some(deps) = self.forward.get(stream_id) else {
                continue;
            };
            if deps.iter().any(|dep| dependency_matches(dep, change)) {
                affected.insert(stream_id.clone());
            }
        }
        affected
    }

    pub fn stats(&self) -> DependencyStats {
        let mut counts_per_kind = HashMap::new();
        let mut total_dependencies = 0usize;
        for deps in self.forward.values() {
            for dep in deps {
                total_dependencies += 1;
                *counts_per_kind.entry(dep.kind.as_str()).or_insert(0) += 1;
            }
        }
        DependencyStats {
            total_streams: self.forward.len(),
            total_dependencies,
            counts_per_kind,
            tables_with_dependents: self.reverse.len(),
        }
    }
}

fn classify_structured(stream_id: &str, spec: QuerySpec) -> StreamDependency {
    let kind = if spec.where_clause.is_some() {
        DependencyKind::WhereClause
    } else if spec.columns.is_some() {
        DependencyKind::ColumnWise
    } else {
        DependencyKind::WholeTable
    };
    StreamDependency {
        stream_id: stream_id.to_string(),
        table: spec.table,
        kind,
        columns: spec.columns,
        where_clause: spec.where_clause,
        where_args: spec.where_args,
        related_tables: HashSet::new(),
    }
}

/// Pattern-scans a raw SQL string per the rules in spec.md §4.5b. This is
/// deliberately approximate: it never attempts a real parse, only enough
/// to err toward over-invalidation.
fn classify_raw_sql(stream_id: &str, sql: &str) -> Vec<StreamDependency> {
    let upper = sql.to_uppercase();
    let tables = scan_tables(&upper);
    let columns = scan_select_columns(sql, &upper);

    let kind = if upper.contains("WHERE") {
        DependencyKind::WhereClause
    } else if columns.is_some() {
        DependencyKind::ColumnWise
    } else if upper.contains("JOIN") {
        DependencyKind::RelatedTable
    } else {
        DependencyKind::WholeTable
    };

    if tables.is_empty() {
        return Vec::new();
    }

    tables
        .into_iter()
        .map(|table| StreamDependency {
            stream_id: stream_id.to_string(),
            table,
            kind,
            columns: columns.clone(),
            where_clause: if kind == DependencyKind::WhereClause {
                Some(sql.to_string())
            } else {
                None
            },
            where_args: None,
            related_tables: HashSet::new(),
        })
        .collect()
}

fn scan_tables(upper_sql: &str) -> Vec<String> {
    let mut tables = Vec::new();
    for keyword in ["FROM", "JOIN"] {
        let mut rest = upper_sql;
        while let Some(pos) = rest.find(keyword) {
            let after = &rest[pos + keyword.len()..];
            if let Some(name) = after.split_whitespace().next() {
                let cleaned: String = name.chars().take_while(|c| c.is_alphanumeric() || *c == '_').collect();
                if !cleaned.is_empty() && !tables.contains(&cleaned) {
                    tables.push(cleaned);
                }
            }
            rest = after;
        }
    }
    tables
}

fn scan_select_columns(original_sql: &str, upper_sql: &str) -> Option<HashSet<String>> {
    let select_pos = upper_sql.find("SELECT")?;
    let from_pos = upper_sql.find("FROM")?;
    if from_pos <= select_pos {
        return None;
    }
    let list = &original_sql[select_pos + "SELECT".len()..from_pos];
    let trimmed = list.trim();
    if trimmed == "*" {
        return None;
    }
    let columns: HashSet<String> = trimmed
        .split(',')
        .map(|c| c.trim().rsplit('.').next().unwrap_or(c.trim()).to_string())
        .filter(|c| !c.is_empty())
        .collect();
    Some(columns)
}

fn dependency_matches(dep: &StreamDependency, change: &DatabaseChange) -> bool {
    if dep.related_tables.contains(&change.table) {
        return true;
    }
    if dep.table != change.table {
        return false;
    }
    match dep.kind {
        DependencyKind::WholeTable | DependencyKind::RelatedTable => true,
        DependencyKind::ColumnWise => {
            let Some(cols) = &dep.columns else { return true };
            !cols.is_disjoint(&change.affected_columns)
        }
        DependencyKind::WhereClause => where_clause_might_match(dep, change),
    }
}

/// Conservative by default: assume match. Refined only for the single case
/// spec.md §4.5 allows — a bare equality clause `column = ?` / `column =
/// <literal>`. A row can leave or enter a stream's result set, so this must
/// check both the pre- and post-change value: the stream is unaffected only
/// when we're certain the row matched the clause *neither* before nor after.
/// Either snapshot being unknown, or either one matching, means invalidate.
fn where_clause_might_match(dep: &StreamDependency, change: &DatabaseChange) -> bool {
    let Some(clause) = &dep.where_clause else { return true };
    let Some((column, expected)) = parse_simple_equality(clause, dep.where_args.as_deref()) else {
        return true;
    };

    let old_might_match = match change.operation {
        // No prior row exists to have matched.
        ChangeOperation::Insert | ChangeOperation::BulkInsert => false,
        _ => match &change.old_values {
            Some(old) => old.get(&column).map(|v| *v == expected).unwrap_or(true),
            None => true,
        },
    };
    let new_might_match = match change.operation {
        // No resulting row exists to match.
        ChangeOperation::Delete | ChangeOperation::BulkDelete => false,
        _ => match &change.new_values {
            Some(new) => new.get(&column).map(|v| *v == expected).unwrap_or(true),
            None => true,
        },
    };

    old_might_match || new_might_match
}

/// Recognizes exactly `col = ?` (paired with the dependency's single bound
/// arg) or `col = <literal>`. Anything else returns `None`, meaning "can't
/// refine, assume match".
fn parse_simple_equality(clause: &str, args: Option<&[Value]>) -> Option<(String, Value)> {
    let clause = clause.trim();
    if clause.to_uppercase().matches(" AND ").count() > 0 || clause.to_uppercase().matches(" OR ").count() > 0 {
        return None;
    }
    let (left, right) = clause.split_once('=')?;
    let column = left.trim().to_string();
    let right = right.trim();

    if right == "?" {
        let args = args?;
        if args.len() == 1 {
            return Some((column, args[0].clone()));
        }
        return None;
    }

    if let Ok(i) = right.parse::<i64>() {
        return Some((column, Value::Integer(i)));
    }
    if (right.starts_with('\'') && right.ends_with('\'')) || (right.starts_with('"') && right.ends_with('"')) {
        let inner = &right[1..right.len() - 1];
        return Some((column, Value::Text(inner.to_string())));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Relationship, Schema, Table};

    fn schema_with_relationship() -> Schema {
        let parents = Table::builder("parents").auto_increment_primary_key("id").build().unwrap();
        let children = Table::builder("children")
            .auto_increment_primary_key("id")
            .build()
            .unwrap();
        let rel = Relationship::one_to_many("parent_children", "parents", "id", "children", "parent_id");
        Schema::builder().table(parents).table(children).relationship(rel).build().unwrap()
    }

    #[test]
    fn whole_table_dependency_always_invalidates() {
        let schema = schema_with_relationship();
        let mut tracker = DependencyTracker::new();
        tracker.register("s1", RegistrationSpec::Structured(QuerySpec::new("parents")), &schema);

        let change = DatabaseChange::new("parents", ChangeOperation::Insert);
        assert!(tracker.get_affected_streams(&change).contains("s1"));
    }

    #[test]
    fn column_wise_dependency_ignores_disjoint_column_changes() {
        let schema = schema_with_relationship();
        let mut tracker = DependencyTracker::new();
        let spec = QuerySpec::new("parents").with_columns(HashSet::from(["name".to_string()]));
        tracker.register("s1", RegistrationSpec::Structured(spec), &schema);

        let change = DatabaseChange::new("parents", ChangeOperation::Update)
            .with_columns(HashSet::from(["other".to_string()]));
        assert!(!tracker.get_affected_streams(&change).contains("s1"));

        let matching = DatabaseChange::new("parents", ChangeOperation::Update)
            .with_columns(HashSet::from(["name".to_string()]));
        assert!(tracker.get_affected_streams(&matching).contains("s1"));
    }

    #[test]
    fn related_table_change_invalidates_dependent_stream() {
        let schema = schema_with_relationship();
        let mut tracker = DependencyTracker::new();
        tracker.register("s1", RegistrationSpec::Structured(QuerySpec::new("parents")), &schema);

        let change = DatabaseChange::new("children", ChangeOperation::Insert);
        assert!(tracker.get_affected_streams(&change).contains("s1"));
    }

    #[test]
    fn where_clause_refines_when_neither_old_nor_new_value_matches() {
        let schema = schema_with_relationship();
        let mut tracker = DependencyTracker::new();
        let spec = QuerySpec::new("parents").with_where("status = ?", vec![Value::Text("active".into())]);
        tracker.register("s1", RegistrationSpec::Structured(spec), &schema);

        let mut old_values = RowMap::new();
        old_values.insert("status".to_string(), Value::Text("archived".into()));
        let mut new_values = RowMap::new();
        new_values.insert("status".to_string(), Value::Text("closed".into()));
        let change = DatabaseChange::new("parents", ChangeOperation::Update)
            .with_old_values(old_values)
            .with_new_values(new_values);
        assert!(!tracker.get_affected_streams(&change).contains("s1"));
    }

    #[test]
    fn where_clause_invalidates_when_row_leaves_matching_set() {
        let schema = schema_with_relationship();
        let mut tracker = DependencyTracker::new();
        let spec = QuerySpec::new("parents").with_where("status = ?", vec![Value::Text("active".into())]);
        tracker.register("s1", RegistrationSpec::Structured(spec), &schema);

        let mut old_values = RowMap::new();
        old_values.insert("status".to_string(), Value::Text("active".into()));
        let mut new_values = RowMap::new();
        new_values.insert("status".to_string(), Value::Text("archived".into()));
        let change = DatabaseChange::new("parents", ChangeOperation::Update)
            .with_old_values(old_values)
            .with_new_values(new_values);
        assert!(tracker.get_affected_streams(&change).contains("s1"));
    }

    #[test]
    fn where_clause_invalidates_when_row_enters_matching_set() {
        let schema = schema_with_relationship();
        let mut tracker = DependencyTracker::new();
        let spec = QuerySpec::new("parents").with_where("status = ?", vec![Value::Text("active".into())]);
        tracker.register("s1", RegistrationSpec::Structured(spec), &schema);

        let mut old_values = RowMap::new();
        old_values.insert("status".to_string(), Value::Text("draft".into()));
        let mut new_values = RowMap::new();
        new_values.insert("status".to_string(), Value::Text("active".into()));
        let change = DatabaseChange::new("parents", ChangeOperation::Update)
            .with_old_values(old_values)
            .with_new_values(new_values);
        assert!(tracker.get_affected_streams(&change).contains("s1"));
    }

    #[test]
    fn where_clause_without_old_values_assumes_match_even_on_new_mismatch() {
        let schema = schema_with_relationship();
        let mut tracker = DependencyTracker::new();
        let spec = QuerySpec::new("parents").with_where("status = ?", vec![Value::Text("active".into())]);
        tracker.register("s1", RegistrationSpec::Structured(spec), &schema);

        // No old_values attached: the prior state is unknown, so even a
        // non-matching new value can't rule out the row having left the set.
        let mut new_values = RowMap::new();
        new_values.insert("status".to_string(), Value::Text("archived".into()));
        let change = DatabaseChange::new("parents", ChangeOperation::Update).with_new_values(new_values);
        assert!(tracker.get_affected_streams(&change).contains("s1"));
    }

    #[test]
    fn where_clause_without_new_values_assumes_match() {
        let schema = schema_with_relationship();
        let mut tracker = DependencyTracker::new();
        let spec = QuerySpec::new("parents").with_where("status = ?", vec![Value::Text("active".into())]);
        tracker.register("s1", RegistrationSpec::Structured(spec), &schema);

        let change = DatabaseChange::new("parents", ChangeOperation::Update);
        assert!(tracker.get_affected_streams(&change).contains("s1"));
    }

    #[test]
    fn unregister_cleans_up_empty_table_buckets() {
        let schema = schema_with_relationship();
        let mut tracker = DependencyTracker::new();
        tracker.register("s1", RegistrationSpec::Structured(QuerySpec::new("parents")), &schema);
        tracker.unregister("s1");
        let stats = tracker.stats();
        assert_eq!(stats.total_streams, 0);
        assert_eq!(stats.tables_with_dependents, 0);
    }

    #[test]
    fn raw_sql_with_join_is_conservative() {
        let schema = schema_with_relationship();
        let mut tracker = DependencyTracker::new();
        tracker.register(
            "s1",
            RegistrationSpec::RawSql("SELECT id FROM parents JOIN children ON children.parent_id = parents.id".to_string()),
            &schema,
        );
        let change = DatabaseChange::new("children", ChangeOperation::Insert);
        assert!(tracker.get_affected_streams(&change).contains("s1"));
    }
}
