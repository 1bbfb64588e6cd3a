#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationshipKind {
    OneToMany,
    ManyToMany,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CascadeAction {
    Cascade,
    Restrict,
    SetNull,
}

#[derive(Debug, Clone)]
pub struct Relationship {
    pub name: String,
    pub kind: RelationshipKind,
    pub parent_table: String,
    pub parent_column: String,
    pub child_table: String,
    pub child_column: String,
    pub junction_table: Option<String>,
    pub junction_parent_column: Option<String>,
    pub junction_child_column: Option<String>,
    pub on_delete: CascadeAction,
}

impl Relationship {
    pub fn one_to_many(
        name: impl Into<String>,
        parent_table: impl Into<String>,
        parent_column: impl Into<String>,
        child_table: impl Into<String>,
        child_column: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: RelationshipKind::OneToMany,
            parent_table: parent_table.into(),
            parent_column: parent_column.into(),
            child_table: child_table.into(),
            child_column: child_column.into(),
            junction_table: None,
            junction_parent_column: None,
            junction_child_column: None,
            on_delete: CascadeAction::Restrict,
        }
    }

    pub fn many_to_many(
        name: impl Into<String>,
        parent_table: impl Into<String>,
        parent_column: impl Into<String>,
        child_table: impl Into<String>,
        child_column: impl Into<String>,
        junction_table: impl Into<String>,
        junction_parent_column: impl Into<String>,
        junction_child_column: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: RelationshipKind::ManyToMany,
            parent_table: parent_table.into(),
            parent_column: parent_column.into(),
            child_table: child_table.into(),
            child_column: child_column.into(),
            junction_table: Some(junction_table.into()),
            junction_parent_column: Some(junction_parent_column.into()),
            junction_child_column: Some(junction_child_column.into()),
            on_delete: CascadeAction::Restrict,
        }
    }

    pub fn on_delete(mut self, action: CascadeAction) -> Self {
        self.on_delete = action;
        self
    }

    /// All tables a mutation to either endpoint should be considered
    /// related to, for the dependency tracker's `related-table` kind.
    pub fn related_tables(&self) -> Vec<&str> {
        let mut tables = vec![self.parent_table.as_str(), self.child_table.as_str()];
        if let Some(j) = &self.junction_table {
            tables.push(j.as_str());
        }
        tables
    }
}
