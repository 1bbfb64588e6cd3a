use crate::errors::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone)]
pub struct JoinClause {
    pub table: String,
    pub on: String,
}

/// A structured `SELECT` description, used when a view is built from parts
/// rather than handed as an opaque SQL string.
#[derive(Debug, Clone, Default)]
pub struct SelectView {
    pub columns: Vec<String>,
    pub from: String,
    pub joins: Vec<JoinClause>,
    pub where_clause: Option<String>,
    pub group_by: Vec<String>,
    pub having: Option<String>,
    pub order_by: Vec<(String, OrderDirection)>,
    pub limit: Option<i64>,
}

#[derive(Debug, Clone)]
pub enum ViewBody {
    Structured(SelectView),
    Opaque(String),
}

#[derive(Debug, Clone)]
pub struct View {
    pub name: String,
    pub body: ViewBody,
}

impl View {
    pub fn opaque(name: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            body: ViewBody::Opaque(sql.into()),
        }
    }

    pub fn structured(name: impl Into<String>, select: SelectView) -> Self {
        Self {
            name: name.into(),
            body: ViewBody::Structured(select),
        }
    }

    pub fn create_view_sql(&self) -> AppResult<String> {
        match &self.body {
            ViewBody::Opaque(sql) => {
                Ok(format!("CREATE VIEW IF NOT EXISTS {} AS {}", self.name, sql))
            }
            ViewBody::Structured(select) => Ok(format!(
                "CREATE VIEW IF NOT EXISTS {} AS {}",
                self.name,
                select.to_sql()?
            )),
        }
    }
}

impl SelectView {
    pub fn to_sql(&self) -> AppResult<String> {
        if self.columns.is_empty() {
            return Err(AppError::state(
                "empty SELECT: SelectView has no columns",
            ));
        }
        if self.from.is_empty() {
            return Err(AppError::state(
                "empty SELECT: SelectView has no FROM table",
            ));
        }
        let columns = self.columns.join(", ");
        let mut sql = format!("SELECT {} FROM {}", columns, self.from);
        for join in &self.joins {
            sql.push_str(&format!(" JOIN {} ON {}", join.table, join.on));
        }
        if let Some(w) = &self.where_clause {
            sql.push_str(&format!(" WHERE {}", w));
        }
        if !self.group_by.is_empty() {
            sql.push_str(&format!(" GROUP BY {}", self.group_by.join(", ")));
        }
        if let Some(h) = &self.having {
            sql.push_str(&format!(" HAVING {}", h));
        }
        if !self.order_by.is_empty() {
            let parts: Vec<String> = self
                .order_by
                .iter()
                .map(|(col, dir)| {
                    format!(
                        "{} {}",
                        col,
                        match dir {
                            OrderDirection::Asc => "ASC",
                            OrderDirection::Desc => "DESC",
                        }
                    )
                })
                .collect();
            sql.push_str(&format!(" ORDER BY {}", parts.join(", ")));
        }
        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }
        Ok(sql)
    }
}
