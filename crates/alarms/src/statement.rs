//! Positional, parameterized statements.
//!
//! Values only ever reach the database through [`StatementBuilder::push_bind`],
//! which writes the dialect's next placeholder into the text and records the
//! value in the argument list.  The Nth placeholder always pairs with the Nth
//! argument, including placeholders nested inside sub-selects.

/// SQL flavour the statement is rendered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// Numbered placeholders: `$1, $2, …`.
    Postgres,
    /// Anonymous placeholders: `?`.
    Sqlite,
}

impl Dialect {
    /// Aggregate that flattens a dimension set into `name=value,name=value`.
    ///
    /// Neither aggregate carries an `ORDER BY`: pairs come out in the storage
    /// engine's scan order of `metric_dimension`, which is insertion order for
    /// SQLite and usually (not guaranteed) so for Postgres.  Consumers that
    /// need a stable view should parse the string into a map, as
    /// [`crate::models::parse_flattened_dimensions`] does.
    pub fn dimension_concat(&self) -> &'static str {
        match self {
            Self::Postgres => "string_agg(name || '=' || value, ',')",
            Self::Sqlite => "group_concat(name || '=' || value, ',')",
        }
    }

    fn write_placeholder(&self, sql: &mut String, index: usize) {
        match self {
            Self::Postgres => sql.push_str(&format!("${index}")),
            Self::Sqlite => sql.push('?'),
        }
    }
}

/// A finished statement: SQL text plus its ordered arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub sql: String,
    pub args: Vec<String>,
}

/// Incrementally builds a [`Statement`].
#[derive(Debug)]
pub struct StatementBuilder {
    dialect: Dialect,
    sql: String,
    args: Vec<String>,
}

impl StatementBuilder {
    pub fn new(dialect: Dialect, init: impl Into<String>) -> Self {
        Self {
            dialect,
            sql: init.into(),
            args: Vec::new(),
        }
    }

    /// Append trusted SQL text.
    pub fn push(&mut self, sql: &str) -> &mut Self {
        self.sql.push_str(sql);
        self
    }

    /// Append a placeholder bound to `value`.
    pub fn push_bind(&mut self, value: impl Into<String>) -> &mut Self {
        self.args.push(value.into());
        self.dialect.write_placeholder(&mut self.sql, self.args.len());
        self
    }

    pub fn build(self) -> Statement {
        Statement {
            sql: self.sql,
            args: self.args,
        }
    }
}
