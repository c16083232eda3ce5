//! Table registry and the idempotent "create what is missing" pass.
//!
//! Models are declared elsewhere and registered into a [`Metadata`]. The
//! storage layer only knows how to make sure their tables exist; it never
//! alters or drops anything.

use rusqlite::Connection;

use crate::error::DbError;

/// A table as declared by a model: its name and column list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableDef {
    name: &'static str,
    columns: &'static str,
}

impl TableDef {
    /// `columns` is the body of the `CREATE TABLE` statement, without the
    /// surrounding parentheses.
    pub const fn new(name: &'static str, columns: &'static str) -> Self {
        Self { name, columns }
    }

    /// Table name as written in the DDL.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Column list, the body of the `CREATE TABLE` statement.
    pub fn columns(&self) -> &'static str {
        self.columns
    }

    fn create_sql(&self) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS \"{}\" ({})",
            self.name, self.columns
        )
    }
}

/// A type persisted in its own table.
pub trait Model {
    /// The table backing this model.
    const TABLE: TableDef;
}

/// Every table known to the application.
#[derive(Debug, Clone, Default)]
pub struct Metadata {
    tables: Vec<TableDef>,
}

impl Metadata {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a table definition.
    pub fn table(mut self, def: TableDef) -> Self {
        self.tables.push(def);
        self
    }

    /// Registers the table backing `M`.
    pub fn model<M: Model>(self) -> Self {
        self.table(M::TABLE)
    }

    /// Appends all tables from `other`.
    pub fn merge(mut self, other: Metadata) -> Self {
        self.tables.extend(other.tables);
        self
    }

    /// Tables in registration order, duplicates included.
    pub fn tables(&self) -> &[TableDef] {
        &self.tables
    }

    /// Whether no table has been registered.
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Registration order with identical duplicates collapsed.
    fn resolved(&self) -> Result<Vec<TableDef>, DbError> {
        let mut out: Vec<TableDef> = Vec::with_capacity(self.tables.len());
        for def in &self.tables {
            match out
                .iter()
                .find(|seen| seen.name.eq_ignore_ascii_case(def.name))
            {
                Some(seen) if seen == def => {}
                Some(_) => return Err(DbError::ConflictingTable(def.name.to_string())),
                None => out.push(*def),
            }
        }
        Ok(out)
    }
}

/// Creates the missing tables of `metadata` in a single transaction.
///
/// Returns how many tables were created.
pub(crate) fn create_all(conn: &Connection, metadata: &Metadata) -> Result<usize, DbError> {
    let tables = metadata.resolved()?;

    let tx = conn.unchecked_transaction()?;
    let mut created = 0;

    for def in &tables {
        let exists: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1 COLLATE NOCASE)",
            [def.name],
            |row| row.get(0),
        )?;

        if exists {
            tracing::debug!(table = def.name, "table already exists, skipping");
            continue;
        }

        tx.execute_batch(&def.create_sql())
            .map_err(|e| DbError::Schema {
                table: def.name.to_string(),
                source: e,
            })?;

        tracing::info!(table = def.name, "created table");
        created += 1;
    }

    tx.commit()?;
    Ok(created)
}
