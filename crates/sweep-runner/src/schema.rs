use serde::Deserialize;
use std::collections::BTreeSet;

use crate::error::{IngestError, IngestResult};
use crate::parser::FILE_COLUMN;
use crate::store::quote_ident;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "(String, String)")]
pub struct ColumnDef {
    pub name: String,
    pub sql_type: String,
}

impl From<(String, String)> for ColumnDef {
    fn from((name, sql_type): (String, String)) -> Self {
        Self { name, sql_type }
    }
}

/// Declared layout of the tuple rows a task prints after its header line.
///
/// Column order must match the order of values in each emitted tuple. The
/// primary key is a raw SQL key expression over the declared columns and
/// `file`, e.g. `"file, step"`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TabularSchema {
    pub columns: Vec<ColumnDef>,
    pub primary_key: String,
    /// Reject rows whose tuple length differs from the declared column count
    /// instead of truncating or leaving the missing columns out.
    #[serde(default)]
    pub strict_arity: bool,
}

impl TabularSchema {
    pub fn new<N, T>(columns: impl IntoIterator<Item = (N, T)>, primary_key: impl Into<String>) -> Self
    where
        N: Into<String>,
        T: Into<String>,
    {
        Self {
            columns: columns
                .into_iter()
                .map(|(name, sql_type)| ColumnDef {
                    name: name.into(),
                    sql_type: sql_type.into(),
                })
                .collect(),
            primary_key: primary_key.into(),
            strict_arity: false,
        }
    }

    pub fn with_strict_arity(mut self, strict: bool) -> Self {
        self.strict_arity = strict;
        self
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn table_columns(&self) -> Vec<String> {
        self.column_names()
            .map(str::to_string)
            .chain(std::iter::once(FILE_COLUMN.to_string()))
            .collect()
    }

    pub fn validate(&self) -> IngestResult<()> {
        if self.columns.is_empty() {
            return Err(IngestError::InvalidSchema(
                "at least one column must be declared".to_string(),
            ));
        }
        let mut seen = BTreeSet::new();
        for col in &self.columns {
            let name = col.name.trim();
            if name.is_empty() {
                return Err(IngestError::InvalidSchema("column name cannot be empty".to_string()));
            }
            if name == FILE_COLUMN {
                return Err(IngestError::InvalidSchema(format!(
                    "column '{}' is reserved for the output file id",
                    FILE_COLUMN
                )));
            }
            if col.sql_type.trim().is_empty() {
                return Err(IngestError::InvalidSchema(format!(
                    "column '{}' has no type",
                    name
                )));
            }
            if !seen.insert(name) {
                return Err(IngestError::InvalidSchema(format!(
                    "column '{}' is declared twice",
                    name
                )));
            }
        }
        if self.primary_key.trim().is_empty() {
            return Err(IngestError::InvalidSchema("primary key cannot be empty".to_string()));
        }
        Ok(())
    }

    pub(crate) fn create_table_sql(&self, table: &str) -> String {
        let mut defs: Vec<String> = self
            .columns
            .iter()
            .map(|c| format!("{} {}", quote_ident(&c.name), c.sql_type.trim()))
            .collect();
        defs.push(format!("{} integer", quote_ident(FILE_COLUMN)));
        format!(
            "CREATE TABLE {} ({}, PRIMARY KEY({}))",
            quote_ident(table),
            defs.join(", "),
            self.primary_key.trim()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> TabularSchema {
        TabularSchema::new([("step", "integer"), ("loss", "real")], "file, step")
    }

    #[test]
    fn create_table_appends_file_and_key() {
        assert_eq!(
            schema().create_table_sql("data"),
            r#"CREATE TABLE "data" ("step" integer, "loss" real, "file" integer, PRIMARY KEY(file, step))"#
        );
        assert_eq!(schema().table_columns(), vec!["step", "loss", "file"]);
    }

    #[test]
    fn validate_rejects_bad_declarations() {
        schema().validate().expect("valid schema");

        let reserved = TabularSchema::new([("file", "integer")], "file");
        assert!(matches!(reserved.validate(), Err(IngestError::InvalidSchema(_))));

        let dup = TabularSchema::new([("a", "integer"), ("a", "real")], "a");
        let err = dup.validate().expect_err("duplicate column");
        assert!(err.to_string().contains("declared twice"), "{}", err);

        let no_key = TabularSchema::new([("a", "integer")], "  ");
        assert!(no_key.validate().is_err());

        let empty: TabularSchema = TabularSchema::new(Vec::<(String, String)>::new(), "file");
        assert!(empty.validate().is_err());
    }

    #[test]
    fn deserializes_from_pairs() {
        let schema: TabularSchema = serde_yaml::from_str(
            "columns: [[step, integer], [loss, real]]\nprimary_key: file, step\n",
        )
        .expect("yaml");
        assert_eq!(schema.columns[1].name, "loss");
        assert_eq!(schema.columns[1].sql_type, "real");
        assert!(!schema.strict_arity);
    }
}
