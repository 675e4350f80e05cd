//! Column mapping between the source file and the target table
//!
//! A [`TableSchema`] says which 0-based source position feeds which table
//! column and how its text is converted. One schema drives the decoder and
//! the insert statement, so their column orders always agree.
//!
//! Schemas can be loaded from TOML:
//!
//! ```toml
//! table = "voertuigen"
//!
//! [[columns]]
//! name = "kenteken"
//! position = 0
//! kind = "text"
//!
//! [[columns]]
//! name = "vervaldatum_apk"
//! position = 4
//! kind = "compact_date"
//! ```
//!
//! Expected column types in the table: `text` -> TEXT/VARCHAR, `integer` and
//! `decimal_integer` -> INTEGER/BIGINT, `decimal` -> REAL/DOUBLE PRECISION/NUMERIC,
//! `compact_date` -> DATE, `timestamp` -> TIMESTAMP.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::convert;
use crate::error::{IngestError, IngestResult};

/// How the text of a column is converted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
    Text,
    Integer,
    Decimal,
    DecimalInteger,
    CompactDate,
    Timestamp,
}

/// One mapped column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    pub position: usize,
    pub kind: ColumnKind,
    /// Text converted in place of an empty source field
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, position: usize, kind: ColumnKind) -> Self {
        Self {
            name: name.into(),
            position,
            kind,
            default: None,
        }
    }

    pub fn with_default(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }
}

/// Target table plus its column mapping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub table: String,
    pub columns: Vec<ColumnSpec>,
}

impl TableSchema {
    /// Build and validate a schema
    pub fn new(table: impl Into<String>, columns: Vec<ColumnSpec>) -> IngestResult<Self> {
        let schema = Self {
            table: table.into(),
            columns,
        };
        schema.validate()?;
        Ok(schema)
    }

    /// The `voertuigen` mapping of the RDW "Gekentekende voertuigen" export
    pub fn voertuigen() -> Self {
        use ColumnKind::*;

        Self {
            table: "voertuigen".to_string(),
            columns: vec![
                ColumnSpec::new("kenteken", 0, Text),
                ColumnSpec::new("voertuigsoort", 1, Text),
                ColumnSpec::new("merk", 2, Text),
                ColumnSpec::new("handelsbenaming", 3, Text),
                ColumnSpec::new("vervaldatum_apk", 4, CompactDate),
                ColumnSpec::new("datum_tenaamstelling", 5, CompactDate),
                ColumnSpec::new("bruto_bpm", 6, Decimal),
                ColumnSpec::new("inrichting", 7, Text),
                ColumnSpec::new("aantal_zitplaatsen", 8, Integer),
                ColumnSpec::new("eerste_kleur", 9, Text),
                ColumnSpec::new("tweede_kleur", 10, Text),
            ],
        }
    }

    pub fn from_toml_str(text: &str) -> IngestResult<Self> {
        let schema: Self =
            toml::from_str(text).map_err(|e| IngestError::Schema(e.to_string()))?;
        schema.validate()?;
        Ok(schema)
    }

    pub async fn load(path: impl AsRef<Path>) -> IngestResult<Self> {
        let path = path.as_ref();
        let text = tokio::fs::read_to_string(path).await.map_err(|e| {
            IngestError::Schema(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&text)
    }

    /// Minimum number of source columns a record needs
    pub fn width(&self) -> usize {
        self.columns
            .iter()
            .map(|c| c.position + 1)
            .max()
            .unwrap_or(0)
    }

    pub fn validate(&self) -> IngestResult<()> {
        if !self.table.split('.').all(is_identifier) {
            return Err(IngestError::Schema(format!(
                "table name '{}' is not a plain SQL identifier",
                self.table
            )));
        }
        if self.columns.is_empty() {
            return Err(IngestError::Schema(format!(
                "table '{}' has no columns",
                self.table
            )));
        }

        let mut names = HashSet::new();
        for column in &self.columns {
            if !is_identifier(&column.name) {
                return Err(IngestError::Schema(format!(
                    "column name '{}' is not a plain SQL identifier",
                    column.name
                )));
            }
            if !names.insert(column.name.to_lowercase()) {
                return Err(IngestError::Schema(format!(
                    "column '{}' is mapped twice",
                    column.name
                )));
            }
            if let Some(default) = &column.default {
                check_default(column, default)?;
            }
        }

        Ok(())
    }

    pub fn insert_statement(&self) -> InsertStatement {
        InsertStatement::for_schema(self)
    }
}

/// Parameterized insert built from a schema, shared by every commit task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertStatement {
    sql: String,
    parameters: usize,
}

impl InsertStatement {
    pub fn for_schema(schema: &TableSchema) -> Self {
        let names: Vec<&str> = schema.columns.iter().map(|c| c.name.as_str()).collect();
        let placeholders: Vec<String> = (1..=names.len()).map(|i| format!("${i}")).collect();

        Self {
            sql: format!(
                "INSERT INTO {} ({}) VALUES ({})",
                schema.table,
                names.join(", "),
                placeholders.join(", ")
            ),
            parameters: names.len(),
        }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn parameters(&self) -> usize {
        self.parameters
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

fn check_default(column: &ColumnSpec, default: &str) -> IngestResult<()> {
    let valid = match column.kind {
        ColumnKind::Text => true,
        ColumnKind::Integer => default.parse::<i64>().is_ok(),
        ColumnKind::Decimal | ColumnKind::DecimalInteger => default.parse::<f64>().is_ok(),
        ColumnKind::CompactDate => convert::parse_compact_date(default).is_ok(),
        ColumnKind::Timestamp => convert::parse_timestamp(default).is_ok(),
    };

    if valid {
        Ok(())
    } else {
        Err(IngestError::Schema(format!(
            "default '{}' of column '{}' does not parse as {:?}",
            default, column.name, column.kind
        )))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_voertuigen_schema() {
        let schema = TableSchema::voertuigen();
        schema.validate().unwrap();
        assert_eq!(schema.width(), 11);
        assert_eq!(schema.columns.len(), 11);
    }

    #[test]
    fn test_insert_statement_follows_column_order() {
        let statement = TableSchema::voertuigen().insert_statement();
        assert_eq!(
            statement.sql(),
            "INSERT INTO voertuigen (kenteken, voertuigsoort, merk, handelsbenaming, \
             vervaldatum_apk, datum_tenaamstelling, bruto_bpm, inrichting, \
             aantal_zitplaatsen, eerste_kleur, tweede_kleur) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)"
        );
        assert_eq!(statement.parameters(), 11);
    }

    #[test]
    fn test_width_uses_highest_position() {
        let schema = TableSchema::new(
            "public.kentekens",
            vec![
                ColumnSpec::new("kenteken", 0, ColumnKind::Text),
                ColumnSpec::new("datum_eerste_toelating_dt", 63, ColumnKind::Timestamp),
            ],
        )
        .unwrap();
        assert_eq!(schema.width(), 64);
    }

    #[test]
    fn test_rejects_unsafe_identifiers() {
        let bad_table = TableSchema::new(
            "voertuigen; DROP TABLE voertuigen",
            vec![ColumnSpec::new("kenteken", 0, ColumnKind::Text)],
        );
        assert!(matches!(bad_table, Err(IngestError::Schema(_))));

        let bad_column = TableSchema::new(
            "voertuigen",
            vec![ColumnSpec::new("merk\"", 0, ColumnKind::Text)],
        );
        assert!(bad_column.is_err());
    }

    #[test]
    fn test_rejects_duplicates_and_empty() {
        assert!(TableSchema::new("voertuigen", vec![]).is_err());

        let duplicate = TableSchema::new(
            "voertuigen",
            vec![
                ColumnSpec::new("merk", 2, ColumnKind::Text),
                ColumnSpec::new("MERK", 3, ColumnKind::Text),
            ],
        );
        assert!(duplicate.is_err());
    }

    #[test]
    fn test_rejects_bad_default() {
        let schema = TableSchema::new(
            "voertuigen",
            vec![
                ColumnSpec::new("vervaldatum_apk", 4, ColumnKind::CompactDate)
                    .with_default("soon"),
            ],
        );
        assert!(schema.is_err());
    }

    #[test]
    fn test_from_toml() {
        let schema = TableSchema::from_toml_str(
            r#"
            table = "voertuigen"

            [[columns]]
            name = "kenteken"
            position = 0
            kind = "text"

            [[columns]]
            name = "catalogusprijs"
            position = 21
            kind = "decimal_integer"
            default = "0"
            "#,
        )
        .unwrap();

        assert_eq!(schema.width(), 22);
        assert_eq!(schema.columns[1].kind, ColumnKind::DecimalInteger);
        assert_eq!(schema.columns[1].default.as_deref(), Some("0"));
    }

    #[test]
    fn test_bundled_schema_file_matches_builtin() {
        let bundled = include_str!("../../../schemas/voertuigen.toml");
        assert_eq!(
            TableSchema::from_toml_str(bundled).unwrap(),
            TableSchema::voertuigen()
        );
    }

    #[test]
    fn test_unknown_kind_is_schema_error() {
        let result = TableSchema::from_toml_str(
            r#"
            table = "voertuigen"
            [[columns]]
            name = "kenteken"
            position = 0
            kind = "blob"
            "#,
        );
        assert!(matches!(result, Err(IngestError::Schema(_))));
    }
}
