use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{RenderError, RenderResult};

/// Declared type of a result column, as reported by the query layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    String,
    Number,
    #[serde(rename = "int")]
    Integer,
    Float,
    Boolean,
    Date,
    Datetime,
    Timestamp,
    Array,
    Struct,
    Map,
    #[default]
    Unknown,
}

impl ColumnType {
    /// Infer a column type from a sample value.
    pub fn of(value: &Value) -> ColumnType {
        match value {
            Value::Null => ColumnType::Unknown,
            Value::Bool(_) => ColumnType::Boolean,
            Value::Number(n) => {
                if n.is_i64() || n.is_u64() {
                    ColumnType::Integer
                } else {
                    ColumnType::Float
                }
            }
            Value::String(_) => ColumnType::String,
            Value::Array(_) => ColumnType::Array,
            Value::Object(_) => ColumnType::Struct,
        }
    }
}

/// Metadata for a single result column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    #[serde(rename = "type", default)]
    pub column_type: ColumnType,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub description: Option<String>,
}

impl Column {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            description: None,
        }
    }
}

/// A tabular result set: ordered column metadata plus row values.
///
/// Rows are arbitrary JSON values (objects in practice; `null` rows are
/// tolerated everywhere). Template expressions address the row sequence
/// through the reserved name `data`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Results {
    #[serde(default)]
    pub columns: IndexMap<String, Column>,
    #[serde(default, alias = "data")]
    pub rows: Vec<Value>,
}

impl Results {
    pub fn new(columns: IndexMap<String, Column>, rows: Vec<Value>) -> Self {
        Self { columns, rows }
    }

    /// Build a result set from bare rows, inferring column metadata from the
    /// first object row.
    pub fn from_rows(rows: Vec<Value>) -> Self {
        let mut columns = IndexMap::new();
        if let Some(Value::Object(first)) = rows.first() {
            for (name, value) in first {
                columns.insert(
                    name.clone(),
                    Column::new(name.clone(), ColumnType::of(value)),
                );
            }
        }
        Self { columns, rows }
    }

    /// Ingest a `{"rows": [...]} `/`{"data": [...]}` payload with optional
    /// `"columns"` metadata.
    pub fn from_json(value: Value) -> RenderResult<Self> {
        if !value.is_object() {
            return Err(RenderError::InvalidResults(
                "expected a JSON object with a `rows` or `data` array".to_string(),
            ));
        }
        Ok(serde_json::from_value(value)?)
    }

    pub fn from_json_str(text: &str) -> RenderResult<Self> {
        Self::from_json(serde_json::from_str(text)?)
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.get(name)
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
