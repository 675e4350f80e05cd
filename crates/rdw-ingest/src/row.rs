//! Typed rows as they travel from the decoder to the store

use chrono::{NaiveDate, NaiveDateTime};

/// One converted field
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Integer(i64),
    Decimal(f64),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
}

/// A fully converted record, one value per schema column in schema order
#[derive(Debug, Clone, PartialEq)]
pub struct TypedRow {
    record: u64,
    values: Vec<FieldValue>,
}

impl TypedRow {
    pub fn new(record: u64, values: Vec<FieldValue>) -> Self {
        Self { record, values }
    }

    /// 1-based record number in the source, header excluded
    pub fn record(&self) -> u64 {
        self.record
    }

    pub fn values(&self) -> &[FieldValue] {
        &self.values
    }

    pub fn get(&self, index: usize) -> Option<&FieldValue> {
        self.values.get(index)
    }

    /// First column as text. For the vehicle table this is the license plate.
    pub fn key(&self) -> Option<&str> {
        match self.values.first() {
            Some(FieldValue::Text(key)) => Some(key),
            _ => None,
        }
    }
}
