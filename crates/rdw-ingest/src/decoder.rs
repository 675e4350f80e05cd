//! Record decoder: positional raw fields to a typed row

use std::sync::Arc;

use crate::convert::{self, ConversionError, FieldAt};
use crate::error::{IngestError, IngestResult};
use crate::row::{FieldValue, TypedRow};
use crate::schema::{ColumnKind, ColumnSpec, TableSchema};
use crate::source::RawRecord;

/// Converts raw records using a fixed column mapping.
///
/// A record shorter than the mapping is rejected outright; missing columns are
/// never padded. Extra trailing columns are ignored.
#[derive(Debug, Clone)]
pub struct RecordDecoder {
    schema: Arc<TableSchema>,
    width: usize,
}

impl RecordDecoder {
    pub fn new(schema: Arc<TableSchema>) -> Self {
        let width = schema.width();
        Self { schema, width }
    }

    pub fn decode(&self, record: &RawRecord) -> IngestResult<TypedRow> {
        if record.len() < self.width {
            return Err(IngestError::ShortRecord {
                record: record.number(),
                expected: self.width,
                actual: record.len(),
            });
        }

        let values = self
            .schema
            .columns
            .iter()
            .map(|column| {
                let raw = record.get(column.position).unwrap_or_default();
                convert_field(column, raw, record.number())
            })
            .collect::<IngestResult<Vec<_>>>()?;

        Ok(TypedRow::new(record.number(), values))
    }
}

fn convert_field(column: &ColumnSpec, raw: &str, record: u64) -> IngestResult<FieldValue> {
    let text = match (&column.default, raw.is_empty()) {
        (Some(default), true) => default.as_str(),
        _ => raw,
    };
    let at = Some(FieldAt {
        record,
        column: &column.name,
    });

    let value = match column.kind {
        ColumnKind::Text => FieldValue::Text(text.to_string()),
        ColumnKind::Integer => FieldValue::Integer(convert::integer(text, at)),
        ColumnKind::Decimal => FieldValue::Decimal(convert::decimal(text, at)),
        ColumnKind::DecimalInteger => FieldValue::Integer(convert::decimal_integer(text, at)),
        ColumnKind::CompactDate => FieldValue::Date(
            convert::parse_compact_date(text).map_err(|e| located(e, column, record))?,
        ),
        ColumnKind::Timestamp => FieldValue::Timestamp(
            convert::parse_timestamp(text).map_err(|e| located(e, column, record))?,
        ),
    };

    Ok(value)
}

fn located(err: ConversionError, column: &ColumnSpec, record: u64) -> IngestError {
    let column = column.name.clone();
    match err {
        ConversionError::Date(value) => IngestError::MalformedDate {
            record,
            column,
            value,
        },
        ConversionError::Timestamp(value) => IngestError::MalformedTimestamp {
            record,
            column,
            value,
        },
    }
}
