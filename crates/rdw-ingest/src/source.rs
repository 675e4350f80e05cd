//! Sequential record source over a delimited text file

use std::path::Path;

use csv_async::{AsyncReader, AsyncReaderBuilder, StringRecord};
use tokio::io::AsyncRead;
use tracing::debug;

use crate::config::SourceConfig;
use crate::error::{IngestError, IngestResult};

/// One source line split into positional fields
#[derive(Debug, Clone)]
pub struct RawRecord {
    number: u64,
    fields: StringRecord,
}

impl RawRecord {
    pub fn new<I, T>(number: u64, fields: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        let mut record = StringRecord::new();
        for field in fields {
            record.push_field(field.as_ref());
        }
        Self {
            number,
            fields: record,
        }
    }

    /// 1-based record number, header excluded
    pub fn number(&self) -> u64 {
        self.number
    }

    pub fn get(&self, position: usize) -> Option<&str> {
        self.fields.get(position)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Reads records one at a time. End of stream is `Ok(None)`; a broken record
/// or I/O failure is an error.
pub struct CsvSource<R> {
    reader: AsyncReader<R>,
    records_read: u64,
}

impl CsvSource<tokio::fs::File> {
    /// Open the configured file and skip its header line if asked to
    pub async fn open(config: &SourceConfig) -> IngestResult<Self> {
        let file = open_file(&config.path).await?;
        let mut source = Self::from_reader(file, config.delimiter);
        if config.skip_header {
            source.skip_header().await?;
        }
        Ok(source)
    }
}

impl<R> CsvSource<R>
where
    R: AsyncRead + Unpin + Send,
{
    /// Wrap any async reader. Records may have differing field counts; the
    /// decoder decides whether a record is usable.
    pub fn from_reader(reader: R, delimiter: u8) -> Self {
        let reader = AsyncReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .delimiter(delimiter)
            .create_reader(reader);

        Self {
            reader,
            records_read: 0,
        }
    }

    /// Read and discard one line. Returns `false` if the source was empty.
    pub async fn skip_header(&mut self) -> IngestResult<bool> {
        let mut header = StringRecord::new();
        let found = self
            .reader
            .read_record(&mut header)
            .await
            .map_err(|source| IngestError::SourceRead { record: 0, source })?;

        if found {
            debug!(columns = header.len(), "Skipped header line");
        }
        Ok(found)
    }

    pub async fn next_record(&mut self) -> IngestResult<Option<RawRecord>> {
        let number = self.records_read + 1;
        let mut fields = StringRecord::new();

        let found = self
            .reader
            .read_record(&mut fields)
            .await
            .map_err(|source| IngestError::SourceRead {
                record: number,
                source,
            })?;

        if !found {
            return Ok(None);
        }

        self.records_read = number;
        Ok(Some(RawRecord { number, fields }))
    }

    pub fn records_read(&self) -> u64 {
        self.records_read
    }
}

async fn open_file(path: &Path) -> IngestResult<tokio::fs::File> {
    tokio::fs::File::open(path)
        .await
        .map_err(|source| IngestError::SourceOpen {
            path: path.display().to_string(),
            source,
        })
}
