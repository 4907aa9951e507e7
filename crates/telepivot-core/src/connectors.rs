//! Connector trait and implementations
//!
//! Connectors move telemetry in and out of the pipeline: an input connector
//! yields collection messages, an output connector receives the exporter
//! projection of every surviving record.

use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Message from or to a connector
#[derive(Debug, Clone)]
pub struct Message {
    /// Message payload as JSON
    pub payload: Value,

    /// Message metadata
    pub metadata: MessageMetadata,
}

impl Message {
    /// A message without metadata
    pub fn new(payload: Value) -> Self {
        Self {
            payload,
            metadata: MessageMetadata::default(),
        }
    }
}

/// Message metadata
#[derive(Debug, Clone, Default)]
pub struct MessageMetadata {
    /// Source connector name
    pub source: Option<String>,

    /// Position of the message in its source (1-based)
    pub sequence: Option<usize>,
}

/// Trait for input connectors (sources)
#[async_trait]
pub trait InputConnector: Send + Sync {
    /// Pull the next message from the source
    async fn pull(&mut self) -> Result<Option<Message>>;

    /// Acknowledge a message was processed successfully
    async fn ack(&mut self, metadata: &MessageMetadata) -> Result<()>;

    /// Negative acknowledgment - message processing failed
    async fn nack(&mut self, metadata: &MessageMetadata) -> Result<()>;
}

/// Trait for output connectors (sinks)
#[async_trait]
pub trait OutputConnector: Send + Sync {
    /// Push a message to the sink
    async fn push(&mut self, message: Message) -> Result<()>;

    /// Flush any buffered messages
    async fn flush(&mut self) -> Result<()>;
}

/// Connector configuration from YAML
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConnectorConfig {
    /// Local file
    File(FileConnectorConfig),
}

impl ConnectorConfig {
    /// Same configuration with relative paths anchored at `base`
    pub fn resolve(&self, base: &Path) -> Self {
        match self {
            Self::File(file) => Self::File(file.resolve(base)),
        }
    }

    /// Open as a source
    pub fn input(&self) -> Box<dyn InputConnector> {
        match self {
            Self::File(file) => Box::new(FileInputConnector::new(file.clone())),
        }
    }

    /// Open as a sink
    pub fn output(&self) -> Box<dyn OutputConnector> {
        match self {
            Self::File(file) => Box::new(FileOutputConnector::new(file.clone())),
        }
    }
}

/// On-disk layout of a file connector
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileFormat {
    /// One JSON document per line
    #[default]
    Jsonl,
    /// A single JSON array
    Json,
}

/// File connector configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileConnectorConfig {
    /// File path
    pub path: String,

    /// Format: jsonl or json
    #[serde(default)]
    pub format: FileFormat,
}

impl FileConnectorConfig {
    /// Same configuration with a relative path anchored at `base`
    pub fn resolve(&self, base: &Path) -> Self {
        let path = Path::new(&self.path);
        if path.is_absolute() {
            return self.clone();
        }
        Self {
            path: base.join(path).display().to_string(),
            format: self.format,
        }
    }
}

/// File-based input connector
pub struct FileInputConnector {
    config: FileConnectorConfig,
    reader: Option<BufReader<std::fs::File>>,
    pending: Option<std::vec::IntoIter<Value>>,
    sequence: usize,
}

impl FileInputConnector {
    /// Create a new file input connector
    pub fn new(config: FileConnectorConfig) -> Self {
        Self {
            config,
            reader: None,
            pending: None,
            sequence: 0,
        }
    }

    fn open(&self) -> Result<std::fs::File> {
        std::fs::File::open(&self.config.path).map_err(|err| Error::ConnectorError {
            connector: self.config.path.clone(),
            message: err.to_string(),
        })
    }

    fn next_line(&mut self) -> Result<Option<Value>> {
        let reader = match self.reader.take() {
            Some(reader) => reader,
            None => BufReader::new(self.open()?),
        };
        let reader = self.reader.insert(reader);
        let mut line = String::new();
        loop {
            line.clear();
            if reader.read_line(&mut line)? == 0 {
                return Ok(None);
            }
            let trimmed = line.trim();
            if !trimmed.is_empty() {
                return Ok(Some(serde_json::from_str(trimmed)?));
            }
        }
    }

    fn next_element(&mut self) -> Result<Option<Value>> {
        if self.pending.is_none() {
            let document: Value = serde_json::from_reader(BufReader::new(self.open()?))?;
            let items = match document {
                Value::Array(items) => items,
                other => vec![other],
            };
            self.pending = Some(items.into_iter());
        }
        Ok(self.pending.as_mut().and_then(Iterator::next))
    }

    fn message(&mut self, payload: Value) -> Message {
        self.sequence += 1;
        Message {
            payload,
            metadata: MessageMetadata {
                source: Some(self.config.path.clone()),
                sequence: Some(self.sequence),
            },
        }
    }
}

#[async_trait]
impl InputConnector for FileInputConnector {
    async fn pull(&mut self) -> Result<Option<Message>> {
        let payload = match self.config.format {
            FileFormat::Jsonl => self.next_line()?,
            FileFormat::Json => self.next_element()?,
        };
        Ok(payload.map(|payload| self.message(payload)))
    }

    async fn ack(&mut self, _metadata: &MessageMetadata) -> Result<()> {
        Ok(())
    }

    async fn nack(&mut self, _metadata: &MessageMetadata) -> Result<()> {
        Ok(())
    }
}

/// File-based output connector
pub struct FileOutputConnector {
    config: FileConnectorConfig,
    writer: Option<BufWriter<std::fs::File>>,
    buffered: Vec<Value>,
}

impl FileOutputConnector {
    /// Create a new file output connector
    pub fn new(config: FileConnectorConfig) -> Self {
        Self {
            config,
            writer: None,
            buffered: Vec::new(),
        }
    }

    fn writer(&mut self) -> Result<&mut BufWriter<std::fs::File>> {
        let writer = match self.writer.take() {
            Some(writer) => writer,
            None => {
                if let Some(parent) = Path::new(&self.config.path).parent() {
                    std::fs::create_dir_all(parent)?;
                }
                BufWriter::new(std::fs::File::create(&self.config.path)?)
            }
        };
        Ok(self.writer.insert(writer))
    }
}

#[async_trait]
impl OutputConnector for FileOutputConnector {
    async fn push(&mut self, message: Message) -> Result<()> {
        match self.config.format {
            FileFormat::Jsonl => {
                let line = serde_json::to_string(&message.payload)?;
                writeln!(self.writer()?, "{line}")?;
            }
            FileFormat::Json => self.buffered.push(message.payload),
        }
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        if self.config.format == FileFormat::Json {
            let document = Value::Array(std::mem::take(&mut self.buffered));
            let writer = self.writer()?;
            serde_json::to_writer_pretty(&mut *writer, &document)?;
            writeln!(writer)?;
        }
        if let Some(writer) = self.writer.as_mut() {
            writer.flush()?;
        }
        Ok(())
    }
}
