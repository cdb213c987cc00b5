use derive_more::{Display, Error};

#[derive(Debug, Display, Error)]
pub enum ConfigError {
    #[display("failed to read config file")]
    ReadFile,
    #[display("failed to parse config: {reason}")]
    Parse { reason: String },
    #[display("invalid config: {field}")]
    Validation { field: String },
}

#[derive(Debug, Display, Error)]
pub enum IngestError {
    #[display("failed to connect to upstream exchange")]
    Connection,
    #[display("request to upstream exchange failed")]
    Request,
    #[display("failed to parse upstream exchange response")]
    ResponseParse,
}

#[derive(Debug, Display, Error)]
pub enum AggregatorError {
    #[display("indicator computation failed for {symbol}")]
    Indicator { symbol: String },
}

#[derive(Debug, Display, Error)]
pub enum IndicatorError {
    #[display("insufficient data: need {required}, got {available}")]
    InsufficientData { required: usize, available: usize },
    #[display("invalid parameter: {name}")]
    InvalidParameter { name: String },
}

#[derive(Debug, Display, Error)]
pub enum RuleEngineError {
    #[display("failed to load alert rules from the metadata store")]
    LoadRules,
}

#[derive(Debug, Display, Error)]
pub enum StorageError {
    #[display("database migration failed")]
    Migration,
    #[display("failed to insert data")]
    Insert,
    #[display("failed to query data")]
    Query,
}

#[derive(Debug, Display, Error)]
pub enum BusError {
    #[display("failed to connect to the message bus")]
    Connection,
    #[display("failed to create or bind stream {stream}")]
    StreamSetup { stream: String },
    #[display("failed to publish on subject {subject}")]
    Publish { subject: String },
    #[display("failed to create durable consumer {consumer}")]
    ConsumerSetup { consumer: String },
    #[display("failed to acknowledge a delivered message")]
    Ack,
}

#[derive(Debug, Display, Error)]
pub enum CooldownError {
    #[display("failed to reach the cooldown store")]
    Connection,
    #[display("cooldown SETNX operation failed")]
    Acquire,
}

#[derive(Debug, Display, Error)]
pub enum WebhookError {
    #[display("webhook request to {url} failed")]
    Request { url: String },
    #[display("webhook at {url} returned a non-2xx status after retries")]
    NonSuccess { url: String },
}
