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
pub enum StorageError {
    #[display("database migration failed")]
    Migration,
    #[display("failed to insert data")]
    Insert,
    #[display("failed to query data")]
    Query,
    #[display("failed to decode stored value")]
    Decode,
    #[display("candle history changed since it was read")]
    HistoryChanged,
}

#[derive(Debug, Display, Error)]
pub enum IndicatorError {
    #[display("invalid parameter: {name}")]
    InvalidParameter { name: String },
}

#[derive(Debug, Display, Error, PartialEq, Eq)]
pub enum EngineError {
    #[display("insufficient history: need {required} candles, got {available}")]
    InsufficientHistory { required: usize, available: usize },
    #[display("malformed input at candle {index}: {reason}")]
    MalformedInput { index: usize, reason: String },
    #[display("resume state was built with different indicator parameters")]
    StateMismatch,
}

#[derive(Debug, Display, Error)]
pub enum RunError {
    #[display("storage error")]
    Storage,
    #[display("indicator computation failed")]
    Engine,
}
