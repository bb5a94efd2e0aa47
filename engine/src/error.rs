use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Graph error: {0}")]
    Graph(String),
    #[error("Type error: {0}")]
    Type(String),
    #[error("Group error: {0}")]
    Group(String),
    #[error("Execution error: {0}")]
    Exec(String),
}

impl EngineError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        EngineError::InvalidArgument(msg.into())
    }

    pub fn graph(msg: impl Into<String>) -> Self {
        EngineError::Graph(msg.into())
    }

    pub fn type_error(msg: impl Into<String>) -> Self {
        EngineError::Type(msg.into())
    }

    pub fn group(msg: impl Into<String>) -> Self {
        EngineError::Group(msg.into())
    }

    pub fn exec(msg: impl Into<String>) -> Self {
        EngineError::Exec(msg.into())
    }
}
