use dap::prelude::Command;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, XlangAdapterError>;

#[derive(Error, Debug)]
pub enum XlangAdapterError {
    #[error("Remote engine is busy with another call")]
    Busy,
    #[error("Failed to connect to remote engine: {0}")]
    ConnectionFailed(String),
    #[error("Remote call failed: {0}")]
    RemoteCall(String),
    #[error("Remote call did not complete within {0} ms")]
    RemoteTimeout(u64),
    #[error("Malformed remote response for {command}: {message}")]
    MalformedResponse {
        command: &'static str,
        message: String,
    },
    #[error("No module is loaded")]
    NoModuleLoaded,
    #[error("Memory write of {len} bytes at offset {offset} exceeds buffer of {size} bytes")]
    MemoryOutOfRange {
        offset: usize,
        len: usize,
        size: usize,
    },
    #[error("File I/O error: {0}")]
    FileError(String),
    #[error("Unhandled command: {0:?}")]
    UnhandledCommand(Command),
    #[error("Protocol error: {0}")]
    ProtocolError(String),
    #[error("Failed to deserialize launch arguments: {0}")]
    LaunchArgumentsError(serde_json::Error),
    #[error("Missing launch arguments")]
    MissingLaunchArguments,
}

impl XlangAdapterError {
    pub(crate) fn malformed(command: &'static str, message: impl Into<String>) -> Self {
        Self::MalformedResponse {
            command,
            message: message.into(),
        }
    }
}
