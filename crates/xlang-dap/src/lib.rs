pub mod adapter;
pub mod breakpoints;
pub mod command;
pub mod config;
pub mod error;
pub mod events;
pub mod gateway;
pub mod log;
pub mod protocol;
pub mod registries;
pub mod runtime;
pub mod server;
pub mod source;
pub mod transport;
pub mod variables;

pub use config::Config;
pub use error::{Result, XlangAdapterError};
pub use gateway::{CallOutcome, Gateway, RemoteChannel};
pub use runtime::XlangRuntime;
pub use server::start;
