use std::time::Duration;

use clap::Parser;

use crate::transport::DEFAULT_ENGINE_ADDRESS;

#[derive(Parser, Debug, Clone)]
#[command(name = "xlang-dap")]
#[command(version)]
#[command(
    about = "Debug adapter that bridges DAP clients to a remote xlang engine.",
    long_about = None
)]
pub struct Config {
    /// Address of the remote engine endpoint
    #[arg(long, env = "XLANG_DEVOPS_ADDR", default_value = DEFAULT_ENGINE_ADDRESS)]
    pub engine: String,

    /// Give up on a remote call after this many milliseconds
    #[arg(long, env = "XLANG_DAP_CALL_TIMEOUT_MS")]
    pub call_timeout_ms: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            engine: DEFAULT_ENGINE_ADDRESS.to_string(),
            call_timeout_ms: None,
        }
    }
}

impl Config {
    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flags() {
        let config =
            Config::try_parse_from(["xlang-dap", "--engine", "10.0.0.2:9000", "--call-timeout-ms", "250"])
                .unwrap();
        assert_eq!(config.engine, "10.0.0.2:9000");
        assert_eq!(config.call_timeout(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_default_has_no_timeout() {
        let config = Config::default();
        assert_eq!(config.engine, DEFAULT_ENGINE_ADDRESS);
        assert_eq!(config.call_timeout(), None);
    }

    #[test]
    fn test_rejects_bad_timeout() {
        assert!(Config::try_parse_from(["xlang-dap", "--call-timeout-ms", "soon"]).is_err());
    }
}
