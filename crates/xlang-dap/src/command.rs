use std::fmt;

use serde::Deserialize;

use crate::error::{Result, XlangAdapterError};

/// A command understood by the remote engine.
///
/// Each command knows how to render itself as an engine script and how to
/// decode the engine's textual reply, so every call site gets a typed result.
pub trait RemoteCommand {
    type Reply;

    /// Short name used in logs and error messages.
    const NAME: &'static str;

    fn encode(&self) -> String;

    fn decode(raw: &str) -> Result<Self::Reply>;
}

/// Opaque identifier of a program instance loaded by the remote engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModuleHandle(String);

impl ModuleHandle {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModuleHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Load a source file into the engine and run it to its first stop.
#[derive(Debug, Clone)]
pub struct LoadModule {
    pub path: String,
}

impl RemoteCommand for LoadModule {
    type Reply = ModuleHandle;

    const NAME: &'static str = "load";

    fn encode(&self) -> String {
        let path = self.path.replace('\\', "/");
        format!("m = load('{path}')\nmainrun(m,stopOnEntry=True)\nreturn m")
    }

    fn decode(raw: &str) -> Result<Self::Reply> {
        let handle = raw.trim();
        if handle.is_empty() {
            return Err(XlangAdapterError::malformed(
                Self::NAME,
                "empty module handle",
            ));
        }
        Ok(ModuleHandle::new(handle))
    }
}

/// Ask for the one-based line the module starts executing at.
#[derive(Debug, Clone)]
pub struct StartLine {
    pub module: ModuleHandle,
}

impl RemoteCommand for StartLine {
    type Reply = i64;

    const NAME: &'static str = "start-line";

    fn encode(&self) -> String {
        format!("import xdb\nreturn xdb.get_startline({})", self.module)
    }

    fn decode(raw: &str) -> Result<Self::Reply> {
        parse_line(Self::NAME, raw)
    }
}

/// Advance the module by one step; the reply is the next one-based line.
#[derive(Debug, Clone)]
pub struct Step {
    pub module: ModuleHandle,
}

impl RemoteCommand for Step {
    type Reply = i64;

    const NAME: &'static str = "step";

    fn encode(&self) -> String {
        format!("import xdb\nreturn xdb.command({},cmd='Step')", self.module)
    }

    fn decode(raw: &str) -> Result<Self::Reply> {
        parse_line(Self::NAME, raw)
    }
}

/// Snapshot the module's call stack.
#[derive(Debug, Clone)]
pub struct StackSnapshot {
    pub module: ModuleHandle,
}

/// A frame as reported by the engine. The engine's `line` is not kept; the
/// controller's tracked line is authoritative.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RemoteFrame {
    pub index: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub column: Option<i64>,
}

impl RemoteCommand for StackSnapshot {
    type Reply = Vec<RemoteFrame>;

    const NAME: &'static str = "stack";

    fn encode(&self) -> String {
        format!("import xdb\nreturn xdb.command({},cmd='Stack')", self.module)
    }

    fn decode(raw: &str) -> Result<Self::Reply> {
        serde_json::from_str(raw.trim())
            .map_err(|e| XlangAdapterError::malformed(Self::NAME, e.to_string()))
    }
}

fn parse_line(command: &'static str, raw: &str) -> Result<i64> {
    raw.trim()
        .parse::<i64>()
        .map_err(|e| XlangAdapterError::malformed(command, format!("{raw:?}: {e}")))
}

/// Convert an engine line (one-based, `-1` when unknown) to a zero-based line.
pub fn to_zero_based(line: i64) -> usize {
    usize::try_from(line.saturating_sub(1)).unwrap_or(0)
}
