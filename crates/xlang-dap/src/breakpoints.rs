use std::collections::HashMap;

use tracing::debug;

use crate::source::SourceRegistry;

/// A line breakpoint as the front end sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeBreakpoint {
    pub id: i64,
    pub line: i64,
    pub verified: bool,
}

/// Line breakpoints keyed by normalized file path.
#[derive(Debug)]
pub struct BreakpointStore {
    breakpoints: HashMap<String, Vec<RuntimeBreakpoint>>,
    next_id: i64,
}

impl Default for BreakpointStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BreakpointStore {
    pub fn new() -> Self {
        Self {
            breakpoints: HashMap::new(),
            next_id: 1,
        }
    }

    /// Append an unverified breakpoint and return a copy of it.
    pub fn add(&mut self, path: &str, line: i64) -> RuntimeBreakpoint {
        let breakpoint = RuntimeBreakpoint {
            id: self.next_id,
            line,
            verified: false,
        };
        self.next_id += 1;

        self.breakpoints
            .entry(path.to_string())
            .or_default()
            .push(breakpoint.clone());
        breakpoint
    }

    pub fn get(&self, path: &str, id: i64) -> Option<&RuntimeBreakpoint> {
        self.breakpoints
            .get(path)
            .and_then(|bps| bps.iter().find(|bp| bp.id == id))
    }

    pub fn breakpoints(&self, path: &str) -> &[RuntimeBreakpoint] {
        self.breakpoints
            .get(path)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Remove the first breakpoint on `line`.
    pub fn clear(&mut self, path: &str, line: i64) -> Option<RuntimeBreakpoint> {
        let bps = self.breakpoints.get_mut(path)?;
        let index = bps.iter().position(|bp| bp.line == line)?;
        Some(bps.remove(index))
    }

    pub fn clear_all(&mut self, path: &str) {
        self.breakpoints.remove(path);
    }

    /// Reconcile the unverified breakpoints of `path` with `source`.
    ///
    /// A breakpoint on an empty line or a line starting with `+` moves down
    /// one line, one on a line starting with `-` moves up; both tests look at
    /// the unshifted line. A breakpoint whose final line mentions `lazy` stays
    /// unverified. Returns the breakpoints verified by this pass.
    pub fn verify(&mut self, path: &str, source: &SourceRegistry) -> Vec<RuntimeBreakpoint> {
        let Some(bps) = self.breakpoints.get_mut(path) else {
            return Vec::new();
        };

        let line_count = source.line_count();
        let mut verified = Vec::new();

        for bp in bps.iter_mut().filter(|bp| !bp.verified) {
            let Ok(line) = usize::try_from(bp.line) else {
                continue;
            };
            if line >= line_count {
                continue;
            }

            let text = source.line_text(line);
            if text.is_empty() || text.starts_with('+') {
                bp.line += 1;
            }
            if text.starts_with('-') {
                bp.line -= 1;
            }

            let settled = usize::try_from(bp.line)
                .map(|l| source.line_text(l))
                .unwrap_or_default();
            if settled.contains("lazy") {
                debug!(id = bp.id, line = bp.line, "Breakpoint left for lazy verification");
                continue;
            }

            bp.verified = true;
            verified.push(bp.clone());
        }

        verified
    }
}
