use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crossbeam_channel::Receiver;
use tracing::{debug, error, info, warn};

use crate::breakpoints::{BreakpointStore, RuntimeBreakpoint};
use crate::command::{LoadModule, ModuleHandle, StackSnapshot, StartLine, Step, to_zero_based};
use crate::error::{Result, XlangAdapterError};
use crate::events::{EventBatch, EventSink, RuntimeEvent};
use crate::gateway::{CallOutcome, Gateway, RemoteChannel};
use crate::registries::{AccessType, DataBreakpoints, ExceptionFilters, InstructionBreakpoints};
use crate::source::{SourceRegistry, normalize_path, scan_words};
use crate::variables::{RuntimeVariable, VariableStore};

/// Exclusive upper bound of the generic line walk.
pub const MAX_WALK_LINE: usize = 10_000;

const GLOBAL_VARIABLE_COUNT: i64 = 10;
const GLOBAL_VARIABLE_DELAY: Duration = Duration::from_secs(1);

/// Where execution is, as the front end sees it. `instruction` always
/// follows `line`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Position {
    pub line: usize,
    pub column: Option<usize>,
    pub instruction: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Entry,
    Step,
    /// Reserved; breakpoint hits are detected by the remote engine.
    Breakpoint,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RuntimeState {
    #[default]
    Idle,
    Loaded,
    Running,
    Stopped(StopReason),
    Ended,
}

/// Result of one step of [`XlangRuntime::update_current_line`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineWalk {
    Continue,
    Stop,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeStackFrame {
    pub index: i64,
    pub name: String,
    pub file: String,
    pub line: usize,
    pub column: Option<i64>,
    pub instruction: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeStack {
    pub frames: Vec<RuntimeStackFrame>,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepInTarget {
    pub id: usize,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisassembledInstruction {
    pub address: i64,
    pub instruction: String,
    pub line: Option<usize>,
}

#[derive(Debug, Default)]
struct Session {
    source: SourceRegistry,
    breakpoints: BreakpointStore,
    position: Position,
    state: RuntimeState,
    data_breakpoints: DataBreakpoints,
    instruction_breakpoints: InstructionBreakpoints,
    exception_filters: ExceptionFilters,
    locals: VariableStore,
}

impl Session {
    fn set_line(&mut self, line: usize) {
        self.position.line = line;
        self.position.instruction = self.source.instruction_for_line(line);
    }

    fn verify_breakpoints(&mut self, path: &str, events: &mut EventBatch<'_>) {
        for bp in self.breakpoints.verify(path, &self.source) {
            debug!(id = bp.id, line = bp.line, "Breakpoint verified");
            events.push(RuntimeEvent::BreakpointValidated(bp));
        }
    }
}

/// Reconciles the front end's view of execution with the remote engine.
///
/// Every operation takes `&self`; state lives behind a lock that is never
/// held across a remote call, so `step`/`stack` can observe a call already in
/// flight and report [`CallOutcome::Busy`]. Events raised by an operation are
/// delivered when that operation returns.
pub struct XlangRuntime<C> {
    gateway: Gateway<C>,
    session: Mutex<Session>,
    events: EventSink,
}

impl<C: RemoteChannel> XlangRuntime<C> {
    pub fn new(channel: C) -> (Self, Receiver<RuntimeEvent>) {
        Self::with_gateway(Gateway::new(channel))
    }

    pub fn with_gateway(gateway: Gateway<C>) -> (Self, Receiver<RuntimeEvent>) {
        let (events, rx) = EventSink::new();
        let runtime = Self {
            gateway,
            session: Mutex::new(Session::default()),
            events,
        };
        (runtime, rx)
    }

    pub fn gateway(&self) -> &Gateway<C> {
        &self.gateway
    }

    fn session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn current_module(&self) -> Result<ModuleHandle> {
        self.session()
            .source
            .module()
            .cloned()
            .ok_or(XlangAdapterError::NoModuleLoaded)
    }

    /// Load `program` into the engine and either stop on its first line or
    /// let it run.
    pub async fn start(&self, program: &str, stop_on_entry: bool, debug: bool) -> Result<()> {
        let mut events = self.events.batch();

        if let Err(e) = self.gateway.ensure_connected().await {
            error!(error = %e, "Failed to connect to remote engine, will retry on next call");
        }

        let path = normalize_path(program);
        if self.load_source(&path).await? {
            self.session().verify_breakpoints(&path, &mut events);
        }

        if !debug {
            self.continue_execution(false);
            return Ok(());
        }

        let module = self.current_module()?;
        let start_line = self.gateway.call(&StartLine { module }).await?;
        info!(program = %path, start_line, stop_on_entry, "Program started");

        if stop_on_entry {
            let mut session = self.session();
            session.set_line(to_zero_based(start_line));
            session.state = RuntimeState::Stopped(StopReason::Entry);
            events.push(RuntimeEvent::StopOnEntry);
        } else {
            self.continue_execution(false);
        }

        Ok(())
    }

    /// Let the program run. The remote engine runs on its own once started,
    /// so this only records the state change; the position is untouched and
    /// nothing is sent to the engine.
    pub fn continue_execution(&self, reverse: bool) {
        debug!(reverse, "Continue requested");
        self.session().state = RuntimeState::Running;
    }

    /// Advance one step on the engine and adopt the line it reports.
    pub async fn step(&self, instruction: bool, reverse: bool) -> Result<CallOutcome<usize>> {
        if self.gateway.is_busy() {
            debug!("Step rejected, remote call in flight");
            return Ok(CallOutcome::Busy);
        }

        debug!(instruction, reverse, "Step requested");
        let module = self.current_module()?;
        let mut events = self.events.batch();

        let next_line = match self.gateway.call(&Step { module }).await {
            Ok(line) => to_zero_based(line),
            Err(XlangAdapterError::Busy) => return Ok(CallOutcome::Busy),
            Err(e) => return Err(e),
        };

        {
            let mut session = self.session();
            session.set_line(next_line);
            session.state = RuntimeState::Stopped(StopReason::Step);
        }
        events.push(RuntimeEvent::StopOnStep);

        Ok(CallOutcome::Completed(next_line))
    }

    /// Move to the next character of the current line, or to `target_id`.
    pub fn step_in(&self, target_id: Option<usize>) {
        let mut events = self.events.batch();
        let mut session = self.session();

        match (target_id, session.position.column) {
            (Some(target), _) => session.position.column = Some(target),
            (None, Some(column)) => {
                if column <= session.source.line_len(session.position.line) {
                    session.position.column = Some(column + 1);
                }
            }
            (None, None) => session.position.column = Some(1),
        }

        session.state = RuntimeState::Stopped(StopReason::Step);
        events.push(RuntimeEvent::StopOnStep);
    }

    /// Move to the previous character of the current line.
    pub fn step_out(&self) {
        let mut events = self.events.batch();
        let mut session = self.session();

        if let Some(column) = session.position.column {
            session.position.column = column.checked_sub(1).filter(|c| *c > 0);
        }

        session.state = RuntimeState::Stopped(StopReason::Step);
        events.push(RuntimeEvent::StopOnStep);
    }

    /// Walk the current line one step forwards or backwards.
    pub fn update_current_line(&self, reverse: bool) -> LineWalk {
        let mut events = self.events.batch();
        let mut session = self.session();
        let line = session.position.line;

        if reverse {
            if line > 0 {
                session.set_line(line - 1);
                return LineWalk::Continue;
            }
            session.set_line(0);
            session.position.column = None;
            session.state = RuntimeState::Stopped(StopReason::Entry);
            events.push(RuntimeEvent::StopOnEntry);
        } else {
            if line + 1 < MAX_WALK_LINE {
                session.set_line(line + 1);
                return LineWalk::Continue;
            }
            session.position.column = None;
            session.state = RuntimeState::Ended;
            events.push(RuntimeEvent::End);
        }

        LineWalk::Stop
    }

    /// One target per character of the `frame_id`-th word on the current line.
    pub fn get_step_in_targets(&self, frame_id: i64) -> Vec<StepInTarget> {
        let session = self.session();
        let line = session.position.line;
        let words = scan_words(line, session.source.line_text(line));

        let Some(word) = usize::try_from(frame_id).ok().and_then(|i| words.get(i)) else {
            return Vec::new();
        };

        word.name
            .chars()
            .enumerate()
            .map(|(offset, c)| StepInTarget {
                id: word.index + offset,
                label: format!("target: {c}"),
            })
            .collect()
    }

    /// Snapshot the engine's call stack, placed at the tracked current line.
    pub async fn stack(&self) -> Result<CallOutcome<RuntimeStack>> {
        if self.gateway.is_busy() {
            debug!("Stack rejected, remote call in flight");
            return Ok(CallOutcome::Busy);
        }

        let module = self.current_module()?;
        let remote_frames = match self.gateway.call(&StackSnapshot { module }).await {
            Ok(frames) => frames,
            Err(XlangAdapterError::Busy) => return Ok(CallOutcome::Busy),
            Err(e) => return Err(e),
        };

        let session = self.session();
        let file = session.source.file().unwrap_or_default().to_string();
        let position = session.position;

        let frames: Vec<_> = remote_frames
            .into_iter()
            .map(|frame| RuntimeStackFrame {
                index: frame.index,
                name: if frame.name.is_empty() {
                    "main".to_string()
                } else {
                    frame.name
                },
                file: file.clone(),
                line: position.line,
                column: frame.column,
                instruction: Some(position.instruction),
            })
            .collect();
        let count = frames.len();

        Ok(CallOutcome::Completed(RuntimeStack { frames, count }))
    }

    /// Column breakpoint candidates on `line` of the loaded file.
    pub fn get_breakpoints(&self, path: &str, line: usize) -> Vec<usize> {
        let session = self.session();
        if !session.source.is_current(&normalize_path(path)) {
            return Vec::new();
        }
        session.source.column_breakpoints(line)
    }

    /// Add a breakpoint and verify the file's breakpoints against its source.
    ///
    /// If the file cannot be loaded the breakpoint is kept unverified; it is
    /// verified again on the next successful load.
    pub async fn set_breakpoint(&self, path: &str, line: i64) -> RuntimeBreakpoint {
        let path = normalize_path(path);
        let mut events = self.events.batch();
        let created = self.session().breakpoints.add(&path, line);

        if let Err(e) = self.load_source(&path).await {
            warn!(path = %path, error = %e, "Could not load source to verify breakpoint");
            return created;
        }

        let mut session = self.session();
        session.verify_breakpoints(&path, &mut events);
        session
            .breakpoints
            .get(&path, created.id)
            .cloned()
            .unwrap_or(created)
    }

    pub fn clear_breakpoint(&self, path: &str, line: i64) -> Option<RuntimeBreakpoint> {
        self.session()
            .breakpoints
            .clear(&normalize_path(path), line)
    }

    pub fn clear_breakpoints(&self, path: &str) {
        self.session().breakpoints.clear_all(&normalize_path(path));
    }

    pub fn breakpoints(&self, path: &str) -> Vec<RuntimeBreakpoint> {
        self.session()
            .breakpoints
            .breakpoints(&normalize_path(path))
            .to_vec()
    }

    pub fn set_data_breakpoint(&self, address: &str, access: AccessType) -> bool {
        self.session().data_breakpoints.set(address, access)
    }

    pub fn data_breakpoint(&self, address: &str) -> Option<AccessType> {
        self.session().data_breakpoints.get(address)
    }

    pub fn clear_all_data_breakpoints(&self) {
        self.session().data_breakpoints.clear();
    }

    pub fn set_exceptions_filters(&self, named_exception: Option<String>, other_exceptions: bool) {
        self.session().exception_filters = ExceptionFilters {
            named_exception,
            other_exceptions,
        };
    }

    pub fn exception_filters(&self) -> ExceptionFilters {
        self.session().exception_filters.clone()
    }

    pub fn set_instruction_breakpoint(&self, address: i64) -> bool {
        self.session().instruction_breakpoints.set(address)
    }

    pub fn has_instruction_breakpoint(&self, address: i64) -> bool {
        self.session().instruction_breakpoints.contains(address)
    }

    pub fn clear_instruction_breakpoints(&self) {
        self.session().instruction_breakpoints.clear();
    }

    /// Produce `global_0..global_9`, pausing a second after each one.
    /// `cancelled` is consulted before every pause.
    pub async fn get_global_variables(
        &self,
        cancelled: Option<&(dyn Fn() -> bool + Sync)>,
    ) -> Vec<RuntimeVariable> {
        let mut variables = Vec::new();

        for i in 0..GLOBAL_VARIABLE_COUNT {
            variables.push(RuntimeVariable::new(format!("global_{i}"), i));
            if cancelled.is_some_and(|cancelled| cancelled()) {
                debug!(produced = variables.len(), "Global variable listing cancelled");
                break;
            }
            tokio::time::sleep(GLOBAL_VARIABLE_DELAY).await;
        }

        variables
    }

    pub fn get_local_variables(&self) -> Vec<RuntimeVariable> {
        self.session().locals.iter().cloned().collect()
    }

    pub fn get_local_variable(&self, name: &str) -> Option<RuntimeVariable> {
        self.session().locals.get(name).cloned()
    }

    /// Feed a local variable into the cache read by the inspector.
    pub fn set_local_variable(&self, variable: RuntimeVariable) {
        self.session().locals.insert(variable);
    }

    pub fn read_variable_memory(&self, name: &str) -> Option<Vec<u8>> {
        self.session()
            .locals
            .get_mut(name)
            .and_then(|v| v.memory().map(<[u8]>::to_vec))
    }

    pub fn write_variable_memory(&self, name: &str, data: &[u8], offset: usize) -> Result<bool> {
        match self.session().locals.get_mut(name) {
            Some(variable) => variable.set_memory(data, offset),
            None => Ok(false),
        }
    }

    /// Map `count` addresses starting at `address` onto the token table.
    pub fn disassemble(&self, address: i64, count: i64) -> Vec<DisassembledInstruction> {
        let session = self.session();

        (0..count.max(0))
            .map(|k| {
                let word = address
                    .checked_add(k)
                    .and_then(|a| session.source.instruction(a));
                match word {
                    Some(word) => DisassembledInstruction {
                        address: address.saturating_add(k),
                        instruction: word.name.clone(),
                        line: Some(word.line),
                    },
                    None => DisassembledInstruction {
                        address: address.saturating_add(k),
                        instruction: "nop".to_string(),
                        line: None,
                    },
                }
            })
            .collect()
    }

    pub fn position(&self) -> Position {
        self.session().position
    }

    pub fn state(&self) -> RuntimeState {
        self.session().state
    }

    pub fn source_file(&self) -> Option<String> {
        self.session().source.file().map(str::to_string)
    }

    pub fn source_lines(&self) -> Vec<String> {
        self.session().source.lines().to_vec()
    }

    /// Make `path` (normalized) the current file. Loading the current file
    /// again does nothing and returns `false`; a different file replaces
    /// everything derived from the previous one. Breakpoints are left for the
    /// caller to verify.
    async fn load_source(&self, path: &str) -> Result<bool> {
        if self.session().source.is_current(path) {
            debug!(path = %path, "Source already loaded");
            return Ok(false);
        }

        let content = match tokio::fs::read(path).await {
            Ok(content) => content,
            Err(e) => {
                warn!(path = %path, error = %e, "Could not read source, continuing without text");
                Vec::new()
            }
        };

        let module = self
            .gateway
            .call(&LoadModule {
                path: path.to_string(),
            })
            .await?;
        info!(path = %path, module = %module, "Loaded module");

        let mut session = self.session();
        session.source.replace(path.to_string(), &content, module);
        let line = session.position.line;
        session.set_line(line);
        session.state = RuntimeState::Loaded;
        Ok(true)
    }
}
