use std::io;
use std::path::Path;
use std::time::Duration;

use crossbeam_channel::Receiver;
use dap::prelude::*;
use dap::responses::{
    BreakpointLocationsResponse, ContinueResponse, DisassembleResponse, ScopesResponse,
    SetBreakpointsResponse, SetDataBreakpointsResponse, SetExceptionBreakpointsResponse,
    SetInstructionBreakpointsResponse, StackTraceResponse, ThreadsResponse,
    VariablesResponse,
};
use dap::types::Breakpoint;
use tracing::{debug, info, warn};

use crate::breakpoints::RuntimeBreakpoint;
use crate::error::XlangAdapterError;
use crate::events::RuntimeEvent;
use crate::gateway::{CallOutcome, Gateway, RemoteChannel};
use crate::protocol::LaunchArgs;
use crate::registries::AccessType;
use crate::runtime::XlangRuntime;
use crate::variables::RuntimeVariable;

type DynResult<T> = miette::Result<T, Box<dyn std::error::Error>>;

const THREAD_ID: i64 = 1;
const LOCALS_REFERENCE: i64 = 1;
const GLOBALS_REFERENCE: i64 = 2;
const NAMED_EXCEPTION_FILTER: &str = "namedException";
const OTHER_EXCEPTIONS_FILTER: &str = "otherExceptions";
const STEP_IN_TARGETS_UNSUPPORTED: &str = "stepInTargets is not supported";

/// DAP adapter for a remote xlang engine
pub struct XlangAdapter<C> {
    runtime: XlangRuntime<C>,
    executor: tokio::runtime::Runtime,
    runtime_event_rx: Receiver<RuntimeEvent>,
}

impl<C: RemoteChannel> XlangAdapter<C> {
    pub fn new(channel: C, call_timeout: Option<Duration>) -> io::Result<Self> {
        let executor = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let (runtime, runtime_event_rx) =
            XlangRuntime::with_gateway(Gateway::new(channel).with_timeout(call_timeout));

        Ok(Self {
            runtime,
            executor,
            runtime_event_rx,
        })
    }

    pub fn runtime(&self) -> &XlangRuntime<C> {
        &self.runtime
    }

    /// Send log output to the DAP client
    pub fn send_log_output(
        &self,
        message: &str,
        server: &mut Server<impl io::Read, impl io::Write>,
    ) -> DynResult<()> {
        let event = Event::Output(events::OutputEventBody {
            output: message.to_string(),
            category: Some(types::OutputEventCategory::Console),
            ..Default::default()
        });
        server.send_event(event)?;
        Ok(())
    }

    /// Relay every runtime event raised so far, in order.
    pub fn flush_runtime_events(
        &self,
        server: &mut Server<impl io::Read, impl io::Write>,
    ) -> DynResult<()> {
        while let Ok(event) = self.runtime_event_rx.try_recv() {
            self.handle_runtime_event(event, server)?;
        }
        Ok(())
    }

    /// Translate a runtime event into the matching DAP event
    pub fn handle_runtime_event(
        &self,
        event: RuntimeEvent,
        server: &mut Server<impl io::Read, impl io::Write>,
    ) -> DynResult<()> {
        debug!(event = event.name(), "Relaying runtime event");

        let event = match event {
            RuntimeEvent::StopOnEntry => Event::Stopped(events::StoppedEventBody {
                reason: types::StoppedEventReason::Entry,
                description: Some("Stopped on entry".to_string()),
                thread_id: Some(THREAD_ID),
                preserve_focus_hint: None,
                text: None,
                all_threads_stopped: None,
                hit_breakpoint_ids: None,
            }),
            RuntimeEvent::StopOnStep => Event::Stopped(events::StoppedEventBody {
                reason: types::StoppedEventReason::Step,
                description: Some(format!(
                    "Step completed at line {}",
                    self.runtime.position().line + 1
                )),
                thread_id: Some(THREAD_ID),
                preserve_focus_hint: None,
                text: None,
                all_threads_stopped: None,
                hit_breakpoint_ids: None,
            }),
            RuntimeEvent::End => Event::Terminated(Some(events::TerminatedEventBody {
                restart: Some(serde_json::Value::Bool(false)),
            })),
            RuntimeEvent::BreakpointValidated(bp) => {
                Event::Breakpoint(events::BreakpointEventBody {
                    reason: types::BreakpointEventReason::Changed,
                    breakpoint: Self::to_dap_breakpoint(&bp, None),
                })
            }
        };

        server.send_event(event)?;
        Ok(())
    }

    fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.executor.block_on(future)
    }

    fn get_source(&self) -> Option<types::Source> {
        self.runtime.source_file().map(|file| types::Source {
            name: Path::new(&file)
                .file_name()
                .map(|n| n.to_string_lossy().to_string()),
            path: Some(file),
            ..Default::default()
        })
    }

    fn to_dap_breakpoint(bp: &RuntimeBreakpoint, source: Option<types::Source>) -> Breakpoint {
        Breakpoint {
            id: Some(bp.id),
            verified: bp.verified,
            message: None,
            source,
            line: Some(bp.line + 1),
            column: None,
            end_line: None,
            end_column: None,
            instruction_reference: None,
            offset: None,
        }
    }

    fn to_dap_variable(variable: &RuntimeVariable) -> types::Variable {
        types::Variable {
            name: variable.name().to_string(),
            value: variable.value().to_string(),
            type_field: Some(variable.value().type_name().to_string()),
            variables_reference: 0,
            named_variables: None,
            indexed_variables: None,
            presentation_hint: None,
            evaluate_name: Some(variable.name().to_string()),
            memory_reference: None,
        }
    }

    fn access_type(access: Option<&types::DataBreakpointAccessType>) -> AccessType {
        match access {
            Some(types::DataBreakpointAccessType::Read) => AccessType::Read,
            Some(types::DataBreakpointAccessType::ReadWrite) => AccessType::ReadWrite,
            _ => AccessType::Write,
        }
    }

    /// Handle DAP request and send appropriate response
    pub fn handle_request(
        &mut self,
        req: Request,
        server: &mut Server<impl io::Read, impl io::Write>,
    ) -> DynResult<()> {
        match &req.command {
            Command::Launch(raw_args) => {
                let additional_data = raw_args
                    .additional_data
                    .as_ref()
                    .ok_or(XlangAdapterError::MissingLaunchArguments)?;

                let args: LaunchArgs = serde_json::from_value(additional_data.clone())
                    .map_err(XlangAdapterError::LaunchArgumentsError)?;

                debug!(?args, "Received launch request");

                let debug_mode = !(args.no_debug || raw_args.no_debug.unwrap_or(false));
                let result = self.block_on(self.runtime.start(
                    &args.program,
                    args.stop_on_entry,
                    debug_mode,
                ));

                let rsp = match result {
                    Ok(()) => {
                        info!(program = %args.program, debug_mode, "Launched program");
                        req.success(ResponseBody::Launch)
                    }
                    Err(XlangAdapterError::Busy) => req.error("busy"),
                    Err(e) => req.error(&format!("Launch failed: {}", e)),
                };
                server.respond(rsp)?;
            }
            Command::SetBreakpoints(args) => {
                debug!(?args, "Received SetBreakpoints request");

                let Some(path) = args.source.path.as_ref() else {
                    server.respond(req.success(ResponseBody::SetBreakpoints(
                        SetBreakpointsResponse {
                            breakpoints: Vec::new(),
                        },
                    )))?;
                    return Ok(());
                };

                self.runtime.clear_breakpoints(path);

                let requested = args.breakpoints.as_ref().cloned().unwrap_or_default();
                let mut breakpoints = Vec::with_capacity(requested.len());
                for breakpoint in &requested {
                    let bp = self
                        .block_on(self.runtime.set_breakpoint(path, breakpoint.line - 1));
                    breakpoints.push(Self::to_dap_breakpoint(&bp, Some(args.source.clone())));
                }

                let rsp = req.success(ResponseBody::SetBreakpoints(SetBreakpointsResponse {
                    breakpoints,
                }));
                server.respond(rsp)?;
            }
            Command::BreakpointLocations(args) => {
                debug!(?args, "Received BreakpointLocations request");

                let breakpoints = match (args.source.path.as_ref(), usize::try_from(args.line - 1))
                {
                    (Some(path), Ok(line)) => self
                        .runtime
                        .get_breakpoints(path, line)
                        .into_iter()
                        .map(|column| types::BreakpointLocation {
                            line: args.line,
                            column: Some(column as i64 + 1),
                            end_line: None,
                            end_column: None,
                        })
                        .collect(),
                    _ => Vec::new(),
                };

                let rsp = req.success(ResponseBody::BreakpointLocations(
                    BreakpointLocationsResponse { breakpoints },
                ));
                server.respond(rsp)?;
            }
            Command::SetExceptionBreakpoints(args) => {
                debug!(?args, "Received SetExceptionBreakpoints request");

                let mut named_exception = None;
                let mut other_exceptions = args.filters.iter().any(|f| f == OTHER_EXCEPTIONS_FILTER);
                for option in args.filter_options.iter().flatten() {
                    match option.filter_id.as_str() {
                        NAMED_EXCEPTION_FILTER => named_exception = option.condition.clone(),
                        OTHER_EXCEPTIONS_FILTER => other_exceptions = true,
                        _ => {}
                    }
                }
                self.runtime
                    .set_exceptions_filters(named_exception, other_exceptions);

                let rsp = req.success(ResponseBody::SetExceptionBreakpoints(
                    SetExceptionBreakpointsResponse { breakpoints: None },
                ));
                server.respond(rsp)?;
            }
            Command::SetDataBreakpoints(args) => {
                debug!(?args, "Received SetDataBreakpoints request");

                self.runtime.clear_all_data_breakpoints();
                let breakpoints = args
                    .breakpoints
                    .iter()
                    .map(|dbp| {
                        let access = Self::access_type(dbp.access_type.as_ref());
                        Breakpoint {
                            id: None,
                            verified: self.runtime.set_data_breakpoint(&dbp.data_id, access),
                            message: None,
                            source: None,
                            line: None,
                            column: None,
                            end_line: None,
                            end_column: None,
                            instruction_reference: None,
                            offset: None,
                        }
                    })
                    .collect();

                let rsp = req.success(ResponseBody::SetDataBreakpoints(
                    SetDataBreakpointsResponse { breakpoints },
                ));
                server.respond(rsp)?;
            }
            Command::SetInstructionBreakpoints(args) => {
                debug!(?args, "Received SetInstructionBreakpoints request");

                self.runtime.clear_instruction_breakpoints();
                let breakpoints = args
                    .breakpoints
                    .iter()
                    .map(|ibp| {
                        let address = parse_address(&ibp.instruction_reference)
                            .map(|a| a.saturating_add(ibp.offset.unwrap_or(0)));
                        let verified = match address {
                            Some(address) => self.runtime.set_instruction_breakpoint(address),
                            None => {
                                warn!(reference = %ibp.instruction_reference, "Invalid instruction reference");
                                false
                            }
                        };
                        Breakpoint {
                            id: None,
                            verified,
                            message: None,
                            source: None,
                            line: None,
                            column: None,
                            end_line: None,
                            end_column: None,
                            instruction_reference: Some(ibp.instruction_reference.clone()),
                            offset: ibp.offset,
                        }
                    })
                    .collect();

                let rsp = req.success(ResponseBody::SetInstructionBreakpoints(
                    SetInstructionBreakpointsResponse { breakpoints },
                ));
                server.respond(rsp)?;
            }
            Command::ConfigurationDone => {
                debug!("Received ConfigurationDone request");
                server.respond(req.success(ResponseBody::ConfigurationDone))?;
            }
            Command::Threads => {
                debug!("Received Threads request");
                server.respond(req.success(ResponseBody::Threads(ThreadsResponse {
                    threads: vec![types::Thread {
                        id: THREAD_ID,
                        name: "main".to_string(),
                    }],
                })))?;
            }
            Command::StackTrace(args) => {
                debug!(?args, "Received StackTrace request");

                let rsp = match self.block_on(self.runtime.stack()) {
                    Ok(CallOutcome::Completed(stack)) => {
                        let source = self.get_source();
                        let start = args.start_frame.unwrap_or(0).max(0) as usize;
                        let levels = args
                            .levels
                            .filter(|levels| *levels > 0)
                            .map_or(usize::MAX, |levels| levels as usize);

                        let stack_frames = stack
                            .frames
                            .into_iter()
                            .skip(start)
                            .take(levels)
                            .map(|frame| types::StackFrame {
                                id: frame.index,
                                name: frame.name,
                                source: source.clone(),
                                line: frame.line as i64 + 1,
                                column: frame.column.unwrap_or(0).saturating_add(1),
                                instruction_pointer_reference: frame
                                    .instruction
                                    .map(|i| i.to_string()),
                                ..Default::default()
                            })
                            .collect();

                        req.success(ResponseBody::StackTrace(StackTraceResponse {
                            stack_frames,
                            total_frames: Some(stack.count as i64),
                        }))
                    }
                    Ok(CallOutcome::Busy) | Err(XlangAdapterError::Busy) => req.error("busy"),
                    Err(e) => req.error(&format!("Stack trace failed: {}", e)),
                };
                server.respond(rsp)?;
            }
            Command::Scopes(args) => {
                debug!(?args, "Received Scopes request");

                let scopes = vec![
                    types::Scope {
                        name: "Locals".to_string(),
                        variables_reference: LOCALS_REFERENCE,
                        expensive: false,
                        named_variables: None,
                        indexed_variables: None,
                        source: None,
                        line: None,
                        column: None,
                        end_line: None,
                        end_column: None,
                        presentation_hint: None,
                    },
                    types::Scope {
                        name: "Globals".to_string(),
                        variables_reference: GLOBALS_REFERENCE,
                        expensive: true,
                        named_variables: None,
                        indexed_variables: None,
                        source: None,
                        line: None,
                        column: None,
                        end_line: None,
                        end_column: None,
                        presentation_hint: None,
                    },
                ];

                let rsp = req.success(ResponseBody::Scopes(ScopesResponse { scopes }));
                server.respond(rsp)?;
            }
            Command::Variables(args) => {
                debug!(?args, "Received Variables request");

                let variables = match args.variables_reference {
                    LOCALS_REFERENCE => self.runtime.get_local_variables(),
                    GLOBALS_REFERENCE => self.block_on(self.runtime.get_global_variables(None)),
                    _ => Vec::new(),
                };

                let rsp = req.success(ResponseBody::Variables(VariablesResponse {
                    variables: variables.iter().map(Self::to_dap_variable).collect(),
                }));
                server.respond(rsp)?;
            }
            Command::Continue(_) => {
                debug!("Received Continue request");
                self.runtime.continue_execution(false);
                let rsp = req.success(ResponseBody::Continue(ContinueResponse {
                    all_threads_continued: Some(true),
                }));
                server.respond(rsp)?;
            }
            Command::Next(_) => {
                debug!("Received Next request");
                let rsp = match self.block_on(self.runtime.step(false, false)) {
                    Ok(CallOutcome::Completed(_)) => req.success(ResponseBody::Next),
                    Ok(CallOutcome::Busy) => req.error("busy"),
                    Err(e) => req.error(&format!("Step failed: {}", e)),
                };
                server.respond(rsp)?;
            }
            Command::StepIn(args) => {
                debug!(?args, "Received StepIn request");
                let target = args.target_id.and_then(|id| usize::try_from(id).ok());
                self.runtime.step_in(target);
                server.respond(req.success(ResponseBody::StepIn))?;
            }
            Command::StepOut(_) => {
                debug!("Received StepOut request");
                self.runtime.step_out();
                server.respond(req.success(ResponseBody::StepOut))?;
            }
            Command::StepInTargets(args) => {
                debug!(?args, "Received StepInTargets request");

                // `dap` has no response body for this request, so the targets
                // can only be reported in the log.
                let targets = self.runtime.get_step_in_targets(args.frame_id);
                debug!(count = targets.len(), ?targets, "Computed step-in targets");
                server.respond(req.error(STEP_IN_TARGETS_UNSUPPORTED))?;
            }
            Command::Disassemble(args) => {
                debug!(?args, "Received Disassemble request");

                let rsp = match parse_address(&args.memory_reference) {
                    Some(base) => {
                        let address = base
                            .saturating_add(args.offset.unwrap_or(0))
                            .saturating_add(args.instruction_offset.unwrap_or(0));
                        let source = self.get_source();

                        let instructions = self
                            .runtime
                            .disassemble(address, args.instruction_count)
                            .into_iter()
                            .map(|instruction| types::DisassembledInstruction {
                                address: instruction.address.to_string(),
                                instruction: instruction.instruction,
                                line: instruction.line.map(|l| l as i64 + 1),
                                location: instruction.line.and(source.clone()),
                                ..Default::default()
                            })
                            .collect();

                        req.success(ResponseBody::Disassemble(DisassembleResponse {
                            instructions,
                        }))
                    }
                    None => {
                        let message = format!("Invalid memory reference: {}", args.memory_reference);
                        req.error(&message)
                    }
                };
                server.respond(rsp)?;
            }
            Command::Disconnect(_) => {
                info!("Received Disconnect request");

                let rsp = req.success(ResponseBody::Disconnect);
                server.respond(rsp)?;
                return Err(Box::new(XlangAdapterError::ProtocolError(
                    "Shutdown".to_string(),
                )));
            }
            command => {
                return Err(Box::new(XlangAdapterError::UnhandledCommand(
                    command.clone(),
                )));
            }
        }
        Ok(())
    }
}

/// Parse an instruction or memory reference: decimal, or hex with `0x`.
fn parse_address(reference: &str) -> Option<i64> {
    let reference = reference.trim();
    match reference
        .strip_prefix("0x")
        .or_else(|| reference.strip_prefix("0X"))
    {
        Some(hex) => i64::from_str_radix(hex, 16).ok(),
        None => reference.parse().ok(),
    }
}
