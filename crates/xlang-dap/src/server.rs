use std::io::{self, BufReader, BufWriter};

use dap::prelude::*;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use crate::adapter::XlangAdapter;
use crate::config::Config;
use crate::error::XlangAdapterError;
use crate::log::DebugConsoleWriter;
use crate::transport::TcpChannel;

type DynResult<T> = miette::Result<T, Box<dyn std::error::Error + Send + Sync>>;

#[cfg(debug_assertions)]
const DEFAULT_LOG_FILTER: &str = "xlang_dap=debug";
#[cfg(not(debug_assertions))]
const DEFAULT_LOG_FILTER: &str = "xlang_dap=info";

fn capabilities() -> types::Capabilities {
    types::Capabilities {
        supports_configuration_done_request: Some(true),
        supports_breakpoint_locations_request: Some(true),
        supports_data_breakpoints: Some(true),
        supports_instruction_breakpoints: Some(true),
        supports_disassemble_request: Some(true),
        supports_exception_filter_options: Some(true),
        exception_breakpoint_filters: Some(vec![
            types::ExceptionBreakpointsFilter {
                filter: "namedException".to_string(),
                label: "Named Exception".to_string(),
                description: Some("Break on the named exception".to_string()),
                default: Some(false),
                supports_condition: Some(true),
                condition_description: Some("Name of the exception".to_string()),
            },
            types::ExceptionBreakpointsFilter {
                filter: "otherExceptions".to_string(),
                label: "Other Exceptions".to_string(),
                description: Some("Break on any other exception".to_string()),
                default: Some(true),
                supports_condition: Some(false),
                condition_description: None,
            },
        ]),
        ..Default::default()
    }
}

pub fn start(config: Config) -> DynResult<()> {
    let (debug_writer, log_rx) = DebugConsoleWriter::new();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .with_ansi(false)
        .with_writer(debug_writer)
        .init();

    info!(engine = %config.engine, call_timeout_ms = ?config.call_timeout_ms, "Starting xlang-dap debug adapter");

    let mut adapter = XlangAdapter::new(TcpChannel::new(config.engine.clone()), config.call_timeout())?;
    let reader = BufReader::new(io::stdin());
    let writer = BufWriter::new(io::stdout());
    let mut server = Server::new(reader, writer);

    // First, the client sends an initialize request
    let req = match server.poll_request()? {
        Some(req) => req,
        None => {
            return Err(Box::new(XlangAdapterError::ProtocolError(
                "Missing initialize request".to_string(),
            )));
        }
    };

    if let Command::Initialize(_) = &req.command {
        let rsp = req.success(ResponseBody::Initialize(capabilities()));
        server.respond(rsp)?;
        server.send_event(Event::Initialized)?;
    } else {
        return Err(Box::new(XlangAdapterError::ProtocolError(
            "Expected initialize request".to_string(),
        )));
    }

    loop {
        while let Ok(log_message) = log_rx.try_recv() {
            if let Err(e) = adapter.send_log_output(&log_message, &mut server) {
                eprintln!("Failed to send log output: {}", e);
            }
        }

        debug!("Waiting for next request");
        match server.poll_request()? {
            Some(req) => {
                let result = adapter.handle_request(req, &mut server);

                if let Err(e) = adapter.flush_runtime_events(&mut server) {
                    error!(error = %e, "Failed to relay runtime events");
                }

                if let Err(e) = result {
                    if let Some(XlangAdapterError::ProtocolError(msg)) =
                        e.downcast_ref::<XlangAdapterError>()
                        && msg == "Shutdown"
                    {
                        info!("Debug session ended");
                        break;
                    }
                    error!(error = %e, "Failed to handle DAP request");
                }
            }
            None => {
                info!("Client disconnected or stream ended");
                break;
            }
        }
    }

    Ok(())
}
