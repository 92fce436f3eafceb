use std::{io, path::PathBuf};

use opentelemetry::trace::TraceError;
use thiserror::Error;

/// Failures surfaced by a [`ScoutApmAgent`](crate::agent::ScoutApmAgent).
///
/// None of these are fatal to the host application. Connect failures are
/// logged at boot and send failures are logged per request.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("could not connect to the collector: {0}")]
    Connect(#[source] TraceError),

    #[error("agent is not connected")]
    NotConnected,

    #[error("{0}")]
    Send(String),
}

#[derive(Debug, Error)]
pub enum ViewError {
    #[error("view not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("could not read view: {0}")]
    Io(#[from] io::Error),

    #[error("render failed: {0}")]
    Render(String),
}
