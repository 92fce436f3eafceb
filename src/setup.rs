use std::sync::Arc;

use tracing_core::LevelFilter;
use tracing_subscriber::{
    layer::SubscriberExt, util::SubscriberInitExt, util::TryInitError, EnvFilter, Registry,
};

use crate::{
    agent::{Agent, ScoutApmAgent},
    config::Config,
};

/// Builds the agent, connects it and installs the global subscriber.
///
/// Log verbosity follows `RUST_LOG` and defaults to `info`. A failed connect
/// is logged and the application keeps running uninstrumented. If the host
/// already installed a global subscriber, that is logged too and the host
/// is expected to add [`Agent::telemetry_layer`] to its own subscriber. The
/// agent is returned in every case.
///
/// This should generally be the first statement of any server binary's main
/// function, inside a tokio runtime. The returned handle is meant to be passed
/// on to [`install`](crate::install::install).
pub fn setup(config: Config) -> Arc<Agent> {
    let agent = Arc::new(Agent::from_config(config));
    let connected = agent.connect();

    if let Err(err) = init_subscriber(&agent) {
        tracing::warn!(error = %err, "[Scout] a global subscriber is already installed, add the agent's telemetry layer to it");
    }

    if let Err(err) = connected {
        tracing::warn!(error = %err, "[Scout] Agent could not connect, continuing without instrumentation");
    }

    tracing::debug!("[Scout] Agent is starting");
    agent
}

/// Installs the global subscriber: `EnvFilter`, console output and the
/// agent's telemetry layer, if it is connected.
pub fn init_subscriber(agent: &Agent) -> Result<(), TryInitError> {
    Registry::default()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy()
        }))
        .with(tracing_subscriber::fmt::layer())
        .with(agent.telemetry_layer())
        .try_init()
}

/// Exports what the agent still buffers and disconnects it.
pub fn teardown(agent: &Agent) {
    agent.shutdown();
}
