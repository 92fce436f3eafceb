//! # Scout instrumentation
//! This crate hooks an http service, its database layer and its view engines
//! into an APM agent. The agent records the spans and ships them to a
//! collector; this crate only decides where spans start and stop.
//!
//! ## Setup
//! The agent and logging are set up with [`setup::setup`]. This should be the
//! first call of any server binary. The returned handle is then passed to
//! [`install::install`], which wraps the view engines and hands back the
//! remaining instruments.
//!
//! ```ignore
//! let agent = scout_trace::setup::setup(Config::from_env());
//! let instruments = scout_trace::install::install(agent, &mut engines);
//!
//! let app = Router::new()
//!     .route("/foo", get(|| async {}))
//!     .layer(instruments.layer);
//! database.listen(instruments.queries);
//! ```
//!
//! ## Requests
//! [`middleware::InstrumentLayer`] is a [`tower`] layer. It should be used on
//! every http route, registered globally and in the last position so that it
//! is the first to run.
//!
//! ## Failure
//! Instrumentation is best effort. An agent that is disabled or failed to
//! connect turns every instrument into a pass-through, and failing to send a
//! trace never changes the response.

pub mod agent;
pub mod config;
pub mod database;
pub mod error;
pub mod install;
pub mod middleware;
pub mod propagation;
pub mod setup;
pub mod view;

#[cfg(test)]
mod test_support;

pub use agent::{Agent, ScoutApmAgent, SpanRecord};
pub use config::Config;
pub use error::{AgentError, ViewError};
