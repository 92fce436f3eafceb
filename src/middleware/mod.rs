//! Request instrumentation as [`tower`] layers.
//!
//! [`InstrumentLayer`] installs all four units in their required order. The
//! individual layers are public for services that need to place
//! [`ActionInstrumentLayer`] at route level, where the action is known.
//!
//! ```ignore
//! let app = Router::new()
//!     .route("/foo", get(|| async {}))
//!     .layer(InstrumentLayer::new(agent));
//! ```

mod action;
mod ignored;
mod middleware_instrument;
mod send_request;

use std::{borrow::Cow, sync::Arc};

use http::Request;
use tower::{Service, ServiceBuilder};
use tower_layer::Layer;
use tracing::{instrument::Instrumented, Instrument, Span};

pub use self::{
    action::{ActionInstrument, ActionInstrumentLayer},
    ignored::{IgnoredEndpoints, IgnoredEndpointsLayer},
    middleware_instrument::{MiddlewareInstrument, MiddlewareInstrumentLayer},
    send_request::{SendRequestToScout, SendRequestToScoutLayer},
};
use crate::agent::{self, ScoutApmAgent};

/// Request extension marking a request whose path is on the ignore list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ignored;

/// Request extension naming the controller action that handles a request.
///
/// Routers insert it once a route is resolved. Without it the request method
/// and path are used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Action(pub Cow<'static, str>);

impl Action {
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Action(name.into())
    }
}

/// Installs every request instrument, outermost first:
/// [`IgnoredEndpoints`], [`SendRequestToScout`], [`MiddlewareInstrument`],
/// [`ActionInstrument`].
///
/// Generally the layer should wrap every route. Registered globally and in
/// the last position, it is the first to run.
#[derive(Clone)]
pub struct InstrumentLayer {
    agent: Arc<dyn ScoutApmAgent>,
}

impl InstrumentLayer {
    pub fn new(agent: Arc<dyn ScoutApmAgent>) -> Self {
        InstrumentLayer { agent }
    }
}

impl<S> Layer<S> for InstrumentLayer {
    type Service =
        IgnoredEndpoints<SendRequestToScout<MiddlewareInstrument<ActionInstrument<S>>>>;

    fn layer(&self, service: S) -> Self::Service {
        ServiceBuilder::new()
            .layer(IgnoredEndpointsLayer::new(Arc::clone(&self.agent)))
            .layer(SendRequestToScoutLayer::new(Arc::clone(&self.agent)))
            .layer(MiddlewareInstrumentLayer::new(Arc::clone(&self.agent)))
            .layer(ActionInstrumentLayer::new(Arc::clone(&self.agent)))
            .service(service)
    }
}

/// Whether a request should be instrumented by the units behind
/// [`IgnoredEndpoints`].
fn should_instrument<B>(agent: &dyn ScoutApmAgent, request: &Request<B>) -> bool {
    agent::is_active(agent) && request.extensions().get::<Ignored>().is_none()
}

/// Calls `inner` inside `span`, so spans opened while the inner service sets
/// up its future nest under it too.
fn call_in_span<S, B>(inner: &mut S, span: Span, request: Request<B>) -> Instrumented<S::Future>
where
    S: Service<Request<B>>,
{
    let future = span.in_scope(|| inner.call(request));
    future.instrument(span)
}
