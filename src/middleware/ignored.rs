use std::{
    sync::Arc,
    task::{Context, Poll},
};

use http::Request;
use tower::Service;
use tower_layer::Layer;

use super::Ignored;
use crate::agent::{self, ScoutApmAgent};

/// Marks requests to ignored endpoints so the instruments behind it leave
/// them alone. Must be the outermost instrument.
#[derive(Clone)]
pub struct IgnoredEndpointsLayer {
    agent: Arc<dyn ScoutApmAgent>,
}

impl IgnoredEndpointsLayer {
    pub fn new(agent: Arc<dyn ScoutApmAgent>) -> Self {
        IgnoredEndpointsLayer { agent }
    }
}

impl<S> Layer<S> for IgnoredEndpointsLayer {
    type Service = IgnoredEndpoints<S>;

    fn layer(&self, service: S) -> Self::Service {
        IgnoredEndpoints {
            service,
            agent: Arc::clone(&self.agent),
        }
    }
}

#[derive(Clone)]
pub struct IgnoredEndpoints<S> {
    service: S,
    agent: Arc<dyn ScoutApmAgent>,
}

impl<S, B> Service<Request<B>> for IgnoredEndpoints<S>
where
    S: Service<Request<B>>,
{
    type Error = S::Error;
    type Future = S::Future;
    type Response = S::Response;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.service.poll_ready(cx)
    }

    fn call(&mut self, mut request: Request<B>) -> Self::Future {
        if agent::is_active(self.agent.as_ref()) && self.agent.ignored(request.uri().path()) {
            tracing::trace!(path = request.uri().path(), "[Scout] ignoring request");
            request.extensions_mut().insert(Ignored);
        }

        self.service.call(request)
    }
}
