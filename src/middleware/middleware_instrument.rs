use std::{
    sync::Arc,
    task::{Context, Poll},
};

use http::Request;
use tower::Service;
use tower_layer::Layer;
use tracing::{instrument::Instrumented, Span};

use crate::agent::ScoutApmAgent;

/// Operation recorded around the middleware stack.
pub const MIDDLEWARE_OPERATION: &str = "Middleware/all";

/// Times everything it wraps as one `Middleware/all` span.
#[derive(Clone)]
pub struct MiddlewareInstrumentLayer {
    agent: Arc<dyn ScoutApmAgent>,
}

impl MiddlewareInstrumentLayer {
    pub fn new(agent: Arc<dyn ScoutApmAgent>) -> Self {
        MiddlewareInstrumentLayer { agent }
    }
}

impl<S> Layer<S> for MiddlewareInstrumentLayer {
    type Service = MiddlewareInstrument<S>;

    fn layer(&self, service: S) -> Self::Service {
        MiddlewareInstrument {
            service,
            agent: Arc::clone(&self.agent),
        }
    }
}

#[derive(Clone)]
pub struct MiddlewareInstrument<S> {
    service: S,
    agent: Arc<dyn ScoutApmAgent>,
}

impl<S, B> Service<Request<B>> for MiddlewareInstrument<S>
where
    S: Service<Request<B>>,
{
    type Error = S::Error;
    type Future = Instrumented<S::Future>;
    type Response = S::Response;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.service.poll_ready(cx)
    }

    fn call(&mut self, request: Request<B>) -> Self::Future {
        let span = if super::should_instrument(self.agent.as_ref(), &request) {
            self.agent.start_span(MIDDLEWARE_OPERATION)
        } else {
            Span::none()
        };

        super::call_in_span(&mut self.service, span, request)
    }
}
