use std::{
    borrow::Cow,
    sync::Arc,
    task::{Context, Poll},
};

use http::Request;
use tower::Service;
use tower_layer::Layer;
use tracing::{instrument::Instrumented, Span};

use super::Action;
use crate::agent::ScoutApmAgent;

/// Labels the handler with its controller action as a
/// `Controller/<action>` span.
///
/// The action is read from the [`Action`] extension, falling back to the
/// request method and path. Place it after routing when the router supplies actions.
#[derive(Clone)]
pub struct ActionInstrumentLayer {
    agent: Arc<dyn ScoutApmAgent>,
}

impl ActionInstrumentLayer {
    pub fn new(agent: Arc<dyn ScoutApmAgent>) -> Self {
        ActionInstrumentLayer { agent }
    }
}

impl<S> Layer<S> for ActionInstrumentLayer {
    type Service = ActionInstrument<S>;

    fn layer(&self, service: S) -> Self::Service {
        ActionInstrument {
            service,
            agent: Arc::clone(&self.agent),
        }
    }
}

#[derive(Clone)]
pub struct ActionInstrument<S> {
    service: S,
    agent: Arc<dyn ScoutApmAgent>,
}

impl<S, B> Service<Request<B>> for ActionInstrument<S>
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
            self.agent
                .start_span(&format!("Controller/{}", action_name(&request)))
        } else {
            Span::none()
        };

        super::call_in_span(&mut self.service, span, request)
    }
}

fn action_name<B>(request: &Request<B>) -> Cow<'_, str> {
    match request.extensions().get::<Action>() {
        Some(Action(name)) => Cow::Borrowed(name.as_ref()),
        None => Cow::Owned(format!("{} {}", request.method(), request.uri().path())),
    }
}
