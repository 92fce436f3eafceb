use std::{
    any::Any,
    future::Future,
    panic::{self, AssertUnwindSafe},
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use http::Request;
use tokio::runtime::Handle;
use tower::Service;
use tower_layer::Layer;
use tracing::{instrument::WithSubscriber, Instrument};

use crate::{agent::ScoutApmAgent, error::AgentError, propagation};

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// Opens the root span of each request and hands the finished trace to the
/// agent once the inner service has responded.
///
/// The send runs in the background, so the response never waits on the
/// collector. Failing to send is logged at debug level and never reaches the
/// caller, who always gets the inner service's result back untouched. Must sit
/// outside every other instrument except [`IgnoredEndpoints`], so that the
/// trace is complete when it is sent.
///
/// [`IgnoredEndpoints`]: super::IgnoredEndpoints
#[derive(Clone)]
pub struct SendRequestToScoutLayer {
    agent: Arc<dyn ScoutApmAgent>,
}

impl SendRequestToScoutLayer {
    pub fn new(agent: Arc<dyn ScoutApmAgent>) -> Self {
        SendRequestToScoutLayer { agent }
    }
}

impl<S> Layer<S> for SendRequestToScoutLayer {
    type Service = SendRequestToScout<S>;

    fn layer(&self, service: S) -> Self::Service {
        SendRequestToScout {
            service,
            agent: Arc::clone(&self.agent),
        }
    }
}

#[derive(Clone)]
pub struct SendRequestToScout<S> {
    service: S,
    agent: Arc<dyn ScoutApmAgent>,
}

impl<S, B> Service<Request<B>> for SendRequestToScout<S>
where
    S: Service<Request<B>>,
    S::Future: Send + 'static,
    S::Response: Send + 'static,
    S::Error: Send + 'static,
{
    type Error = S::Error;
    type Future = BoxFuture<Result<S::Response, S::Error>>;
    type Response = S::Response;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.service.poll_ready(cx)
    }

    fn call(&mut self, request: Request<B>) -> Self::Future {
        if !super::should_instrument(self.agent.as_ref(), &request) {
            return Box::pin(self.service.call(request));
        }

        let span = self.agent.start_request(&request.uri().to_string());
        propagation::continue_remote_trace(&span, request.headers());

        let future = span.in_scope(|| self.service.call(request));
        let agent = Arc::clone(&self.agent);

        Box::pin(async move {
            // the root span closes here, before the trace is sent
            let response = future.instrument(span).await;
            send_detached(agent);
            response
        })
    }
}

/// Sends on the blocking pool of the current runtime. Without a runtime the
/// send happens inline.
fn send_detached(agent: Arc<dyn ScoutApmAgent>) {
    let Ok(runtime) = Handle::try_current() else {
        log_outcome(try_send(agent.as_ref()));
        return;
    };

    runtime.spawn(
        async move {
            // flushing blocks on the exporter
            let sent = tokio::task::spawn_blocking(move || try_send(agent.as_ref()))
                .await
                .unwrap_or_else(|err| Err(AgentError::Send(err.to_string())));
            log_outcome(sent);
        }
        .with_current_subscriber(),
    );
}

fn try_send(agent: &dyn ScoutApmAgent) -> Result<(), AgentError> {
    panic::catch_unwind(AssertUnwindSafe(|| agent.send()))
        .unwrap_or_else(|payload| Err(AgentError::Send(panic_message(payload.as_ref()))))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        String::from("send panicked")
    }
}

fn log_outcome(sent: Result<(), AgentError>) {
    match sent {
        Ok(()) => tracing::debug!("[Scout] SendRequestToScout succeeded"),
        Err(err) => tracing::debug!("[Scout] SendRequestToScout failed: {err}"),
    }
}

#[cfg(test)]
mod tests {
    use std::{convert::Infallible, io, sync::mpsc, sync::Mutex};

    use http::Response;
    use tower::{service_fn, ServiceExt};
    use tracing::Span;

    use super::*;
    use crate::{agent::MockScoutApmAgent, test_support::CapturedLogs};

    const PREFIX: &str = "[Scout] SendRequestToScout";

    /// The body is a fresh allocation, so pointer equality proves the
    /// response that comes out is the one the handler produced.
    struct Payload;

    fn agent_sending(result: fn() -> Result<(), AgentError>) -> Arc<dyn ScoutApmAgent> {
        let mut agent = MockScoutApmAgent::new();
        agent.expect_enabled().return_const(true);
        agent.expect_connected().return_const(true);
        agent.expect_start_request().returning(|_| Span::none());
        agent.expect_send().times(1).returning(result);
        Arc::new(agent)
    }

    async fn handle(agent: Arc<dyn ScoutApmAgent>, logs: &CapturedLogs) {
        let expected = Arc::new(Payload);
        let produced = Arc::clone(&expected);
        let service = SendRequestToScoutLayer::new(agent).layer(service_fn(move |_: Request<()>| {
            let body = Arc::clone(&produced);
            async move { Ok::<_, Infallible>(Response::new(body)) }
        }));

        let _guard = logs.install();
        let response = service.oneshot(Request::new(())).await.unwrap();

        assert!(Arc::ptr_eq(response.body(), &expected));
    }

    #[tokio::test]
    async fn handle_sends_request_to_scout() {
        let logs = CapturedLogs::default();

        handle(agent_sending(|| Ok(())), &logs).await;

        assert_eq!(
            logs.next_debug(PREFIX).await,
            vec!["[Scout] SendRequestToScout succeeded"]
        );
    }

    #[tokio::test]
    async fn handle_does_not_fail_when_agent_send_fails() {
        let logs = CapturedLogs::default();

        handle(agent_sending(|| Err(AgentError::Send("oh no".into()))), &logs).await;

        assert_eq!(
            logs.next_debug(PREFIX).await,
            vec!["[Scout] SendRequestToScout failed: oh no"]
        );
    }

    struct PanickingAgent;

    impl ScoutApmAgent for PanickingAgent {
        fn connect(&self) -> Result<(), AgentError> {
            Ok(())
        }

        fn enabled(&self) -> bool {
            true
        }

        fn connected(&self) -> bool {
            true
        }

        fn ignored(&self, _path: &str) -> bool {
            false
        }

        fn start_request(&self, _uri: &str) -> Span {
            Span::none()
        }

        fn start_span(&self, _operation: &str) -> Span {
            Span::none()
        }

        fn record_span(&self, _record: crate::agent::SpanRecord) {}

        fn send(&self) -> Result<(), AgentError> {
            panic!("collector went away")
        }
    }

    #[tokio::test]
    async fn handle_survives_a_panicking_send() {
        let logs = CapturedLogs::default();

        handle(Arc::new(PanickingAgent), &logs).await;

        assert_eq!(
            logs.next_debug(PREFIX).await,
            vec!["[Scout] SendRequestToScout failed: collector went away"]
        );
    }

    #[tokio::test]
    async fn inner_errors_are_returned_and_still_sent() {
        let logs = CapturedLogs::default();
        let service = SendRequestToScoutLayer::new(agent_sending(|| Ok(())))
            .layer(service_fn(|_: Request<()>| async {
                Err::<Response<()>, _>(io::Error::other("handler failed"))
            }));

        let _guard = logs.install();
        let err = service.oneshot(Request::new(())).await.unwrap_err();

        assert_eq!(err.to_string(), "handler failed");
        assert_eq!(
            logs.next_debug(PREFIX).await,
            vec!["[Scout] SendRequestToScout succeeded"]
        );
    }

    #[tokio::test]
    async fn disabled_agent_sends_nothing() {
        let mut agent = MockScoutApmAgent::new();
        agent.expect_enabled().return_const(false);
        agent.expect_connected().return_const(false);
        agent.expect_start_request().never();
        agent.expect_send().never();
        let logs = CapturedLogs::default();
        let service = SendRequestToScoutLayer::new(Arc::new(agent))
            .layer(service_fn(|_: Request<()>| async { Ok::<_, Infallible>(Response::new(())) }));

        let _guard = logs.install();
        service.oneshot(Request::new(())).await.unwrap();

        assert!(logs.debug(PREFIX).is_empty());
    }

    #[tokio::test]
    async fn response_does_not_wait_for_a_slow_send() {
        let (release, held) = mpsc::channel::<()>();
        let held = Mutex::new(held);
        let mut agent = MockScoutApmAgent::new();
        agent.expect_enabled().return_const(true);
        agent.expect_connected().return_const(true);
        agent.expect_start_request().returning(|_| Span::none());
        agent.expect_send().times(1).returning(move || {
            let _ = held.lock().unwrap().recv();
            Ok(())
        });
        let logs = CapturedLogs::default();
        let service = SendRequestToScoutLayer::new(Arc::new(agent))
            .layer(service_fn(|_: Request<()>| async { Ok::<_, Infallible>(Response::new("done")) }));

        let _guard = logs.install();
        let response = service.oneshot(Request::new(())).await.unwrap();

        assert_eq!(*response.body(), "done");
        assert!(logs.debug(PREFIX).is_empty());

        release.send(()).unwrap();
        assert_eq!(
            logs.next_debug(PREFIX).await,
            vec!["[Scout] SendRequestToScout succeeded"]
        );
    }

    #[test]
    fn sends_inline_without_a_runtime() {
        let logs = CapturedLogs::default();
        let service = SendRequestToScoutLayer::new(agent_sending(|| Ok(())))
            .layer(service_fn(|_: Request<()>| async { Ok::<_, Infallible>(Response::new(())) }));

        let _guard = logs.install();
        futures::executor::block_on(service.oneshot(Request::new(()))).unwrap();

        assert_eq!(logs.debug(PREFIX), vec!["[Scout] SendRequestToScout succeeded"]);
    }

    #[test]
    fn panicking_send_without_a_runtime_is_contained() {
        let logs = CapturedLogs::default();
        let service = SendRequestToScoutLayer::new(Arc::new(PanickingAgent))
            .layer(service_fn(|_: Request<()>| async { Ok::<_, Infallible>(Response::new(())) }));

        let _guard = logs.install();
        futures::executor::block_on(service.oneshot(Request::new(()))).unwrap();

        assert_eq!(
            logs.debug(PREFIX),
            vec!["[Scout] SendRequestToScout failed: collector went away"]
        );
    }
}
