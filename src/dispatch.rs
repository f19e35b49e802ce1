//! Async request dispatch.

use crate::error::{Result, RhaiError};
use crate::host::{ControllerFactory, HttpRequest, HttpResponse, RequestContext};
use crate::routes::RouteTable;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, instrument};

/// Routes requests to controllers on tokio's blocking pool.
///
/// Script calls never yield, so each request runs create, execute and
/// release on a blocking thread. A deadline fails the request when it
/// passes, but the script call already running is left to finish.
#[derive(Clone)]
pub struct RequestDispatcher {
    routes: RouteTable,
    factory: Arc<dyn ControllerFactory>,
    timeout: Option<Duration>,
}

impl RequestDispatcher {
    /// Create a dispatcher with no deadline.
    pub fn new(routes: RouteTable, factory: Arc<dyn ControllerFactory>) -> Self {
        Self {
            routes,
            factory,
            timeout: None,
        }
    }

    /// Fail requests that take longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// The route table requests are matched against.
    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// Dispatch a request.
    ///
    /// Unrouted paths get a 404 response. Errors from the controller are
    /// returned as-is.
    #[instrument(skip(self, request), fields(method = %request.method, path = %request.path))]
    pub async fn dispatch(&self, request: HttpRequest) -> Result<HttpResponse> {
        let Some(route_data) = self.routes.match_path(&request.path) else {
            debug!("No route matched");
            return Ok(not_found());
        };
        let Some(controller_name) = route_data.controller().map(str::to_string) else {
            debug!("Route has no controller");
            return Ok(not_found());
        };

        let factory = self.factory.clone();
        let task = tokio::task::spawn_blocking(move || {
            let context = RequestContext::new(request, route_data);
            let mut controller = factory.create_controller(&context, &controller_name)?;
            let result = controller.execute(&context);
            factory.release_controller(controller);
            result
        });

        match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, task).await {
                Ok(joined) => joined?,
                Err(_) => Err(RhaiError::Timeout {
                    timeout_ms: millis(limit),
                }),
            },
            None => task.await?,
        }
    }

    /// Dispatch a request, rendering failures as error responses.
    pub async fn handle(&self, request: HttpRequest) -> HttpResponse {
        match self.dispatch(request).await {
            Ok(response) => response,
            Err(err) => error_response(&err),
        }
    }
}

/// Whole milliseconds in `limit`, saturating at `u64::MAX`.
fn millis(limit: Duration) -> u64 {
    u64::try_from(limit.as_millis()).unwrap_or(u64::MAX)
}

fn not_found() -> HttpResponse {
    HttpResponse::not_found()
        .with_header("content-type", "text/plain")
        .with_body(b"Not Found".to_vec())
}

fn error_response(err: &RhaiError) -> HttpResponse {
    let status = match err {
        RhaiError::HandlerNotFound { .. } => return not_found(),
        RhaiError::Timeout { .. } => 504,
        _ => 500,
    };

    error!(error = %err, status, "Request failed");
    HttpResponse::new(status)
        .with_header("content-type", "text/plain")
        .with_body(format!("Internal Server Error: {err}").into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::Controller;
    use std::any::Any;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Echo;

    impl Controller for Echo {
        fn execute(&mut self, context: &RequestContext) -> Result<HttpResponse> {
            if context.route_data.action() == "slow" {
                std::thread::sleep(Duration::from_millis(200));
            }
            let body = format!(
                "{}#{}",
                context.route_data.controller().unwrap_or_default(),
                context.route_data.action()
            );
            Ok(HttpResponse::ok().with_body(body.into_bytes()))
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[derive(Default)]
    struct CountingFactory {
        released: AtomicUsize,
    }

    impl ControllerFactory for CountingFactory {
        fn create_controller(
            &self,
            _context: &RequestContext,
            controller_name: &str,
        ) -> Result<Box<dyn Controller>> {
            match controller_name {
                "missing" => Err(RhaiError::handler_not_found(controller_name)),
                _ => Ok(Box::new(Echo)),
            }
        }

        fn release_controller(&self, _controller: Box<dyn Controller>) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn routes() -> RouteTable {
        let routes = RouteTable::new();
        routes.map_route(
            "default",
            "{controller}/{action}",
            BTreeMap::from([
                ("controller".to_string(), "home".to_string()),
                ("action".to_string(), "index".to_string()),
            ]),
        );
        routes
    }

    #[tokio::test]
    async fn test_dispatch_runs_controller() {
        let factory = Arc::new(CountingFactory::default());
        let dispatcher = RequestDispatcher::new(routes(), factory.clone());

        let response = dispatcher
            .dispatch(HttpRequest::new("GET", "/products/list"))
            .await
            .unwrap();
        assert_eq!(response.text(), "products#list");
        assert_eq!(factory.released.load(Ordering::SeqCst), 1);

        let response = dispatcher.dispatch(HttpRequest::new("GET", "/")).await.unwrap();
        assert_eq!(response.text(), "home#index");
    }

    #[tokio::test]
    async fn test_unrouted_and_unknown_controllers() {
        let dispatcher = RequestDispatcher::new(routes(), Arc::new(CountingFactory::default()));

        let response = dispatcher.handle(HttpRequest::new("GET", "/a/b/c")).await;
        assert_eq!(response.status, 404);

        let response = dispatcher.handle(HttpRequest::new("GET", "/missing")).await;
        assert_eq!(response.status, 404);
    }

    #[test]
    fn test_deadline_millis_saturate() {
        assert_eq!(millis(Duration::from_millis(1500)), 1500);
        assert_eq!(millis(Duration::from_secs(u64::MAX)), u64::MAX);
        assert_eq!(millis(Duration::MAX), u64::MAX);
    }

    #[tokio::test]
    async fn test_deadline_fails_request() {
        let dispatcher = RequestDispatcher::new(routes(), Arc::new(CountingFactory::default()))
            .with_timeout(Some(Duration::from_millis(20)));

        let err = dispatcher
            .dispatch(HttpRequest::new("GET", "/home/slow"))
            .await
            .unwrap_err();
        assert!(matches!(err, RhaiError::Timeout { timeout_ms: 20 }));

        let response = dispatcher.handle(HttpRequest::new("GET", "/home/slow")).await;
        assert_eq!(response.status, 504);
    }
}
