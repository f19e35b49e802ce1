// Host-side request and controller contracts

use crate::error::Result;
use std::any::Any;
use std::collections::HashMap;

/// HTTP request wrapper
#[derive(Debug, Clone, Default)]
pub struct HttpRequest {
    pub method: String,
    pub path: String,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
    pub query_params: HashMap<String, String>,
}

impl HttpRequest {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into().to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Get a query parameter by name
    pub fn query(&self, name: &str) -> Option<&String> {
        self.query_params.get(name)
    }
}

/// HTTP response wrapper
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: Vec::new(),
        }
    }

    pub fn ok() -> Self {
        Self::new(200)
    }

    pub fn not_found() -> Self {
        Self::new(404)
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Body as UTF-8 text, lossy.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Values captured by the matched route (`controller`, `action`, `id`, ...)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteData {
    pub values: HashMap<String, String>,
}

impl RouteData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Logical controller name
    pub fn controller(&self) -> Option<&str> {
        self.get("controller").filter(|c| !c.is_empty())
    }

    /// Requested action, `index` when the route carries none
    pub fn action(&self) -> &str {
        self.get("action").filter(|a| !a.is_empty()).unwrap_or("index")
    }
}

/// Everything a controller sees about the current request
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub request: HttpRequest,
    pub route_data: RouteData,
}

impl RequestContext {
    pub fn new(request: HttpRequest, route_data: RouteData) -> Self {
        Self {
            request,
            route_data,
        }
    }
}

/// Cleanup hook run when the host releases a controller
pub trait Disposable {
    fn dispose(&mut self) -> Result<()>;
}

/// A request-scoped controller
pub trait Controller: Send + 'static {
    /// Run the action named by the route data
    fn execute(&mut self, context: &RequestContext) -> Result<HttpResponse>;

    /// Disposal capability, if the controller has one
    fn as_disposable(&mut self) -> Option<&mut dyn Disposable> {
        None
    }

    fn as_any(&self) -> &dyn Any;
}

/// Creates and releases controllers for the host
pub trait ControllerFactory: Send + Sync {
    fn create_controller(
        &self,
        context: &RequestContext,
        controller_name: &str,
    ) -> Result<Box<dyn Controller>>;

    fn release_controller(&self, controller: Box<dyn Controller>);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_data_defaults() {
        let data = RouteData::new().with("controller", "Home");
        assert_eq!(data.controller(), Some("Home"));
        assert_eq!(data.action(), "index");

        let data = data.with("action", "show").with("id", "7");
        assert_eq!(data.action(), "show");
        assert_eq!(data.get("id"), Some("7"));
    }

    #[test]
    fn test_empty_controller_is_none() {
        let data = RouteData::new().with("controller", "");
        assert_eq!(data.controller(), None);
    }

    #[test]
    fn test_request_builder() {
        let request = HttpRequest::new("POST", "/items")
            .with_header("Content-Type", "application/json")
            .with_body(b"{}".to_vec());
        assert_eq!(request.headers.get("content-type").unwrap(), "application/json");
        assert_eq!(request.body, b"{}");
    }
}
