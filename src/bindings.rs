//! Rhai bindings for requests, responses, action contexts and globals.

use crate::class::Namespace;
use crate::host::{HttpRequest, HttpResponse, RouteData};
use parking_lot::{Mutex, RwLock};
use rhai::{Dynamic, Engine, EvalAltResult, Map};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;

/// Request binding for Rhai scripts.
#[derive(Debug, Clone)]
pub struct RequestBinding {
    method: String,
    path: String,
    headers: HashMap<String, String>,
    query: HashMap<String, String>,
    params: HashMap<String, String>,
    body: Vec<u8>,
}

impl RequestBinding {
    /// Create a binding from the request and the matched route values.
    pub fn new(req: &HttpRequest, route_data: &RouteData) -> Self {
        Self {
            method: req.method.clone(),
            path: req.path.clone(),
            headers: req.headers.clone(),
            query: req.query_params.clone(),
            params: route_data.values.clone(),
            body: req.body.clone(),
        }
    }

    /// Get the HTTP method.
    pub fn get_method(&mut self) -> String {
        self.method.clone()
    }

    /// Get the request path.
    pub fn get_path(&mut self) -> String {
        self.path.clone()
    }

    /// Get a header value.
    pub fn header(&mut self, name: &str) -> Dynamic {
        lookup(&self.headers, &name.to_ascii_lowercase())
    }

    /// Get all headers as a map.
    pub fn get_headers(&mut self) -> Map {
        to_map(&self.headers)
    }

    /// Get a query parameter.
    pub fn query(&mut self, name: &str) -> Dynamic {
        lookup(&self.query, name)
    }

    /// Get all query parameters as a map.
    pub fn get_query_params(&mut self) -> Map {
        to_map(&self.query)
    }

    /// Get a route value (`id`, `action`, ...).
    pub fn param(&mut self, name: &str) -> Dynamic {
        lookup(&self.params, name)
    }

    /// Get all route values as a map.
    pub fn get_params(&mut self) -> Map {
        to_map(&self.params)
    }

    /// Get body as string.
    pub fn body_text(&mut self) -> Result<String, Box<EvalAltResult>> {
        String::from_utf8(self.body.clone()).map_err(|e| e.to_string().into())
    }

    /// Get body as JSON (parsed to Rhai Dynamic).
    pub fn body_json(&mut self) -> Result<Dynamic, Box<EvalAltResult>> {
        let text = self.body_text()?;
        if text.is_empty() {
            return Ok(Dynamic::UNIT);
        }
        let value: JsonValue = serde_json::from_str(&text).map_err(|e| e.to_string())?;
        json_to_dynamic(value)
    }

    /// Check if request has a JSON content type.
    pub fn get_is_json(&mut self) -> bool {
        self.headers
            .get("content-type")
            .is_some_and(|ct| ct.contains("application/json"))
    }
}

fn lookup(values: &HashMap<String, String>, key: &str) -> Dynamic {
    values
        .get(key)
        .cloned()
        .map(Dynamic::from)
        .unwrap_or(Dynamic::UNIT)
}

fn to_map(values: &HashMap<String, String>) -> Map {
    values
        .iter()
        .map(|(k, v)| (k.as_str().into(), Dynamic::from(v.clone())))
        .collect()
}

/// Response builder for Rhai scripts.
#[derive(Debug, Clone)]
pub struct ResponseBinding {
    status: u16,
    headers: HashMap<String, String>,
    body: Option<Vec<u8>>,
}

impl Default for ResponseBinding {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseBinding {
    /// Create a new response binding.
    pub fn new() -> Self {
        Self {
            status: 200,
            headers: HashMap::new(),
            body: None,
        }
    }

    fn with_status(status: u16) -> Self {
        Self {
            status,
            ..Self::new()
        }
    }

    /// Set status code. Codes outside `100..=999` are rejected.
    pub fn status(&mut self, code: i64) -> Result<Self, Box<EvalAltResult>> {
        match u16::try_from(code) {
            Ok(status) if (100..=999).contains(&status) => {
                self.status = status;
                Ok(self.clone())
            }
            _ => Err(format!("Invalid HTTP status code: {code}").into()),
        }
    }

    /// Set a header.
    pub fn header(&mut self, name: String, value: String) -> Self {
        self.headers.insert(name, value);
        self.clone()
    }

    /// Set body as text.
    pub fn body(&mut self, content: String) -> Self {
        self.body = Some(content.into_bytes());
        self.clone()
    }

    /// Set body as JSON from a Rhai Dynamic.
    pub fn json(&mut self, data: Dynamic) -> Result<Self, Box<EvalAltResult>> {
        let value = dynamic_to_json(data)?;
        let json = serde_json::to_string(&value).map_err(|e| e.to_string())?;
        self.headers
            .insert("content-type".to_string(), "application/json".to_string());
        self.body = Some(json.into_bytes());
        Ok(self.clone())
    }

    /// Create redirect response.
    pub fn redirect(url: String) -> Self {
        let mut r = Self::with_status(302);
        r.headers.insert("location".to_string(), url);
        r
    }

    /// Convert to HttpResponse.
    pub fn into_http_response(self) -> HttpResponse {
        let mut response = HttpResponse::new(self.status);
        response.headers = self.headers;
        if let Some(body) = self.body {
            response = response.with_body(body);
        }
        response
    }
}

/// Per-action context handed to filters.
///
/// Text written through `ctx.write(..)` is collected and placed ahead of
/// the action's response body.
#[derive(Debug, Clone)]
pub struct ActionContext {
    controller: String,
    action: String,
    request: RequestBinding,
    output: Arc<Mutex<String>>,
}

impl ActionContext {
    /// Create a context for one action invocation.
    pub fn new(controller: &str, action: &str, request: RequestBinding) -> Self {
        Self {
            controller: controller.to_string(),
            action: action.to_string(),
            request,
            output: Arc::new(Mutex::new(String::new())),
        }
    }

    /// Everything written so far.
    pub fn output(&self) -> String {
        self.output.lock().clone()
    }

    fn get_controller(&mut self) -> String {
        self.controller.clone()
    }

    fn get_action(&mut self) -> String {
        self.action.clone()
    }

    fn get_request(&mut self) -> RequestBinding {
        self.request.clone()
    }

    fn write(&mut self, text: &str) {
        self.output.lock().push_str(text);
    }
}

/// Register the bridge API with the Rhai engine.
pub(crate) fn register_bridge_api(engine: &mut Engine, namespace: Arc<RwLock<Namespace>>) {
    engine
        .register_type_with_name::<RequestBinding>("Request")
        .register_get("method", RequestBinding::get_method)
        .register_get("path", RequestBinding::get_path)
        .register_fn("header", RequestBinding::header)
        .register_get("headers", RequestBinding::get_headers)
        .register_fn("query", RequestBinding::query)
        .register_get("query_params", RequestBinding::get_query_params)
        .register_fn("param", RequestBinding::param)
        .register_get("params", RequestBinding::get_params)
        .register_fn("body_text", RequestBinding::body_text)
        .register_fn("json", RequestBinding::body_json)
        .register_get("is_json", RequestBinding::get_is_json);

    engine
        .register_type_with_name::<ResponseBinding>("Response")
        .register_fn("response", ResponseBinding::new)
        .register_fn("status", ResponseBinding::status)
        .register_fn("header", ResponseBinding::header)
        .register_fn("body", ResponseBinding::body)
        .register_fn("json", ResponseBinding::json)
        .register_fn("redirect", ResponseBinding::redirect)
        .register_fn("ok", ResponseBinding::new)
        .register_fn("not_found", || ResponseBinding::with_status(404))
        .register_fn("forbidden", || ResponseBinding::with_status(403))
        .register_fn("unauthorized", || ResponseBinding::with_status(401))
        .register_fn("bad_request", || ResponseBinding::with_status(400));

    engine
        .register_type_with_name::<ActionContext>("ActionContext")
        .register_get("controller", ActionContext::get_controller)
        .register_get("action", ActionContext::get_action)
        .register_get("request", ActionContext::get_request)
        .register_fn("write", ActionContext::write);

    register_globals(engine, namespace.clone());
    crate::routes::register_route_api(engine, namespace);
    register_utility_functions(engine);
}

/// Process-wide values, readable and writable from any script code.
fn register_globals(engine: &mut Engine, namespace: Arc<RwLock<Namespace>>) {
    let reader = namespace.clone();
    engine.register_fn("get_global", move |name: &str| -> Dynamic {
        reader.read().value(name).unwrap_or(Dynamic::UNIT)
    });

    let writer = namespace;
    engine.register_fn("set_global", move |name: &str, value: Dynamic| {
        writer.write().set_value(name, value);
    });
}

fn register_utility_functions(engine: &mut Engine) {
    engine.register_fn(
        "to_json",
        |data: Dynamic| -> Result<String, Box<EvalAltResult>> {
            let value = dynamic_to_json(data)?;
            serde_json::to_string(&value).map_err(|e| e.to_string().into())
        },
    );

    engine.register_fn(
        "from_json",
        |text: &str| -> Result<Dynamic, Box<EvalAltResult>> {
            let value: JsonValue = serde_json::from_str(text).map_err(|e| e.to_string())?;
            json_to_dynamic(value)
        },
    );

    engine.register_fn("log_info", |msg: &str| {
        tracing::info!("[script] {}", msg);
    });

    engine.register_fn("log_warn", |msg: &str| {
        tracing::warn!("[script] {}", msg);
    });

    engine.register_fn("log_error", |msg: &str| {
        tracing::error!("[script] {}", msg);
    });

    engine.register_fn("log_debug", |msg: &str| {
        tracing::debug!("[script] {}", msg);
    });
}

/// Convert JSON value to Rhai Dynamic.
pub(crate) fn json_to_dynamic(value: JsonValue) -> Result<Dynamic, Box<EvalAltResult>> {
    match value {
        JsonValue::Null => Ok(Dynamic::UNIT),
        JsonValue::Bool(b) => Ok(Dynamic::from(b)),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Dynamic::from(i))
            } else if let Some(f) = n.as_f64() {
                Ok(Dynamic::from(f))
            } else {
                Err("Invalid number".into())
            }
        }
        JsonValue::String(s) => Ok(Dynamic::from(s)),
        JsonValue::Array(arr) => {
            let items = arr
                .into_iter()
                .map(json_to_dynamic)
                .collect::<Result<rhai::Array, _>>()?;
            Ok(Dynamic::from_array(items))
        }
        JsonValue::Object(obj) => {
            let mut map = Map::new();
            for (key, val) in obj {
                map.insert(key.into(), json_to_dynamic(val)?);
            }
            Ok(Dynamic::from_map(map))
        }
    }
}

/// Convert Rhai Dynamic to JSON value.
pub(crate) fn dynamic_to_json(value: Dynamic) -> Result<JsonValue, Box<EvalAltResult>> {
    if value.is_unit() {
        return Ok(JsonValue::Null);
    }
    if let Ok(b) = value.as_bool() {
        return Ok(JsonValue::Bool(b));
    }
    if let Ok(i) = value.as_int() {
        return Ok(JsonValue::Number(i.into()));
    }
    if let Ok(f) = value.as_float() {
        return serde_json::Number::from_f64(f)
            .map(JsonValue::Number)
            .ok_or_else(|| "Invalid float".into());
    }
    if value.is_string() {
        return Ok(JsonValue::String(value.to_string()));
    }
    if value.is_array() {
        let items = value
            .cast::<rhai::Array>()
            .into_iter()
            .map(dynamic_to_json)
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(JsonValue::Array(items));
    }
    if value.is_map() {
        let mut json_obj = serde_json::Map::new();
        for (key, val) in value.cast::<Map>() {
            json_obj.insert(key.to_string(), dynamic_to_json(val)?);
        }
        return Ok(JsonValue::Object(json_obj));
    }

    Ok(JsonValue::String(value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_conversion_keeps_structure() {
        let json = r#"{"name": "Alice", "tags": ["a", "b"], "age": 30, "active": true}"#;
        let value: JsonValue = serde_json::from_str(json).unwrap();
        let dynamic = json_to_dynamic(value.clone()).unwrap();
        assert!(dynamic.is_map());
        assert_eq!(dynamic_to_json(dynamic).unwrap(), value);
    }

    #[test]
    fn test_response_builder() {
        let mut response = ResponseBinding::new();
        response = response.status(201).unwrap();
        response = response.header("x-custom".to_string(), "value".to_string());
        response = response.body("Hello".to_string());

        let http = response.into_http_response();
        assert_eq!(http.status, 201);
        assert_eq!(http.headers.get("x-custom").unwrap(), "value");
        assert_eq!(http.text(), "Hello");
    }

    #[test]
    fn test_out_of_range_status_is_rejected() {
        let mut response = ResponseBinding::new();
        assert!(response.status(65736).is_err());
        assert!(response.status(99).is_err());
        assert!(response.status(-200).is_err());
        assert_eq!(response.clone().into_http_response().status, 200);

        let namespace = Arc::new(RwLock::new(Namespace::default()));
        let mut engine = Engine::new();
        register_bridge_api(&mut engine, namespace);
        let err = engine.eval::<ResponseBinding>("response().status(65736)").unwrap_err();
        assert!(err.to_string().contains("Invalid HTTP status code: 65736"));
    }

    #[test]
    fn test_request_binding_reads_route_values() {
        let request = HttpRequest::new("GET", "/home/show/7").with_header("Accept", "text/html");
        let route = RouteData::new().with("id", "7");

        let mut binding = RequestBinding::new(&request, &route);
        assert_eq!(binding.get_method(), "GET");
        assert_eq!(binding.param("id").to_string(), "7");
        assert!(binding.param("missing").is_unit());
        assert_eq!(binding.header("ACCEPT").to_string(), "text/html");
    }

    #[test]
    fn test_action_context_collects_output() {
        let request = HttpRequest::new("GET", "/");
        let binding = RequestBinding::new(&request, &RouteData::new());
        let mut ctx = ActionContext::new("HomeController", "index", binding);

        let mut shared = ctx.clone();
        ctx.write("Hello ");
        shared.write("world");
        assert_eq!(ctx.output(), "Hello world");
    }

    #[test]
    fn test_globals_are_shared_with_scripts() {
        let namespace = Arc::new(RwLock::new(Namespace::default()));
        let mut engine = Engine::new();
        register_bridge_api(&mut engine, namespace.clone());

        namespace.write().set_value("counter", Dynamic::from(1_i64));
        engine
            .run(r#"fn bump() { set_global("counter", get_global("counter") + 5); } bump();"#)
            .unwrap();

        assert_eq!(namespace.read().value("counter").unwrap().as_int().unwrap(), 6);
    }
}
