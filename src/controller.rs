//! Host-facing adapter around a script controller instance.

use crate::bindings::{ActionContext, RequestBinding, ResponseBinding};
use crate::class::{ScriptClass, ScriptObject};
use crate::engine::{Receiver, RhaiEngine};
use crate::error::{Result, RhaiError};
use crate::filters::{ActionFilterDescriptor, ActionFilterExtractor, FilterKind};
use crate::host::{Controller, Disposable, HttpResponse, RequestContext};
use crate::naming::resolve_method_name;
use rhai::Dynamic;
use std::any::Any;
use std::sync::Arc;
use tracing::{debug, instrument};

/// A script object adapted to the host [`Controller`] contract.
///
/// Created per request by the factory and disposed when the request ends.
pub struct ScriptController {
    engine: Arc<RhaiEngine>,
    filters: ActionFilterExtractor,
    controller_name: String,
    object: ScriptObject,
}

impl ScriptController {
    pub(crate) fn new(engine: Arc<RhaiEngine>, controller_name: &str, object: ScriptObject) -> Self {
        Self {
            filters: ActionFilterExtractor::new(engine.clone()),
            engine,
            controller_name: controller_name.to_string(),
            object,
        }
    }

    /// Logical name the controller was requested under, e.g. `My`.
    pub fn controller_name(&self) -> &str {
        &self.controller_name
    }

    /// Name of the backing script class, e.g. `MyController`.
    pub fn controller_class_name(&self) -> &str {
        self.object.class().name()
    }

    /// The class definition backing this instance.
    pub fn script_class(&self) -> &Arc<ScriptClass> {
        self.object.class()
    }

    /// The underlying script object.
    pub fn object(&self) -> &ScriptObject {
        &self.object
    }

    /// Filters declared for `action`, in the order they run.
    pub fn action_filters(&self, action: &str) -> Result<Vec<ActionFilterDescriptor>> {
        self.filters.filters(self.object.class(), action)
    }

    /// Invoke an instance method by name.
    pub fn call(&mut self, method: &str, args: Vec<Dynamic>) -> Result<Dynamic> {
        self.engine
            .invoke_method(Receiver::Instance(&mut self.object), method, args)
    }

    /// Run `action` with its filter chain.
    #[instrument(skip(self, context), fields(class = %self.object.class().name()))]
    pub fn run_action(&mut self, action: &str, context: &RequestContext) -> Result<HttpResponse> {
        let filters = self.action_filters(action)?;
        let binding = RequestBinding::new(&context.request, &context.route_data);
        let ctx = ActionContext::new(self.controller_class_name(), action, binding.clone());

        self.object.set_field("request", Dynamic::from(binding));
        self.object
            .set_field("params", Dynamic::from_map(request_params(context)));

        for filter in filters.iter().filter(|f| f.kind == FilterKind::Before) {
            debug!(filter = %filter.filter, "Running before filter");
            let result = self.call(&filter.filter, vec![Dynamic::from(ctx.clone())])?;
            if result.is::<ResponseBinding>() {
                debug!(filter = %filter.filter, "Before filter short-circuited");
                return Ok(finish(result, &ctx));
            }
        }

        let mut result = self.call(action, Vec::new())?;

        for filter in filters.iter().filter(|f| f.kind == FilterKind::After) {
            debug!(filter = %filter.filter, "Running after filter");
            let replacement = self.call(&filter.filter, vec![Dynamic::from(ctx.clone())])?;
            if replacement.is::<ResponseBinding>() {
                result = replacement;
            }
        }

        Ok(finish(result, &ctx))
    }
}

impl Controller for ScriptController {
    fn execute(&mut self, context: &RequestContext) -> Result<HttpResponse> {
        let action = context.route_data.action().to_string();
        self.run_action(&action, context)
    }

    fn as_disposable(&mut self) -> Option<&mut dyn Disposable> {
        Some(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Disposable for ScriptController {
    fn dispose(&mut self) -> Result<()> {
        let members = self.engine.member_names(&Receiver::Class(self.object.class()));
        let method = resolve_method_name(&self.engine.config().dispose_method, &members);
        if !members.contains(&method) {
            return Ok(());
        }

        self.call(&method, Vec::new())
            .map(|_| ())
            .map_err(|err| RhaiError::Disposal {
                class_name: self.controller_class_name().to_string(),
                message: err.to_string(),
            })
    }
}

fn request_params(context: &RequestContext) -> rhai::Map {
    context
        .route_data
        .values
        .iter()
        .map(|(k, v)| (k.as_str().into(), Dynamic::from(v.clone())))
        .collect()
}

/// Convert an action result to a response, prepending filter output.
fn finish(result: Dynamic, ctx: &ActionContext) -> HttpResponse {
    let mut response = result_to_response(result);
    let prefix = ctx.output();
    if !prefix.is_empty() {
        let mut body = prefix.into_bytes();
        body.extend_from_slice(&response.body);
        response.body = body;
        response
            .headers
            .entry("content-type".to_string())
            .or_insert_with(|| "text/html; charset=utf-8".to_string());
    }
    response
}

fn result_to_response(result: Dynamic) -> HttpResponse {
    if result.is::<ResponseBinding>() {
        return result.cast::<ResponseBinding>().into_http_response();
    }

    if result.is_string() {
        return HttpResponse::ok()
            .with_header("content-type", "text/plain; charset=utf-8")
            .with_body(result.to_string().into_bytes());
    }

    if result.is_map() || result.is_array() {
        let mut binding = ResponseBinding::new();
        if let Ok(json) = binding.json(result.clone()) {
            return json.into_http_response();
        }
    }

    if result.is_unit() {
        return HttpResponse::ok();
    }

    HttpResponse::ok()
        .with_header("content-type", "text/plain; charset=utf-8")
        .with_body(result.to_string().into_bytes())
}
