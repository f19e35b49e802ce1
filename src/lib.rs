//! # Armature Rhai MVC
//!
//! Controllers written as Rhai scripts, dispatched by a statically typed host.
//!
//! Each controller is one script file under `Controllers/`. The functions
//! the file defines form the controller class, and a request for the
//! logical name `home` is served by `Controllers/HomeController.rhai`.
//!
//! ## Features
//!
//! - **Require-once loading**: each class source runs once until it is
//!   invalidated, even under concurrent requests
//! - **Naming conventions**: `show_all` and `ShowAll` resolve to whichever
//!   the script defines
//! - **Action filters**: before/after hooks declared by the class itself
//! - **Normalized errors**: script failures surface as
//!   [`ScriptExecutionError`] with type, message and trace
//! - **Script routes**: `routes.rhai` fills the host route table at startup
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use armature_rhai_mvc::{EngineConfig, HttpRequest, PhysicalPathProvider, ScriptMvc};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mvc = ScriptMvc::initialize(
//!         EngineConfig::default(),
//!         Arc::new(PhysicalPathProvider::new("./app")),
//!         None,
//!     )?;
//!
//!     let response = mvc
//!         .dispatcher()
//!         .handle(HttpRequest::new("GET", "/home/index"))
//!         .await;
//!     println!("{}", response.text());
//!     Ok(())
//! }
//! ```
//!
//! ## Script Example
//!
//! ```rhai
//! // Controllers/HomeController.rhai
//!
//! fn action_filters() {
//!     #{ index: ["greet"] }
//! }
//!
//! fn greet(ctx) {
//!     ctx.write("Hello world<br />");
//! }
//!
//! fn index() {
//!     "Welcome"
//! }
//!
//! fn show() {
//!     #{ id: this.params.id, agent: this.request.header("user-agent") }
//! }
//! ```
//!
//! ## Hot Reload (Development)
//!
//! Enable the `hot-reload` feature to invalidate classes when their
//! source changes:
//!
//! ```rust,ignore
//! let mut changes = mvc.watcher().start().await?;
//! while let Some(class) = changes.next_change().await {
//!     println!("reloading {class}");
//! }
//! ```

mod bindings;
mod cache;
mod class;
mod config;
mod controller;
mod dispatch;
mod engine;
mod error;
mod factory;
mod filters;
mod host;
mod mvc;
mod naming;
mod paths;
mod routes;

#[cfg(feature = "hot-reload")]
mod watcher;

pub use bindings::{ActionContext, RequestBinding, ResponseBinding};
pub use cache::{CacheStats, ClassCache};
pub use class::{ScriptClass, ScriptObject};
pub use config::EngineConfig;
pub use controller::ScriptController;
pub use dispatch::RequestDispatcher;
pub use engine::{Receiver, RhaiEngine, RhaiEngineBuilder, SCRIPT_RUNTIME_GLOBAL};
pub use error::{Result, RhaiError, ScriptExecutionError};
pub use factory::ScriptControllerFactory;
pub use filters::{
    ALL_ACTIONS, ActionFilterDescriptor, ActionFilterExtractor, ActionFilterTable, FilterKind,
};
pub use host::{
    Controller, ControllerFactory, Disposable, HttpRequest, HttpResponse, RequestContext,
    RouteData,
};
pub use mvc::ScriptMvc;
pub use naming::{pascalize, resolve_method_name, underscore};
pub use paths::{PathProvider, PhysicalPathProvider};
pub use routes::{ROUTES_GLOBAL, RouteEntry, RouteInstaller, RouteTable};

#[cfg(feature = "hot-reload")]
pub use watcher::{ScriptWatcher, WatchHandle};

// Re-export rhai for advanced usage
pub use rhai;
