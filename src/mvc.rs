//! Application bootstrap.

use crate::config::EngineConfig;
use crate::dispatch::RequestDispatcher;
use crate::engine::RhaiEngine;
use crate::error::Result;
use crate::factory::ScriptControllerFactory;
use crate::host::ControllerFactory;
use crate::paths::PathProvider;
use crate::routes::{RouteInstaller, RouteTable};
use std::sync::Arc;
use tracing::info;

/// The wired-up scripted controller runtime.
///
/// Built once at application start. Holds the process-wide engine, the
/// route table filled by the routes script, and the controller factory.
pub struct ScriptMvc {
    engine: Arc<RhaiEngine>,
    routes: RouteTable,
    factory: Arc<ScriptControllerFactory>,
}

impl ScriptMvc {
    /// Build the engine, install routes and create the controller factory.
    ///
    /// `fallback` handles controller names that have no script source.
    pub fn initialize(
        config: EngineConfig,
        paths: Arc<dyn PathProvider>,
        fallback: Option<Arc<dyn ControllerFactory>>,
    ) -> Result<Self> {
        let engine = Arc::new(RhaiEngine::from_config(config, paths)?);

        let routes = RouteTable::new();
        RouteInstaller::install(&engine, &routes)?;

        let mut factory = ScriptControllerFactory::new(engine.clone());
        if let Some(fallback) = fallback {
            factory = factory.with_fallback(fallback);
        }

        info!(
            root = %engine.path_provider().application_root().display(),
            routes = routes.len(),
            "Script MVC initialized"
        );

        Ok(Self {
            engine,
            routes,
            factory: Arc::new(factory),
        })
    }

    /// The shared engine.
    pub fn engine(&self) -> &Arc<RhaiEngine> {
        &self.engine
    }

    /// Routes declared by the routes script.
    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// The controller factory.
    pub fn factory(&self) -> &Arc<ScriptControllerFactory> {
        &self.factory
    }

    /// A dispatcher over the routes and factory, using the configured deadline.
    pub fn dispatcher(&self) -> RequestDispatcher {
        let factory: Arc<dyn ControllerFactory> = self.factory.clone();
        RequestDispatcher::new(self.routes.clone(), factory)
            .with_timeout(self.engine.config().request_timeout())
    }

    /// A watcher that invalidates controllers when their sources change.
    #[cfg(feature = "hot-reload")]
    pub fn watcher(&self) -> crate::watcher::ScriptWatcher {
        crate::watcher::ScriptWatcher::new(self.factory.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HttpRequest;
    use crate::paths::PhysicalPathProvider;
    use std::fs;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_initialize_and_dispatch() {
        let temp = TempDir::new().unwrap();
        fs::write(
            temp.path().join("routes.rhai"),
            r#"map_route("default", "{controller}/{action}/{id}",
                #{ controller: "Home", action: "index", id: "" });"#,
        )
        .unwrap();
        let controllers = temp.path().join("Controllers");
        fs::create_dir_all(&controllers).unwrap();
        fs::write(
            controllers.join("HomeController.rhai"),
            r#"fn index() { "welcome" } fn show() { "item " + this.params.id }"#,
        )
        .unwrap();

        let mvc = ScriptMvc::initialize(
            EngineConfig::default(),
            Arc::new(PhysicalPathProvider::new(temp.path())),
            None,
        )
        .unwrap();
        assert_eq!(mvc.routes().len(), 1);

        let dispatcher = mvc.dispatcher();
        let response = dispatcher.handle(HttpRequest::new("GET", "/")).await;
        assert_eq!(response.text(), "welcome");

        let response = dispatcher.handle(HttpRequest::new("GET", "/home/show/9")).await;
        assert_eq!(response.text(), "item 9");

        let response = dispatcher.handle(HttpRequest::new("GET", "/nothing/here")).await;
        assert_eq!(response.status, 404);
    }

    #[test]
    fn test_initialize_without_routes_script() {
        let temp = TempDir::new().unwrap();
        let mvc = ScriptMvc::initialize(
            EngineConfig::default(),
            Arc::new(PhysicalPathProvider::new(temp.path())),
            None,
        )
        .unwrap();

        assert!(mvc.routes().is_empty());
        assert!(mvc.engine().class_names().is_empty());
    }
}
