//! Controller factory backed by script sources.

use crate::cache::ClassCache;
use crate::controller::ScriptController;
use crate::engine::RhaiEngine;
use crate::error::{Result, RhaiError};
use crate::host::{Controller, ControllerFactory, RequestContext};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Resolves logical controller names to script classes.
///
/// `Home` is looked up as class `HomeController` in
/// `~/Controllers/HomeController.rhai`. Names without a script source are
/// handed to the fallback factory when one is configured.
pub struct ScriptControllerFactory {
    engine: Arc<RhaiEngine>,
    cache: ClassCache,
    fallback: Option<Arc<dyn ControllerFactory>>,
}

impl ScriptControllerFactory {
    /// Create a factory with no fallback.
    pub fn new(engine: Arc<RhaiEngine>) -> Self {
        Self {
            cache: ClassCache::new(engine.clone()),
            engine,
            fallback: None,
        }
    }

    /// Delegate names without a script source to `fallback`.
    pub fn with_fallback(mut self, fallback: Arc<dyn ControllerFactory>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// The engine controllers run in.
    pub fn engine(&self) -> &Arc<RhaiEngine> {
        &self.engine
    }

    /// The class cache.
    pub fn cache(&self) -> &ClassCache {
        &self.cache
    }

    /// Resolve `controller_name` to a script controller.
    ///
    /// Does not consult the fallback.
    #[instrument(skip(self, _context))]
    pub fn create_script_controller(
        &self,
        _context: &RequestContext,
        controller_name: &str,
    ) -> Result<ScriptController> {
        if controller_name.trim().is_empty() {
            return Err(RhaiError::handler_not_found(controller_name));
        }

        let config = self.engine.config();
        let class_name = config.class_name_for(controller_name);
        let path = config.virtual_path_for(&class_name);

        if !self.engine.path_provider().file_exists(&path) {
            return Err(RhaiError::handler_not_found(controller_name));
        }

        let class = self.cache.ensure_loaded(&path, &class_name)?;
        let object = self.engine.create_instance(&class)?;

        debug!(class = %class_name, generation = class.generation(), "Created script controller");
        Ok(ScriptController::new(
            self.engine.clone(),
            controller_name,
            object,
        ))
    }

    /// Drop the cached class for a logical or class name.
    pub fn invalidate(&self, name: &str) -> bool {
        let class_name = self.engine.config().class_name_for(name);
        self.cache.invalidate(&class_name) || self.cache.invalidate(name)
    }
}

impl ControllerFactory for ScriptControllerFactory {
    fn create_controller(
        &self,
        context: &RequestContext,
        controller_name: &str,
    ) -> Result<Box<dyn Controller>> {
        match self.create_script_controller(context, controller_name) {
            Ok(controller) => Ok(Box::new(controller)),
            Err(RhaiError::HandlerNotFound { name, .. }) if !name.trim().is_empty() => {
                let Some(fallback) = &self.fallback else {
                    return Err(RhaiError::handler_not_found(name));
                };

                debug!(controller = %name, "No script source, using fallback factory");
                fallback
                    .create_controller(context, &name)
                    .map_err(|err| RhaiError::HandlerNotFound {
                        name,
                        source: Some(Box::new(err)),
                    })
            }
            Err(err) => Err(err),
        }
    }

    fn release_controller(&self, mut controller: Box<dyn Controller>) {
        let is_script = controller.as_any().is::<ScriptController>();
        if let (Some(fallback), false) = (&self.fallback, is_script) {
            fallback.release_controller(controller);
            return;
        }

        if let Some(disposable) = controller.as_disposable() {
            if let Err(err) = disposable.dispose() {
                warn!(error = %err, "Controller disposal failed");
            }
        }
    }
}
