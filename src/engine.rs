//! Rhai engine facade.
//!
//! Owns the embedded engine, the long-lived default scope and the global
//! namespace. Every call into the engine goes through [`RhaiEngine`] so
//! native Rhai failures are translated into [`ScriptExecutionError`]
//! before they reach host code.

use crate::bindings::register_bridge_api;
use crate::class::{Namespace, ScriptClass, ScriptObject};
use crate::config::EngineConfig;
use crate::error::{Result, RhaiError, ScriptExecutionError};
use crate::naming::resolve_method_name;
use crate::paths::{PathProvider, PhysicalPathProvider};
use parking_lot::{Mutex, RwLock};
use rhai::module_resolvers::{FileModuleResolver, ModuleResolversCollection};
use rhai::{Dynamic, Engine, EvalAltResult, FnPtr, Map, Module, Scope};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Global holding a description of the runtime.
pub const SCRIPT_RUNTIME_GLOBAL: &str = "script_runtime";

/// Target of a method invocation.
pub enum Receiver<'a> {
    /// Call a class function with no `this`.
    Class(&'a ScriptClass),
    /// Call a method with the object bound as `this`.
    Instance(&'a mut ScriptObject),
}

impl Receiver<'_> {
    fn class(&self) -> &ScriptClass {
        match self {
            Receiver::Class(class) => class,
            Receiver::Instance(object) => object.class(),
        }
    }
}

/// Rhai engine with the controller bridge bindings.
pub struct RhaiEngine {
    /// The underlying Rhai engine.
    engine: Engine,
    /// Default scope shared by every top-level script.
    scope: Mutex<Scope<'static>>,
    /// Global values and class bindings.
    namespace: Arc<RwLock<Namespace>>,
    /// Virtual path resolution.
    paths: Arc<dyn PathProvider>,
    /// Module search path.
    load_paths: Vec<PathBuf>,
    /// Configuration.
    config: EngineConfig,
}

impl RhaiEngine {
    /// Create a new engine builder.
    pub fn builder() -> RhaiEngineBuilder {
        RhaiEngineBuilder::new()
    }

    /// Create engine from configuration.
    pub fn from_config(config: EngineConfig, paths: Arc<dyn PathProvider>) -> Result<Self> {
        config.validate()?;

        let mut engine = Engine::new();

        // Apply limits
        if let Some(max_ops) = config.max_operations {
            engine.set_max_operations(max_ops);
        }
        engine.set_max_call_levels(config.max_call_depth);
        engine.set_max_string_size(config.max_string_size);
        engine.set_max_array_size(config.max_array_size);
        engine.set_max_map_size(config.max_map_size);

        let namespace = Arc::new(RwLock::new(Namespace::default()));
        register_bridge_api(&mut engine, namespace.clone());

        let load_paths = load_paths(paths.application_root(), &config.load_paths);
        let mut resolvers = ModuleResolversCollection::new();
        for dir in &load_paths {
            resolvers.push(FileModuleResolver::new_with_path_and_extension(
                dir,
                config.extension.as_str(),
            ));
        }
        engine.set_module_resolver(resolvers);

        let rhai_engine = Self {
            engine,
            scope: Mutex::new(Scope::new()),
            namespace,
            paths,
            load_paths,
            config,
        };
        rhai_engine.define_global(SCRIPT_RUNTIME_GLOBAL, rhai_engine.runtime_description());

        debug!(
            root = %rhai_engine.paths.application_root().display(),
            load_paths = rhai_engine.load_paths.len(),
            "Rhai engine initialized"
        );

        Ok(rhai_engine)
    }

    /// Get a reference to the underlying Rhai engine.
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Get the configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Get the path provider.
    pub fn path_provider(&self) -> &Arc<dyn PathProvider> {
        &self.paths
    }

    /// Directories searched by `import`.
    pub fn load_paths(&self) -> &[PathBuf] {
        &self.load_paths
    }

    /// Run script text in `scope`, or in the shared default scope.
    #[instrument(skip(self, script, scope))]
    pub fn execute(&self, script: &str, scope: Option<&mut Scope<'static>>) -> Result<Dynamic> {
        const ORIGIN: &str = "<script>";

        let ast = self
            .engine
            .compile(script)
            .map_err(|e| ScriptExecutionError::from_parse(e, ORIGIN))?;

        match scope {
            Some(scope) => self.guard(ORIGIN, || self.engine.eval_ast_with_scope(scope, &ast)),
            None => {
                let mut shared = self.scope.lock();
                self.guard(ORIGIN, || self.engine.eval_ast_with_scope(&mut shared, &ast))
            }
        }
    }

    /// Run a script file against the shared scope.
    ///
    /// A missing file is an error only when `required`. The file reads the
    /// shared scope but its own top-level variables live only for this load.
    /// If the file defines functions they are bound as a class named after
    /// the file stem, together with the modules the file imports.
    #[instrument(skip(self))]
    pub fn execute_file(&self, virtual_path: &str, required: bool) -> Result<()> {
        if !self.paths.file_exists(virtual_path) {
            if required {
                return Err(RhaiError::FileNotFound {
                    path: virtual_path.to_string(),
                });
            }
            debug!("Optional script not present");
            return Ok(());
        }

        let physical = self.paths.map_path(virtual_path);
        let source = fs::read_to_string(&physical).map_err(|source| RhaiError::Io {
            path: physical.clone(),
            source,
        })?;

        let ast = self
            .engine
            .compile(&source)
            .map_err(|e| ScriptExecutionError::from_parse(e, virtual_path))?;

        let scope = self.scope.lock().clone();
        let module = self.guard(virtual_path, || {
            Module::eval_ast_as_new(scope, &ast, &self.engine)
        })?;

        if ast.iter_functions().next().is_some() {
            let class_name = physical
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_default();
            let class = self
                .namespace
                .write()
                .bind_class(&class_name, Some(virtual_path.to_string()), module);

            info!(
                class = class.name(),
                generation = class.generation(),
                methods = class.methods().len(),
                "Loaded script class"
            );
        }

        Ok(())
    }

    /// Look up a bound class.
    pub fn class(&self, class_name: &str) -> Option<Arc<ScriptClass>> {
        self.namespace.read().class(class_name)
    }

    /// Names of all bound classes.
    pub fn class_names(&self) -> Vec<String> {
        self.namespace.read().class_names()
    }

    /// Evict a class so the next load of its source binds a fresh definition.
    pub fn remove_global_class(&self, class_name: &str) -> bool {
        let removed = self.namespace.write().remove_class(class_name).is_some();
        if removed {
            debug!(class = class_name, "Removed script class");
        }
        removed
    }

    /// Define a process-wide value visible to every script.
    pub fn define_global(&self, name: &str, value: impl Into<Dynamic>) {
        self.namespace.write().set_value(name, value.into());
    }

    /// Read a process-wide value.
    pub fn get_global(&self, name: &str) -> Option<Dynamic> {
        self.namespace.read().value(name)
    }

    /// Instantiate a class, running its initializer when it has one.
    pub fn create_instance(&self, class: &Arc<ScriptClass>) -> Result<ScriptObject> {
        let mut object = ScriptObject::new(class.clone());

        let initializer = &self.config.initializer;
        if self.member_names(&Receiver::Class(class)).contains(initializer) {
            self.invoke_method(Receiver::Instance(&mut object), initializer, Vec::new())
                .map(|_| ())?;
        }

        Ok(object)
    }

    /// Invoke `name` on the receiver.
    ///
    /// The name is matched against the receiver's members in both PascalCase
    /// and snake_case before the call is made.
    pub fn invoke_method(
        &self,
        receiver: Receiver<'_>,
        name: &str,
        args: Vec<Dynamic>,
    ) -> Result<Dynamic> {
        let method = resolve_method_name(name, &self.member_names(&receiver));

        match receiver {
            Receiver::Class(class) => {
                let origin = format!("{}.{}", class.name(), method);
                self.guard(&origin, || {
                    FnPtr::new(method.as_str())?.call::<Dynamic>(&self.engine, class.ast(), args)
                })
            }
            Receiver::Instance(object) => {
                let class = object.class().clone();
                let origin = format!("{}#{}", class.name(), method);
                self.guard(&origin, || {
                    FnPtr::new(method.as_str())?.call_as_method::<Dynamic>(
                        &self.engine,
                        class.ast(),
                        object.this_mut(),
                        args,
                    )
                })
            }
        }
    }

    /// Methods defined by the receiver's class.
    ///
    /// Holds the namespace lock while walking the definition.
    pub fn member_names(&self, receiver: &Receiver<'_>) -> BTreeSet<String> {
        let _namespace = self.namespace.read();
        receiver.class().methods().clone()
    }

    /// Run an engine call, translating any failure.
    fn guard<T>(
        &self,
        origin: &str,
        call: impl FnOnce() -> std::result::Result<T, Box<EvalAltResult>>,
    ) -> Result<T> {
        call().map_err(|err| {
            let err = ScriptExecutionError::from_eval(err, origin);
            debug!(
                origin,
                error_type = err.type_name(),
                message = err.message(),
                "Script raised"
            );
            RhaiError::from(err)
        })
    }

    fn runtime_description(&self) -> Dynamic {
        let mut map = Map::new();
        map.insert(
            "application_root".into(),
            Dynamic::from(self.paths.application_root().display().to_string()),
        );
        map.insert(
            "extension".into(),
            Dynamic::from(self.config.extension.clone()),
        );
        map.insert(
            "load_paths".into(),
            Dynamic::from_array(
                self.load_paths
                    .iter()
                    .map(|p| Dynamic::from(p.display().to_string()))
                    .collect(),
            ),
        );
        Dynamic::from_map(map)
    }
}

fn load_paths(root: &Path, subdirs: &[String]) -> Vec<PathBuf> {
    std::iter::once(root.to_path_buf())
        .chain(subdirs.iter().map(|dir| root.join(dir)))
        .collect()
}

/// Builder for RhaiEngine.
pub struct RhaiEngineBuilder {
    config: EngineConfig,
    paths: Option<Arc<dyn PathProvider>>,
}

impl Default for RhaiEngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RhaiEngineBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            paths: None,
        }
    }

    /// Start from an existing configuration.
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the path provider.
    pub fn path_provider(mut self, paths: Arc<dyn PathProvider>) -> Self {
        self.paths = Some(paths);
        self
    }

    /// Resolve virtual paths against a directory on disk.
    pub fn application_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.paths = Some(Arc::new(PhysicalPathProvider::new(root)));
        self
    }

    /// Set maximum operations per script call.
    pub fn max_operations(mut self, max: u64) -> Self {
        self.config.max_operations = Some(max);
        self
    }

    /// Disable operation limit.
    pub fn unlimited_operations(mut self) -> Self {
        self.config.max_operations = None;
        self
    }

    /// Set maximum call stack depth.
    pub fn max_call_depth(mut self, depth: usize) -> Self {
        self.config.max_call_depth = depth;
        self
    }

    /// Set script file extension.
    pub fn extension(mut self, ext: impl Into<String>) -> Self {
        self.config.extension = ext.into();
        self
    }

    /// Set the controllers directory.
    pub fn handlers_dir(mut self, dir: impl Into<String>) -> Self {
        self.config.handlers_dir = dir.into();
        self
    }

    /// Set the suffix appended to logical controller names.
    pub fn class_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.config.class_suffix = suffix.into();
        self
    }

    /// Set the routes script path.
    pub fn routes_path(mut self, path: impl Into<String>) -> Self {
        self.config.routes_path = path.into();
        self
    }

    /// Build the engine.
    pub fn build(self) -> Result<RhaiEngine> {
        let paths = self
            .paths
            .unwrap_or_else(|| Arc::new(PhysicalPathProvider::new(".")));
        RhaiEngine::from_config(self.config, paths)
    }
}
