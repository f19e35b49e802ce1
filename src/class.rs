//! Script classes and the global namespace they live in.

use crate::filters::ActionFilterTable;
use once_cell::sync::OnceCell;
use rhai::{AST, Dynamic, Map, Module};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

/// A class defined by a script source file.
///
/// The class is the set of public functions the file defines. Each function
/// carries the file's top-level imports and constants, so actions can use
/// modules the file imports. Each time a class name is bound it gets a new
/// generation, so handles taken before an invalidation can be told apart
/// from the reloaded definition.
pub struct ScriptClass {
    name: String,
    source: Option<String>,
    generation: u64,
    ast: AST,
    methods: BTreeSet<String>,
    pub(crate) filters: OnceCell<Arc<ActionFilterTable>>,
}

impl ScriptClass {
    pub(crate) fn new(name: String, source: Option<String>, generation: u64, module: Module) -> Self {
        let ast = AST::new_from_module(module);
        let methods = ast.iter_functions().map(|f| f.name.to_string()).collect();

        Self {
            name,
            source,
            generation,
            ast,
            methods,
            filters: OnceCell::new(),
        }
    }

    /// Declared class name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Virtual path of the backing source, if loaded from a file.
    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    /// Generation of this definition.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Names of the functions the class defines.
    pub fn methods(&self) -> &BTreeSet<String> {
        &self.methods
    }

    /// Whether the class defines `name` exactly.
    pub fn defines(&self, name: &str) -> bool {
        self.methods.contains(name)
    }

    pub(crate) fn ast(&self) -> &AST {
        &self.ast
    }
}

impl fmt::Debug for ScriptClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptClass")
            .field("name", &self.name)
            .field("source", &self.source)
            .field("generation", &self.generation)
            .field("methods", &self.methods)
            .finish()
    }
}

/// An instantiated script class.
///
/// The object is a Rhai map bound as `this` whenever one of its methods
/// runs, so fields written by one method are visible to the next.
#[derive(Debug)]
pub struct ScriptObject {
    class: Arc<ScriptClass>,
    this: Dynamic,
}

impl ScriptObject {
    pub(crate) fn new(class: Arc<ScriptClass>) -> Self {
        let mut fields = Map::new();
        fields.insert("class".into(), Dynamic::from(class.name().to_string()));

        Self {
            class,
            this: Dynamic::from_map(fields),
        }
    }

    /// Class this object was created from.
    pub fn class(&self) -> &Arc<ScriptClass> {
        &self.class
    }

    /// Read a field of the object.
    pub fn field(&self, name: &str) -> Option<Dynamic> {
        self.this.read_lock::<Map>()?.get(name).cloned()
    }

    /// Write a field of the object.
    pub fn set_field(&mut self, name: &str, value: Dynamic) {
        if let Some(mut fields) = self.this.write_lock::<Map>() {
            fields.insert(name.into(), value);
        }
    }

    pub(crate) fn this_mut(&mut self) -> &mut Dynamic {
        &mut self.this
    }
}

/// Process-wide named values and class bindings.
///
/// Always accessed under the engine's single namespace lock.
#[derive(Default)]
pub(crate) struct Namespace {
    values: HashMap<String, Dynamic>,
    classes: HashMap<String, Arc<ScriptClass>>,
    generations: HashMap<String, u64>,
}

impl Namespace {
    pub(crate) fn value(&self, name: &str) -> Option<Dynamic> {
        self.values.get(name).cloned()
    }

    pub(crate) fn set_value(&mut self, name: impl Into<String>, value: Dynamic) {
        self.values.insert(name.into(), value);
    }

    pub(crate) fn class(&self, name: &str) -> Option<Arc<ScriptClass>> {
        self.classes.get(name).cloned()
    }

    /// Bind `module`'s functions as class `name`, replacing any previous binding.
    pub(crate) fn bind_class(
        &mut self,
        name: &str,
        source: Option<String>,
        module: Module,
    ) -> Arc<ScriptClass> {
        let generation = self.generations.entry(name.to_string()).or_insert(0);
        *generation += 1;

        let class = Arc::new(ScriptClass::new(name.to_string(), source, *generation, module));
        self.classes.insert(name.to_string(), class.clone());
        class
    }

    pub(crate) fn remove_class(&mut self, name: &str) -> Option<Arc<ScriptClass>> {
        self.classes.remove(name)
    }

    pub(crate) fn class_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.classes.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rhai::{Engine, Scope};

    fn module(source: &str) -> Module {
        let engine = Engine::new();
        let ast = engine.compile(source).unwrap();
        Module::eval_ast_as_new(Scope::new(), &ast, &engine).unwrap()
    }

    #[test]
    fn test_bind_collects_methods() {
        let mut ns = Namespace::default();
        let class = ns.bind_class(
            "HomeController",
            Some("~/Controllers/HomeController.rhai".into()),
            module("let loaded = true; fn index() { 1 } fn Show(id) { id } private fn hidden() { 0 }"),
        );

        assert_eq!(class.name(), "HomeController");
        assert_eq!(class.generation(), 1);
        assert!(class.defines("index"));
        assert!(class.defines("Show"));
        assert!(!class.defines("hidden"));
        assert_eq!(class.methods().len(), 2);
    }

    #[test]
    fn test_rebinding_bumps_generation() {
        let mut ns = Namespace::default();
        let first = ns.bind_class("HomeController", None, module("fn index() { 1 }"));
        assert!(ns.remove_class("HomeController").is_some());
        assert!(ns.class("HomeController").is_none());

        let second = ns.bind_class("HomeController", None, module("fn index() { 2 }"));
        assert_eq!(first.generation(), 1);
        assert_eq!(second.generation(), 2);
        assert!(Arc::ptr_eq(&ns.class("HomeController").unwrap(), &second));
    }

    #[test]
    fn test_object_fields() {
        let class = Namespace::default().bind_class("HomeController", None, module("fn index() { 1 }"));

        let mut object = ScriptObject::new(class);
        assert_eq!(object.field("class").unwrap().to_string(), "HomeController");

        object.set_field("id", Dynamic::from(7_i64));
        assert_eq!(object.field("id").unwrap().as_int().unwrap(), 7);
        assert!(object.field("missing").is_none());
    }

    #[test]
    fn test_values() {
        let mut ns = Namespace::default();
        ns.set_value("counter", Dynamic::from(5_i64));
        assert_eq!(ns.value("counter").unwrap().as_int().unwrap(), 5);
        assert!(ns.value("missing").is_none());
    }
}
