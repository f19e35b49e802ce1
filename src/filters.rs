//! Per-action filter metadata declared by script classes.
//!
//! A controller class may define a class-level `action_filters` function
//! returning a map from action name to an ordered list of filters:
//!
//! ```rhai
//! fn action_filters() {
//!     #{
//!         "*":   ["load_session"],
//!         index: [
//!             #{ kind: "before", filter: "authenticate" },
//!             #{ kind: "after",  filter: "audit" }
//!         ]
//!     }
//! }
//! ```
//!
//! A bare string is a before filter. Entries under `"*"` apply to every
//! action and run ahead of the action's own entries.

use crate::class::ScriptClass;
use crate::engine::{Receiver, RhaiEngine};
use crate::error::{Result, ScriptExecutionError};
use crate::naming::underscore;
use rhai::{Array, Dynamic, Map};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Key whose filters apply to every action.
pub const ALL_ACTIONS: &str = "*";

/// When a filter runs relative to its action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterKind {
    Before,
    After,
}

impl FilterKind {
    fn parse(kind: &str) -> Option<Self> {
        match kind.to_ascii_lowercase().as_str() {
            "before" | "before_action" => Some(FilterKind::Before),
            "after" | "after_action" => Some(FilterKind::After),
            _ => None,
        }
    }
}

impl fmt::Display for FilterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterKind::Before => f.write_str("before"),
            FilterKind::After => f.write_str("after"),
        }
    }
}

/// One filter attached to an action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionFilterDescriptor {
    /// Action the filter is declared for (`*` for every action).
    pub action: String,
    /// Before or after the action.
    pub kind: FilterKind,
    /// Name of the instance method implementing the filter.
    pub filter: String,
    /// Position within the action's declaration.
    pub order: usize,
}

/// Filters of one class, keyed by snake_case action name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionFilterTable {
    entries: HashMap<String, Vec<ActionFilterDescriptor>>,
}

impl ActionFilterTable {
    /// Build a table from the value returned by the introspection method.
    pub fn from_dynamic(value: Dynamic, origin: &str) -> Result<Self> {
        if value.is_unit() {
            return Ok(Self::default());
        }

        let type_name = value.type_name();
        let Some(map) = value.try_cast::<Map>() else {
            return Err(malformed(origin, format!("expected a map, got {type_name}")).into());
        };

        let mut entries = HashMap::new();
        for (action, list) in map {
            let action = if action.as_str() == ALL_ACTIONS {
                ALL_ACTIONS.to_string()
            } else {
                underscore(action.as_str())
            };
            let descriptors = parse_list(&action, list, origin)?;
            entries.insert(action, descriptors);
        }

        Ok(Self { entries })
    }

    /// Filters for `action`, wildcard entries first.
    pub fn for_action(&self, action: &str) -> Vec<ActionFilterDescriptor> {
        let action = underscore(action);
        let mut filters = Vec::new();

        if action != ALL_ACTIONS {
            if let Some(all) = self.entries.get(ALL_ACTIONS) {
                filters.extend(all.iter().cloned());
            }
        }
        if let Some(own) = self.entries.get(&action) {
            filters.extend(own.iter().cloned());
        }

        filters
    }

    /// Number of filters declared across all actions.
    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    /// Whether no filters are declared.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn parse_list(action: &str, list: Dynamic, origin: &str) -> Result<Vec<ActionFilterDescriptor>> {
    // A single entry may be given without the surrounding array.
    let items: Array = if list.is_array() {
        list.cast::<Array>()
    } else {
        vec![list]
    };

    let mut descriptors = Vec::with_capacity(items.len());
    for (order, item) in items.into_iter().enumerate() {
        let (kind, filter) = parse_entry(item)
            .map_err(|reason| malformed(origin, format!("filter {order} of '{action}': {reason}")))?;

        descriptors.push(ActionFilterDescriptor {
            action: action.to_string(),
            kind,
            filter,
            order,
        });
    }

    Ok(descriptors)
}

fn parse_entry(item: Dynamic) -> std::result::Result<(FilterKind, String), String> {
    if item.is_string() {
        let name = item.into_string().map_err(|t| format!("unreadable name ({t})"))?;
        return Ok((FilterKind::Before, name));
    }

    let type_name = item.type_name();
    let Some(map) = item.try_cast::<Map>() else {
        return Err(format!("expected a string or map, got {type_name}"));
    };

    let kind = match map.get("kind") {
        Some(kind) => {
            let kind = kind.to_string();
            FilterKind::parse(&kind).ok_or_else(|| format!("unknown kind '{kind}'"))?
        }
        None => FilterKind::Before,
    };

    let filter = map
        .get("filter")
        .or_else(|| map.get("name"))
        .map(|name| name.to_string())
        .filter(|name| !name.is_empty())
        .ok_or_else(|| "missing 'filter' name".to_string())?;

    Ok((kind, filter))
}

fn malformed(origin: &str, reason: String) -> ScriptExecutionError {
    ScriptExecutionError::new("TypeError", reason, format!("from {origin}"))
}

/// Extracts and caches filter tables per class definition.
///
/// The table is computed once per [`ScriptClass`]. Resolving the same
/// unreloaded class again reuses it, and a reloaded class starts with a
/// fresh one.
pub struct ActionFilterExtractor {
    engine: Arc<RhaiEngine>,
}

impl ActionFilterExtractor {
    /// Create an extractor on top of the engine facade.
    pub fn new(engine: Arc<RhaiEngine>) -> Self {
        Self { engine }
    }

    /// Ordered filters declared for `action`. Empty when none are declared.
    pub fn filters(&self, class: &ScriptClass, action: &str) -> Result<Vec<ActionFilterDescriptor>> {
        Ok(self.table(class)?.for_action(action))
    }

    /// The whole filter table of `class`.
    pub fn table(&self, class: &ScriptClass) -> Result<Arc<ActionFilterTable>> {
        class
            .filters
            .get_or_try_init(|| -> Result<Arc<ActionFilterTable>> {
                let method = &self.engine.config().filters_method;
                if !class.defines(method) {
                    return Ok(Arc::new(ActionFilterTable::default()));
                }

                let origin = format!("{}.{}", class.name(), method);
                let value = self
                    .engine
                    .invoke_method(Receiver::Class(class), method, Vec::new())?;
                let table = ActionFilterTable::from_dynamic(value, &origin)?;

                debug!(
                    class = class.name(),
                    generation = class.generation(),
                    filters = table.len(),
                    "Extracted action filters"
                );
                Ok(Arc::new(table))
            })
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rhai::Engine;

    fn table_from(script: &str) -> ActionFilterTable {
        let engine = Engine::new();
        let value: Dynamic = engine.eval(script).unwrap();
        ActionFilterTable::from_dynamic(value, "Test.action_filters").unwrap()
    }

    #[test]
    fn test_bare_strings_are_before_filters() {
        let table = table_from(r#"#{ index: ["greet", "authenticate"] }"#);
        let filters = table.for_action("index");

        assert_eq!(filters.len(), 2);
        assert_eq!(filters[0].filter, "greet");
        assert_eq!(filters[0].kind, FilterKind::Before);
        assert_eq!(filters[1].order, 1);
    }

    #[test]
    fn test_map_entries_and_wildcard() {
        let table = table_from(
            r#"#{
                "*": ["load_session"],
                ShowItem: [#{ kind: "after", filter: "audit" }]
            }"#,
        );

        let filters = table.for_action("show_item");
        assert_eq!(filters.len(), 2);
        assert_eq!(filters[0].action, "*");
        assert_eq!(filters[0].filter, "load_session");
        assert_eq!(filters[1].kind, FilterKind::After);
        assert_eq!(filters[1].filter, "audit");

        assert_eq!(table.for_action("other").len(), 1);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_unit_is_empty_table() {
        let table = ActionFilterTable::from_dynamic(Dynamic::UNIT, "Test.action_filters").unwrap();
        assert!(table.is_empty());
        assert!(table.for_action("index").is_empty());
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        let engine = Engine::new();
        let value: Dynamic = engine
            .eval(r#"#{ index: [#{ kind: "around", filter: "x" }] }"#)
            .unwrap();

        let err = ActionFilterTable::from_dynamic(value, "Test.action_filters").unwrap_err();
        let script_err = err.as_script_error().unwrap();
        assert_eq!(script_err.type_name(), "TypeError");
        assert!(script_err.message().contains("around"));
    }

    #[test]
    fn test_non_map_is_rejected() {
        let err = ActionFilterTable::from_dynamic(Dynamic::from(42_i64), "Test.action_filters")
            .unwrap_err();
        assert!(err.as_script_error().is_some());
    }
}
