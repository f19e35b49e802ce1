//! Script-declared routes.
//!
//! At startup the route table is published as the global `routes` and the
//! routes script is run. The script registers entries with:
//!
//! ```rhai
//! ignore_route("{resource}.axd/{*pathInfo}");
//! map_route("default", "{controller}/{action}/{id}",
//!     #{ controller: "Home", action: "index", id: "" });
//! ```

use crate::class::Namespace;
use crate::engine::RhaiEngine;
use crate::error::Result;
use crate::host::RouteData;
use parking_lot::RwLock;
use rhai::{Dynamic, Engine, EvalAltResult, Map};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Global the route table is published under.
pub const ROUTES_GLOBAL: &str = "routes";

/// One declared route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteEntry {
    /// Requests matching the pattern are not routed.
    Ignore { pattern: String },
    /// Requests matching the pattern are routed with the captured values.
    Map {
        name: String,
        pattern: String,
        defaults: BTreeMap<String, String>,
    },
}

impl RouteEntry {
    /// URL pattern of the entry.
    pub fn pattern(&self) -> &str {
        match self {
            RouteEntry::Ignore { pattern } | RouteEntry::Map { pattern, .. } => pattern,
        }
    }
}

impl fmt::Display for RouteEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteEntry::Ignore { pattern } => write!(f, "ignore {pattern}"),
            RouteEntry::Map { name, pattern, .. } => write!(f, "{name}: {pattern}"),
        }
    }
}

/// Host route table.
///
/// Clones share the same entries, so the copy handed to scripts writes
/// into the table the host dispatches from.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    entries: Arc<RwLock<Vec<RouteEntry>>>,
}

impl RouteTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an ignore pattern.
    pub fn ignore_route(&self, pattern: impl Into<String>) {
        let pattern = pattern.into();
        debug!(pattern = %pattern, "Ignoring route");
        self.entries.write().push(RouteEntry::Ignore { pattern });
    }

    /// Add a mapped route.
    pub fn map_route(
        &self,
        name: impl Into<String>,
        pattern: impl Into<String>,
        defaults: BTreeMap<String, String>,
    ) {
        let entry = RouteEntry::Map {
            name: name.into(),
            pattern: pattern.into(),
            defaults,
        };
        debug!(route = %entry, "Mapping route");
        self.entries.write().push(entry);
    }

    /// Snapshot of the entries in declaration order.
    pub fn entries(&self) -> Vec<RouteEntry> {
        self.entries.read().clone()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether no routes are declared.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Route `path` through the first matching entry.
    ///
    /// Returns `None` when nothing matches or the first match is an
    /// ignore entry.
    pub fn match_path(&self, path: &str) -> Option<RouteData> {
        let segments: Vec<&str> = path
            .split('?')
            .next()
            .unwrap_or_default()
            .split('/')
            .filter(|s| !s.is_empty())
            .collect();

        for entry in self.entries.read().iter() {
            match entry {
                RouteEntry::Ignore { pattern } => {
                    if match_pattern(pattern, &segments, &BTreeMap::new()).is_some() {
                        debug!(path, pattern = %pattern, "Path ignored");
                        return None;
                    }
                }
                RouteEntry::Map {
                    pattern, defaults, ..
                } => {
                    if let Some(values) = match_pattern(pattern, &segments, defaults) {
                        let mut data = RouteData::new();
                        data.values.extend(values);
                        return Some(data);
                    }
                }
            }
        }

        None
    }
}

/// A parsed pattern segment: literal prefix, optional parameter, literal suffix.
struct Segment<'a> {
    prefix: &'a str,
    param: Option<&'a str>,
    suffix: &'a str,
    catch_all: bool,
}

fn parse_segment(segment: &str) -> Segment<'_> {
    let literal = Segment {
        prefix: segment,
        param: None,
        suffix: "",
        catch_all: false,
    };

    let Some(open) = segment.find('{') else {
        return literal;
    };
    let Some(close) = segment[open..].find('}').map(|i| open + i) else {
        return literal;
    };

    let name = &segment[open + 1..close];
    let (name, catch_all) = match name.strip_prefix('*') {
        Some(rest) => (rest, true),
        None => (name, false),
    };

    Segment {
        prefix: &segment[..open],
        param: Some(name),
        suffix: &segment[close + 1..],
        catch_all,
    }
}

fn match_pattern(
    pattern: &str,
    path: &[&str],
    defaults: &BTreeMap<String, String>,
) -> Option<BTreeMap<String, String>> {
    let mut values = defaults.clone();
    let parts: Vec<&str> = pattern.split('/').filter(|s| !s.is_empty()).collect();

    for (index, part) in parts.iter().enumerate() {
        let segment = parse_segment(part);

        if segment.catch_all {
            let rest = path.get(index..).unwrap_or_default().join("/");
            if let Some(name) = segment.param {
                if !rest.is_empty() || !values.contains_key(name) {
                    values.insert(name.to_string(), rest);
                }
            }
            return Some(values);
        }

        match path.get(index) {
            Some(actual) => {
                let captured = match_segment(&segment, actual)?;
                if let (Some(name), Some(value)) = (segment.param, captured) {
                    values.insert(name.to_string(), value.to_string());
                }
            }
            None => {
                // Trailing segments may be omitted only when they have defaults.
                let name = segment.param?;
                if !segment.prefix.is_empty() || !segment.suffix.is_empty() {
                    return None;
                }
                if !defaults.contains_key(name) {
                    return None;
                }
            }
        }
    }

    (path.len() <= parts.len()).then_some(values)
}

fn match_segment<'p>(segment: &Segment<'_>, actual: &'p str) -> Option<Option<&'p str>> {
    if segment.param.is_none() {
        return segment.prefix.eq_ignore_ascii_case(actual).then_some(None);
    }

    let lower = actual.to_ascii_lowercase();
    let fixed = segment.prefix.len() + segment.suffix.len();
    if actual.len() <= fixed
        || !lower.starts_with(&segment.prefix.to_ascii_lowercase())
        || !lower.ends_with(&segment.suffix.to_ascii_lowercase())
    {
        return None;
    }

    actual
        .get(segment.prefix.len()..actual.len() - segment.suffix.len())
        .map(Some)
}

fn defaults_from_map(map: Map) -> BTreeMap<String, String> {
    map.into_iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}

/// Register the route table type and the route declaration functions.
pub(crate) fn register_route_api(engine: &mut Engine, namespace: Arc<RwLock<Namespace>>) {
    engine
        .register_type_with_name::<RouteTable>("RouteTable")
        .register_fn("ignore_route", |table: &mut RouteTable, pattern: &str| {
            table.ignore_route(pattern)
        })
        .register_fn(
            "map_route",
            |table: &mut RouteTable, name: &str, pattern: &str| {
                table.map_route(name, pattern, BTreeMap::new())
            },
        )
        .register_fn(
            "map_route",
            |table: &mut RouteTable, name: &str, pattern: &str, defaults: Map| {
                table.map_route(name, pattern, defaults_from_map(defaults))
            },
        )
        .register_get("len", |table: &mut RouteTable| table.len() as i64);

    let lookup = move || -> std::result::Result<RouteTable, Box<EvalAltResult>> {
        namespace
            .read()
            .value(ROUTES_GLOBAL)
            .and_then(Dynamic::try_cast::<RouteTable>)
            .ok_or_else(|| format!("global '{ROUTES_GLOBAL}' is not a route table").into())
    };

    let routes = lookup.clone();
    engine.register_fn(
        "ignore_route",
        move |pattern: &str| -> std::result::Result<(), Box<EvalAltResult>> {
            routes()?.ignore_route(pattern);
            Ok(())
        },
    );

    let routes = lookup.clone();
    engine.register_fn(
        "map_route",
        move |name: &str, pattern: &str| -> std::result::Result<(), Box<EvalAltResult>> {
            routes()?.map_route(name, pattern, BTreeMap::new());
            Ok(())
        },
    );

    let routes = lookup;
    engine.register_fn(
        "map_route",
        move |name: &str,
              pattern: &str,
              defaults: Map|
              -> std::result::Result<(), Box<EvalAltResult>> {
            routes()?.map_route(name, pattern, defaults_from_map(defaults));
            Ok(())
        },
    );
}

/// Runs the routes script against a host route table.
pub struct RouteInstaller;

impl RouteInstaller {
    /// Publish `routes` as a global and run the routes script.
    ///
    /// Returns `false` without touching the table when no routes script
    /// exists.
    #[instrument(skip(engine, routes))]
    pub fn install(engine: &RhaiEngine, routes: &RouteTable) -> Result<bool> {
        let path = engine.config().routes_path.clone();
        if !engine.path_provider().file_exists(&path) {
            debug!(path = %path, "No routes script");
            return Ok(false);
        }

        engine.define_global(ROUTES_GLOBAL, Dynamic::from(routes.clone()));
        engine.execute_file(&path, true)?;

        info!(path = %path, routes = routes.len(), "Installed routes");
        Ok(true)
    }
}
