use log::debug;
use serde_derive::Deserialize;
use std::{collections::BTreeMap, env, fs, path::Path};

use crate::diag::Result;

/// Environment variable naming an extra registry file.
pub const ENV_VAR: &str = "DPRINT_REGISTRY";

const BUILTIN: &str = include_str!("default.json");

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct Config {
    free: Option<String>,
    #[serde(default)]
    types: BTreeMap<String, String>,
}

/// Table mapping a fully-qualified type name to the remote function that
/// renders it.
///
/// Lookups are exact: a type name only matches the key it was registered
/// under, never a prefix of it. Registering a name twice keeps the last
/// renderer. Entries iterate in a stable (sorted) order so registration with a
/// host is deterministic.
#[derive(Debug)]
pub struct Registry {
    free: String,
    renderers: BTreeMap<String, String>,
}

impl Registry {
    fn empty() -> Self {
        Self {
            free: String::new(),
            renderers: BTreeMap::new(),
        }
    }

    fn merge(mut self, json: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(json)?;
        if let Some(free) = config.free {
            self.free = free;
        }
        for (type_name, renderer) in config.types {
            self = self.register(&type_name, &renderer);
        }

        Ok(self)
    }

    /// Registry holding the built-in renderers and the default free function.
    ///
    /// # Errors
    ///
    /// Returns an error if the embedded table fails to parse.
    pub fn builtin() -> Result<Self> {
        Self::empty().merge(BUILTIN)
    }

    /// Built-in registry extended with the entries of the JSON file at `path`.
    ///
    /// The file has the same shape as the built-in table: an optional `free`
    /// function name and a `types` object mapping type names to renderers.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not a valid table.
    pub fn load(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        debug!("loading registry from {}", path.display());
        Self::builtin()?.merge(&json)
    }

    /// Built-in registry, extended by the file named in `DPRINT_REGISTRY`
    /// when that variable is set.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured file cannot be loaded.
    pub fn from_env() -> Result<Self> {
        match env::var_os(ENV_VAR) {
            Some(path) => Self::load(Path::new(&path)),
            None => Self::builtin(),
        }
    }

    #[must_use]
    /// Add (or replace) the renderer for `type_name`.
    pub fn register(mut self, type_name: &str, renderer: &str) -> Self {
        self.renderers
            .insert(type_name.to_string(), renderer.to_string());
        self
    }

    #[must_use]
    /// Replace the name of the function releasing rendered strings.
    pub fn with_free_function(mut self, free: &str) -> Self {
        self.free = free.to_string();
        self
    }

    #[must_use]
    /// Renderer registered for exactly `type_name`, if any.
    pub fn renderer(&self, type_name: &str) -> Option<&str> {
        self.renderers.get(type_name).map(String::as_str)
    }

    #[must_use]
    /// Name of the remote function releasing rendered strings.
    pub fn free_function(&self) -> &str {
        &self.free
    }

    /// `(type name, renderer)` pairs in registration-independent order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.renderers
            .iter()
            .map(|(type_name, renderer)| (type_name.as_str(), renderer.as_str()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.renderers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.renderers.is_empty()
    }
}
