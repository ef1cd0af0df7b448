use log::debug;
use regex::Regex;

use crate::{
    diag::Result,
    registry::Registry,
    remote::Target,
    render::Renderer,
    value::Value,
};

struct Provider {
    pattern: String,
    regex: Regex,
}

/// A host-side type-summary category.
///
/// Patterns are regular expressions matched against the reported type name
/// of each value the host is about to display. Values whose type matches a
/// pattern are handed to the dispatcher; anything else keeps the host's
/// default formatting.
pub struct Category {
    name: String,
    providers: Vec<Provider>,
}

#[must_use]
/// Anchored pattern matching exactly `type_name`.
pub fn exact_pattern(type_name: &str) -> String {
    format!("^{}$", regex::escape(type_name))
}

impl Category {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            providers: Vec::new(),
        }
    }

    /// Route values whose type matches `pattern` to the dispatcher.
    ///
    /// Adding a pattern that is already registered replaces it.
    ///
    /// # Errors
    ///
    /// Returns an error if `pattern` is not a valid regular expression.
    pub fn add(&mut self, pattern: &str) -> Result<()> {
        let provider = Provider {
            pattern: pattern.to_string(),
            regex: Regex::new(pattern)?,
        };

        match self.providers.iter_mut().find(|p| p.pattern == pattern) {
            Some(existing) => *existing = provider,
            None => self.providers.push(provider),
        }
        debug!("type summary added to {}: {pattern}", self.name);
        Ok(())
    }

    /// Load hook: register every entry of `registry` under its exact
    /// pattern. Running it again leaves the category unchanged.
    ///
    /// # Errors
    ///
    /// Returns an error if a pattern fails to compile.
    pub fn install(&mut self, registry: &Registry) -> Result<()> {
        for (type_name, _) in registry.entries() {
            self.add(&exact_pattern(type_name))?;
        }

        Ok(())
    }

    /// Registered patterns, in registration order.
    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.providers.iter().map(|p| p.pattern.as_str())
    }

    #[must_use]
    /// Whether a value of type `type_name` is routed to the dispatcher.
    pub fn matches(&self, type_name: &str) -> bool {
        self.providers.iter().any(|p| p.regex.is_match(type_name))
    }

    /// Summary for `value`, or `None` to keep the default formatting.
    pub fn provide<V, T>(
        &self,
        renderer: &Renderer<'_>,
        value: &V,
        target: &mut T,
    ) -> Option<String>
    where
        V: Value + ?Sized,
        T: Target + ?Sized,
    {
        if !self.matches(value.type_name()) {
            return None;
        }
        renderer.render(value, target)
    }
}
