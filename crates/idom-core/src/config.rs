use std::rc::Rc;

use crate::collections::map::HashMap;
use crate::component::ComponentRef;

#[derive(Clone, Debug)]
pub struct RendererConfig {
    /// Resolve capitalized string tags through the [`ComponentRegistry`].
    pub compat_capitalized_tags: bool,
    /// Attribute prefixes that mark inline listeners. A prefix containing `-`
    /// accepts any event name (`data-onclick`); a bare prefix such as `on`
    /// only matches when the event name starts uppercase (`onClick`).
    pub listener_prefixes: Vec<String>,
    /// Id given to components created by [`crate::Renderer::mount`].
    pub root_key: String,
    /// Report unbalanced open/close sequences as errors instead of logging
    /// them.
    pub strict_structure: bool,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            compat_capitalized_tags: false,
            listener_prefixes: vec!["data-on".to_string(), "on".to_string()],
            root_key: "root".to_string(),
            strict_structure: true,
        }
    }
}

impl RendererConfig {
    /// Event type named by an inline-listener attribute, lower-cased.
    pub fn listener_event(&self, name: &str) -> Option<String> {
        self.listener_prefixes.iter().find_map(|prefix| {
            let rest = name.strip_prefix(prefix.as_str())?;
            let first = rest.chars().next()?;
            (prefix.contains('-') || first.is_uppercase()).then(|| rest.to_lowercase())
        })
    }
}

/// Names usable as capitalized string tags in compatibility mode.
#[derive(Clone, Default)]
pub struct ComponentRegistry {
    components: HashMap<Rc<str>, ComponentRef>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, ctor: ComponentRef) -> &mut Self {
        self.components.insert(Rc::from(ctor.name()), ctor);
        self
    }

    pub fn get(&self, name: &str) -> Option<&ComponentRef> {
        self.components.get(name)
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listener_event_accepts_both_conventions() {
        let config = RendererConfig::default();
        assert_eq!(config.listener_event("data-onclick").as_deref(), Some("click"));
        assert_eq!(config.listener_event("onClick").as_deref(), Some("click"));
        assert_eq!(config.listener_event("onKeyDown").as_deref(), Some("keydown"));
    }

    #[test]
    fn listener_event_rejects_plain_attributes() {
        let config = RendererConfig::default();
        assert_eq!(config.listener_event("one"), None);
        assert_eq!(config.listener_event("class"), None);
        assert_eq!(config.listener_event("data-on"), None);
        assert_eq!(config.listener_event("on"), None);
    }
}
