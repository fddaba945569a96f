//! Placeholder resolution against the response history, the fixture
//! cache and the extracted list element.
//!
//! The grammar is closed:
//!
//! ```text
//! <current_resource[.path]>
//! <response[N][.path]>        N >= 1 absolute, N < 0 counted from the end
//! <fixture.KEY[.path]>
//! <current_element[.path]>
//! ```
//!
//! Anything else between angle brackets is ordinary text.

use crate::error::{EngineError, EngineResult};
use crate::fixture::FixtureCache;
use crate::history::ResponseHistory;
use crate::model::ResponseRecord;
use crate::validator::get_by_json_path;
use regex::{Captures, Regex};
use serde_json::Value;
use std::sync::LazyLock;
use tracing::debug;

static PLACEHOLDER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"<(?:(current_resource)|(current_element)|response\[(-?\d+)\]|fixture\.([A-Za-z0-9_\-]+))(?:\.([A-Za-z0-9_\-]+(?:\.[A-Za-z0-9_\-]+)*))?>",
    )
    .expect("failed to compile placeholder regex")
});

/// Render a JSON value the way it appears inside a resolved template.
pub fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Read-only view over the state a placeholder may reference.
#[derive(Debug, Clone, Copy)]
pub struct Resolver<'a> {
    history: &'a ResponseHistory,
    fixtures: &'a FixtureCache,
    element: Option<&'a ResponseRecord>,
}

impl<'a> Resolver<'a> {
    pub fn new(history: &'a ResponseHistory, fixtures: &'a FixtureCache) -> Self {
        Self {
            history,
            fixtures,
            element: None,
        }
    }

    /// Make `<current_element...>` refer to `element`.
    pub fn with_element(mut self, element: Option<&'a ResponseRecord>) -> Self {
        self.element = element;
        self
    }

    /// Substitute every placeholder in `template`.
    pub fn resolve(&self, template: &str) -> EngineResult<String> {
        let mut out = String::with_capacity(template.len());
        let mut last = 0;
        for caps in PLACEHOLDER_RE.captures_iter(template) {
            let Some(whole) = caps.get(0) else { continue };
            out.push_str(&template[last..whole.start()]);
            out.push_str(&stringify(&self.lookup(template, &caps)?));
            last = whole.end();
        }
        out.push_str(&template[last..]);
        if last > 0 {
            debug!(template, resolved = %out, "resolved template");
        }
        Ok(out)
    }

    /// Resolve every string inside `value`.
    ///
    /// A string made of exactly one placeholder becomes the referenced
    /// value itself, keeping its JSON type.
    pub fn resolve_json(&self, value: &Value) -> EngineResult<Value> {
        match value {
            Value::String(s) => {
                if let Some(caps) = PLACEHOLDER_RE.captures(s) {
                    if caps.get(0).is_some_and(|m| m.as_str().len() == s.len()) {
                        return self.lookup(s, &caps);
                    }
                }
                Ok(Value::String(self.resolve(s)?))
            }
            Value::Array(items) => items
                .iter()
                .map(|v| self.resolve_json(v))
                .collect::<EngineResult<Vec<_>>>()
                .map(Value::Array),
            Value::Object(map) => {
                let mut resolved = serde_json::Map::with_capacity(map.len());
                for (k, v) in map {
                    resolved.insert(k.clone(), self.resolve_json(v)?);
                }
                Ok(Value::Object(resolved))
            }
            other => Ok(other.clone()),
        }
    }

    fn lookup(&self, template: &str, caps: &Captures<'_>) -> EngineResult<Value> {
        let reference = caps[0].to_string();
        let unresolved = || EngineError::UnresolvedReference {
            template: template.to_string(),
            reference: reference.clone(),
        };
        let path = caps.get(5).map(|m| m.as_str());

        let root: Value = if caps.get(1).is_some() {
            self.history.current().map_err(|_| unresolved())?.body.clone()
        } else if caps.get(2).is_some() {
            self.element.ok_or_else(unresolved)?.body.clone()
        } else if let Some(offset) = caps.get(3) {
            let offset: i64 = offset.as_str().parse().map_err(|_| unresolved())?;
            self.history
                .get_relative(offset)
                .map_err(|_| unresolved())?
                .body
                .clone()
        } else if let Some(key) = caps.get(4) {
            let handle = self
                .fixtures
                .get(key.as_str())
                .map_err(|_| unresolved())?;
            if path == Some("id")
                && get_by_json_path(&handle.attributes, "id").is_none()
            {
                return Ok(Value::String(handle.id));
            }
            handle.attributes
        } else {
            return Err(unresolved());
        };

        match path {
            None => Ok(root),
            Some(p) => get_by_json_path(&root, p).cloned().ok_or_else(|| {
                EngineError::MissingField {
                    template: template.to_string(),
                    path: p.to_string(),
                }
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::ResourceHandle;
    use serde_json::json;

    fn history() -> ResponseHistory {
        let mut history = ResponseHistory::new();
        history.push(ResponseRecord::new(
            201,
            json!({"id": 7, "name": "f1", "tags": ["a", "b"], "enabled": true}),
        ));
        history.push(ResponseRecord::new(
            200,
            json!([{"id": 7, "name": "f1"}, {"id": 8, "name": "f2"}]),
        ));
        history
    }

    async fn cache() -> FixtureCache {
        let cache = FixtureCache::new();
        cache
            .get_or_create("proj1", true, || async {
                Ok(ResourceHandle {
                    id: "p-1".into(),
                    attributes: json!({"uuid": "u-1", "name": "proj1"}),
                })
            })
            .await
            .unwrap();
        cache
    }

    #[tokio::test]
    async fn test_resolves_history_references() {
        let history = history();
        let cache = cache().await;
        let resolver = Resolver::new(&history, &cache);

        assert_eq!(
            resolver.resolve("/functions/<response[1].id>/").unwrap(),
            "/functions/7/"
        );
        assert_eq!(
            resolver.resolve("<response[-1].1.name>").unwrap(),
            "f2"
        );
        assert_eq!(
            resolver.resolve("<current_resource.0.name>-<response[1].enabled>").unwrap(),
            "f1-true"
        );
        assert_eq!(
            resolver.resolve("<response[1].tags>").unwrap(),
            r#"["a","b"]"#
        );
    }

    #[tokio::test]
    async fn test_resolves_fixture_references() {
        let history = ResponseHistory::new();
        let cache = cache().await;
        let resolver = Resolver::new(&history, &cache);

        assert_eq!(resolver.resolve("<fixture.proj1.id>").unwrap(), "p-1");
        assert_eq!(resolver.resolve("<fixture.proj1.uuid>").unwrap(), "u-1");
        assert!(matches!(
            resolver.resolve("<fixture.proj2.id>"),
            Err(EngineError::UnresolvedReference { .. })
        ));
    }

    #[tokio::test]
    async fn test_resolves_current_element() {
        let history = history();
        let cache = cache().await;
        let element = history.extract_element(2, 2).unwrap();

        let bare = Resolver::new(&history, &cache);
        assert!(bare.resolve("<current_element.name>").is_err());

        let resolver = bare.with_element(Some(&element));
        assert_eq!(resolver.resolve("<current_element.name>").unwrap(), "f2");
    }

    #[tokio::test]
    async fn test_unrecognized_syntax_is_literal() {
        let history = history();
        let cache = cache().await;
        let resolver = Resolver::new(&history, &cache);

        for text in [
            "<fname>",
            "a <b> c",
            "<response[x].id>",
            "<current_resource.>",
            "no placeholders here",
        ] {
            assert_eq!(resolver.resolve(text).unwrap(), text);
        }
    }

    #[tokio::test]
    async fn test_resolution_errors() {
        let history = history();
        let cache = cache().await;
        let resolver = Resolver::new(&history, &cache);

        assert!(matches!(
            resolver.resolve("<response[3].id>"),
            Err(EngineError::UnresolvedReference { .. })
        ));
        match resolver.resolve("x <response[1].missing.deep>") {
            Err(EngineError::MissingField { template, path }) => {
                assert_eq!(template, "x <response[1].missing.deep>");
                assert_eq!(path, "missing.deep");
            }
            other => panic!("unexpected {other:?}"),
        }

        let empty = ResponseHistory::new();
        let resolver = Resolver::new(&empty, &cache);
        assert!(matches!(
            resolver.resolve("<current_resource.id>"),
            Err(EngineError::UnresolvedReference { .. })
        ));
    }

    #[tokio::test]
    async fn test_resolve_json_keeps_types() {
        let history = history();
        let cache = cache().await;
        let resolver = Resolver::new(&history, &cache);

        let body = json!({
            "function": "<response[1].id>",
            "label": "copy of <response[1].name>",
            "project": ["<fixture.proj1.id>", 3, null],
        });
        assert_eq!(
            resolver.resolve_json(&body).unwrap(),
            json!({
                "function": 7,
                "label": "copy of f1",
                "project": ["p-1", 3, null],
            })
        );
    }

    #[tokio::test]
    async fn test_resolution_is_idempotent() {
        let history = history();
        let cache = cache().await;
        let resolver = Resolver::new(&history, &cache);
        let template = "<response[2].0.id>/<fixture.proj1.name>";

        let first = resolver.resolve(template).unwrap();
        let second = resolver.resolve(template).unwrap();
        assert_eq!(first, second);
        assert_eq!(history.len(), 2);
        assert_eq!(cache.len(), 1);
    }
}
