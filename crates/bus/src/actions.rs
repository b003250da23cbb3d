use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::tabs::{TabHandle, TabRegistry};
use tabwire_core::{Error, Result};

/// Which transport an inbound message arrived on. Tab-originated
/// messages carry their browser handle so local handlers can answer
/// "who am I" queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Tab(TabHandle),
    Native,
    Local,
}

pub struct ActionContext {
    pub origin: Origin,
    pub tabs: Arc<TabRegistry>,
}

/// A locally handled action or request. Handlers receive the message
/// `input` and optionally return a payload; the router wraps it into a
/// reply when the message carried a correlation id.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    fn name(&self) -> &str;

    async fn handle(&self, input: &Map<String, Value>, ctx: &ActionContext) -> Result<Option<Value>>;
}

/// Registered mapping from action/request tag to handler. Populated once
/// at startup; duplicate registration is a wiring error and fails fast.
pub struct ActionTable {
    handlers: HashMap<String, Arc<dyn ActionHandler>>,
}

impl ActionTable {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    pub fn with_defaults() -> Self {
        let mut table = Self::new();
        let defaults: [Arc<dyn ActionHandler>; 4] = [
            Arc::new(GetTabIdHandler),
            Arc::new(GetTabNameHandler),
            Arc::new(OpenTabHandler),
            Arc::new(CloseTabHandler),
        ];
        for handler in defaults {
            table
                .register(handler)
                .expect("default action set registers cleanly");
        }
        table
    }

    pub fn register(&mut self, handler: Arc<dyn ActionHandler>) -> Result<()> {
        let name = handler.name().to_string();
        if self.handlers.contains_key(&name) {
            return Err(Error::Config(format!(
                "action {} registered twice",
                name
            )));
        }
        self.handlers.insert(name, handler);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ActionHandler>> {
        self.handlers.get(name).cloned()
    }
}

impl Default for ActionTable {
    fn default() -> Self {
        Self::new()
    }
}

fn required_str<'a>(input: &'a Map<String, Value>, key: &str) -> Result<&'a str> {
    input
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::InvalidMessage(format!("missing input parameter {}", key)))
}

/// Answers the origin tab's browser handle.
struct GetTabIdHandler;

#[async_trait]
impl ActionHandler for GetTabIdHandler {
    fn name(&self) -> &str {
        "get_tab_id"
    }

    async fn handle(&self, _input: &Map<String, Value>, ctx: &ActionContext) -> Result<Option<Value>> {
        match ctx.origin {
            Origin::Tab(handle) => Ok(Some(json!(handle))),
            _ => Err(Error::InvalidMessage(
                "get_tab_id is only meaningful from a tab".to_string(),
            )),
        }
    }
}

/// Answers the origin tab's logical name via reverse lookup.
struct GetTabNameHandler;

#[async_trait]
impl ActionHandler for GetTabNameHandler {
    fn name(&self) -> &str {
        "get_tab_name"
    }

    async fn handle(&self, _input: &Map<String, Value>, ctx: &ActionContext) -> Result<Option<Value>> {
        let Origin::Tab(handle) = ctx.origin else {
            return Err(Error::InvalidMessage(
                "get_tab_name is only meaningful from a tab".to_string(),
            ));
        };
        match ctx.tabs.resolve_reverse(handle) {
            Some(name) => Ok(Some(json!(name))),
            None => Err(Error::TabOperation(format!(
                "no registered tab for handle {}",
                handle
            ))),
        }
    }
}

struct OpenTabHandler;

#[async_trait]
impl ActionHandler for OpenTabHandler {
    fn name(&self) -> &str {
        "open_new_tab"
    }

    async fn handle(&self, input: &Map<String, Value>, ctx: &ActionContext) -> Result<Option<Value>> {
        let url = required_str(input, "url")?;
        let name = required_str(input, "name")?;
        let handle = ctx.tabs.open_tab(url, name).await?;
        Ok(Some(json!(handle)))
    }
}

struct CloseTabHandler;

#[async_trait]
impl ActionHandler for CloseTabHandler {
    fn name(&self) -> &str {
        "close_tab"
    }

    async fn handle(&self, input: &Map<String, Value>, ctx: &ActionContext) -> Result<Option<Value>> {
        let name = required_str(input, "name")?;
        ctx.tabs.close_tab(name).await?;
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tabs::testing::FakeBrowser;
    use std::time::Duration;

    fn ctx(origin: Origin) -> ActionContext {
        let driver = Arc::new(FakeBrowser::new());
        ActionContext {
            origin,
            tabs: Arc::new(TabRegistry::new(driver, Duration::from_millis(200))),
        }
    }

    #[test]
    fn test_duplicate_registration_fails_fast() {
        let mut table = ActionTable::with_defaults();
        let err = table.register(Arc::new(GetTabIdHandler)).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    async fn test_get_tab_id_reports_origin_handle() {
        let table = ActionTable::with_defaults();
        let handler = table.get("get_tab_id").unwrap();

        let result = handler
            .handle(&Map::new(), &ctx(Origin::Tab(42)))
            .await
            .unwrap();
        assert_eq!(result, Some(json!(42)));

        assert!(handler.handle(&Map::new(), &ctx(Origin::Native)).await.is_err());
    }

    #[tokio::test]
    async fn test_get_tab_name_uses_reverse_lookup() {
        let ctx = ctx(Origin::Local);
        let handle = ctx.tabs.open_tab("https://example.com", "tab/Writer").await.unwrap();

        let handler = ActionTable::with_defaults().get("get_tab_name").unwrap();
        let named = ActionContext {
            origin: Origin::Tab(handle),
            tabs: ctx.tabs.clone(),
        };
        assert_eq!(
            handler.handle(&Map::new(), &named).await.unwrap(),
            Some(json!("tab/Writer"))
        );
    }

    #[tokio::test]
    async fn test_open_new_tab_requires_parameters() {
        let handler = ActionTable::with_defaults().get("open_new_tab").unwrap();
        let ctx = ctx(Origin::Native);

        let missing = handler.handle(&Map::new(), &ctx).await.unwrap_err();
        assert!(matches!(missing, Error::InvalidMessage(_)));

        let mut input = Map::new();
        input.insert("url".to_string(), json!("https://example.com"));
        input.insert("name".to_string(), json!("tab/New"));
        let handle = handler.handle(&input, &ctx).await.unwrap();
        assert!(handle.is_some());
        assert!(ctx.tabs.resolve("tab/New").is_some());
    }
}
