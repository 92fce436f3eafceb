use std::{collections::HashMap, path::Path, sync::Arc};

use serde_json::Value;

use crate::{
    agent::{self, ScoutApmAgent},
    error::ViewError,
};

/// Engines whose renders are recorded as `View/<name>` spans.
pub const VIEW_ENGINES_TO_WRAP: [&str; 3] = ["file", "php", "blade"];

/// A view rendering engine.
///
/// `name` is the logical view name, `path` the resolved template file.
pub trait Engine: Send + Sync {
    fn render(&self, name: &str, path: &Path, data: &Value) -> Result<String, ViewError>;
}

/// Brackets every render of the wrapped engine in a `View/<name>` span.
/// Output and errors are passed through unchanged.
pub struct ScoutViewEngineDecorator {
    engine: Arc<dyn Engine>,
    agent: Arc<dyn ScoutApmAgent>,
}

impl ScoutViewEngineDecorator {
    pub fn new(engine: Arc<dyn Engine>, agent: Arc<dyn ScoutApmAgent>) -> Self {
        ScoutViewEngineDecorator { engine, agent }
    }
}

impl Engine for ScoutViewEngineDecorator {
    fn render(&self, name: &str, path: &Path, data: &Value) -> Result<String, ViewError> {
        if !agent::is_active(self.agent.as_ref()) {
            return self.engine.render(name, path, data);
        }

        self.agent
            .start_span(&format!("View/{name}"))
            .in_scope(|| self.engine.render(name, path, data))
    }
}

/// Named rendering engines.
#[derive(Default, Clone)]
pub struct EngineResolver {
    engines: HashMap<String, Arc<dyn Engine>>,
}

impl EngineResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `engine` under `name`, replacing any previous one.
    pub fn register(&mut self, name: impl Into<String>, engine: Arc<dyn Engine>) {
        self.engines.insert(name.into(), engine);
    }

    pub fn resolve(&self, name: &str) -> Option<Arc<dyn Engine>> {
        self.engines.get(name).cloned()
    }
}

/// Replaces each engine in [`VIEW_ENGINES_TO_WRAP`] with a
/// [`ScoutViewEngineDecorator`] around it.
pub fn wrap_engines(resolver: &mut EngineResolver, agent: &Arc<dyn ScoutApmAgent>) {
    for name in VIEW_ENGINES_TO_WRAP {
        let Some(engine) = resolver.resolve(name) else {
            tracing::debug!(engine = name, "[Scout] view engine not registered, not wrapping");
            continue;
        };

        resolver.register(
            name,
            Arc::new(ScoutViewEngineDecorator::new(engine, Arc::clone(agent))),
        );
    }
}
