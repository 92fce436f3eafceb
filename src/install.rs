use std::sync::Arc;

use crate::{
    agent::ScoutApmAgent,
    database::QueryListener,
    middleware::InstrumentLayer,
    view::{self, EngineResolver},
};

/// Instruments for the host to attach to its request pipeline and its
/// storage layer.
#[derive(Clone)]
pub struct Instruments {
    /// Applied to the service handling requests.
    pub layer: InstrumentLayer,
    /// Invoked by the storage layer after every query.
    pub queries: QueryListener,
}

/// Wraps the view engines registered in `engines` and builds the request
/// and query instruments around `agent`.
pub fn install(agent: Arc<dyn ScoutApmAgent>, engines: &mut EngineResolver) -> Instruments {
    view::wrap_engines(engines, &agent);

    Instruments {
        layer: InstrumentLayer::new(Arc::clone(&agent)),
        queries: QueryListener::new(agent),
    }
}
