use std::sync::Arc;

use confidant_agents::Orchestrator;
use confidant_config::AppConfig;

/// State shared by every request handler.
pub struct AppState {
    pub config: AppConfig,
    pub orchestrator: Arc<Orchestrator>,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(config: AppConfig, orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            config,
            orchestrator,
        }
    }
}
