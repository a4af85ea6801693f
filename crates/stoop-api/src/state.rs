use std::sync::Arc;

use stoop_db::Database;
use stoop_gateway::{DispatchEngine, UnreadAggregator};

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub engine: DispatchEngine,
    pub unread: UnreadAggregator,
}
