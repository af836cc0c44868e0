use std::sync::Arc;

use crate::{config::Config, service::BoltCardService, withdraw::WithdrawHandler};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub cards: Arc<BoltCardService>,
    pub withdraw: Arc<WithdrawHandler>,
}
