//! HTTP surface for the transport adapter and operators

mod handlers;
mod types;

pub use handlers::create_router;
#[allow(unused_imports)] // Public API re-exports
pub use types::*;

use crate::agent::campaign::CampaignManager;
use crate::db::Database;
use crate::runtime::Dispatcher;
use std::path::PathBuf;
use std::sync::Arc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub campaign: Arc<CampaignManager>,
    pub db: Database,
    /// Directory published coupon images are written to
    pub image_dir: PathBuf,
}

impl AppState {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        campaign: Arc<CampaignManager>,
        db: Database,
        image_dir: PathBuf,
    ) -> Self {
        Self {
            dispatcher,
            campaign,
            db,
            image_dir,
        }
    }
}
