//! Wiring of services, routing and event handlers over one store.

use std::sync::Arc;

use crate::config::RoutingConfig;
use crate::lifecycle::ComplaintService;
use crate::relay::{
    AssignmentHandler, EventBus, NotificationHandler, Relay, RoutingHandler, WorkloadHandler,
};
use crate::routing::RoutingEngine;
use crate::store::{ComplaintStore, DepartmentDirectory, NotificationStore, WorkloadLedger};

/// Everything a running instance needs.
///
/// Build it over [`crate::store::memory::MemoryStore`] for tests and local
/// runs or over [`crate::db::Db`] in production.
pub struct App {
    pub complaints: Arc<ComplaintService>,
    pub routing: Arc<RoutingEngine>,
    pub directory: Arc<dyn DepartmentDirectory>,
    pub ledger: Arc<dyn WorkloadLedger>,
    pub notifications: Arc<dyn NotificationStore>,
    pub relay: Arc<Relay>,
}

impl App {
    pub fn build<S>(store: Arc<S>, bus: Arc<dyn EventBus>, config: RoutingConfig) -> Self
    where
        S: DepartmentDirectory + WorkloadLedger + ComplaintStore + NotificationStore + 'static,
    {
        let directory: Arc<dyn DepartmentDirectory> = store.clone();
        let ledger: Arc<dyn WorkloadLedger> = store.clone();
        let complaint_store: Arc<dyn ComplaintStore> = store.clone();
        let notifications: Arc<dyn NotificationStore> = store;

        let retry = config.retry_policy();
        let routing = Arc::new(RoutingEngine::new(
            Arc::clone(&directory),
            Arc::clone(&ledger),
            config,
        ));
        let complaints = Arc::new(ComplaintService::new(
            Arc::clone(&complaint_store),
            Arc::clone(&directory),
            Arc::clone(&bus),
            retry,
        ));

        let relay = Relay::new()
            .with(Arc::new(RoutingHandler::new(
                Arc::clone(&complaint_store),
                Arc::clone(&routing),
                bus,
            )))
            .with(Arc::new(AssignmentHandler::new(Arc::clone(&complaints))))
            .with(Arc::new(WorkloadHandler::new(Arc::clone(&ledger))))
            .with(Arc::new(NotificationHandler::new(
                complaint_store,
                Arc::clone(&notifications),
            )));

        Self {
            complaints,
            routing,
            directory,
            ledger,
            notifications,
            relay: Arc::new(relay),
        }
    }
}
