//! Shared `axum` application state: one handle per subsystem, bundling
//! the metrics and object stores the HTTP layer reads.

use std::sync::Arc;

use swarmd_dns::Dns;
use swarmd_membership::MembershipHandle;
use swarmd_registry::Registry;
use swarmd_store::Store;
use swarmd_workload::Workload;

use crate::metrics::Metrics;

#[derive(Clone)]
pub struct AppState {
    pub membership: MembershipHandle,
    pub store: Arc<Store>,
    pub registry: Arc<Registry>,
    pub dns: Arc<Dns>,
    pub workload: Arc<Workload>,
    pub metrics: Arc<Metrics>,
}
