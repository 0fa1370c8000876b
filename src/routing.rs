//! Department routing.
//!
//! A routing call narrows the departments handling the complaint's category
//! in three stages, each of which is skipped if it would leave nobody:
//!
//! 1. zone: keep departments in the requested zone
//! 2. proximity: keep departments within `max_distance_km`, nearest first
//! 3. workload: take the least loaded, earliest in the current order on ties
//!
//! The winner's workload is incremented before the decision is returned.
//! Each increment carries its own charge key, reused across retries, so an
//! attempt that committed but timed out is not charged again.
//! When nothing survives, or storage keeps failing, the engine degrades to
//! the configured fallback department or to [`RoutingDecision::Unassigned`].
//! Routing itself never returns an error.

use std::sync::{Arc, RwLock};
use std::time::Instant;

use opentelemetry::KeyValue;
use tracing::{Instrument, info, warn};
use uuid::Uuid;

use crate::config::RoutingConfig;
use crate::error::{Error, Result};
use crate::geo;
use crate::model::{Department, Location, RoutedDepartment, RoutingDecision, RoutingQuery};
use crate::retry::RetryPolicy;
use crate::store::{DepartmentDirectory, WorkloadLedger};
use crate::telemetry::metrics;
use crate::telemetry::spans::{record_candidates, record_routing_outcome, start_routing_span};

pub struct RoutingEngine {
    directory: Arc<dyn DepartmentDirectory>,
    ledger: Arc<dyn WorkloadLedger>,
    config: RwLock<Arc<RoutingConfig>>,
}

impl RoutingEngine {
    pub fn new(
        directory: Arc<dyn DepartmentDirectory>,
        ledger: Arc<dyn WorkloadLedger>,
        config: RoutingConfig,
    ) -> Self {
        Self {
            directory,
            ledger,
            config: RwLock::new(Arc::new(config)),
        }
    }

    /// The configuration the next routing call will use.
    pub fn config(&self) -> Arc<RoutingConfig> {
        self.config.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Swap in new settings. Calls already running keep their snapshot.
    pub fn reload(&self, config: RoutingConfig) {
        let mut guard = self.config.write().unwrap_or_else(|e| e.into_inner());
        *guard = Arc::new(config);
        info!("routing configuration reloaded");
    }

    /// Pick a department for `query` and charge it one unit of workload.
    pub async fn route(&self, query: &RoutingQuery) -> RoutingDecision {
        let config = self.config();
        let span = start_routing_span(query.category);
        let started = Instant::now();

        let decision = async {
            let retry = config.retry_policy();
            match self.route_primary(query, &config, &retry).await {
                Ok(Some(decision)) => decision,
                Ok(None) => self.fallback(&config, &retry).await,
                Err(e) => {
                    warn!(error = %e, category = %query.category, "routing degraded to fallback");
                    self.fallback(&config, &retry).await
                }
            }
        }
        .instrument(span.clone())
        .await;

        record_routing_outcome(
            &span,
            decision.outcome(),
            decision.department().map(|d| d.name.as_str()),
        );
        metrics::routing_decisions().add(
            1,
            &[
                KeyValue::new("category", query.category.as_str()),
                KeyValue::new("outcome", decision.outcome()),
            ],
        );
        metrics::operation_duration_ms().record(
            started.elapsed().as_secs_f64() * 1000.0,
            &[
                KeyValue::new("operation", "route"),
                KeyValue::new("outcome", decision.outcome()),
            ],
        );
        decision
    }

    /// `Ok(None)` means no eligible department.
    async fn route_primary(
        &self,
        query: &RoutingQuery,
        config: &RoutingConfig,
        retry: &RetryPolicy,
    ) -> Result<Option<RoutingDecision>> {
        let candidates = retry
            .run("department.find_by_category", || {
                self.directory.find_by_category(query.category)
            })
            .await?;
        record_candidates(&tracing::Span::current(), candidates.len());

        if candidates.is_empty() {
            warn!(category = %query.category, "no departments handle category");
            return Ok(None);
        }

        let Some(selected) = select_department(candidates, query, config.max_distance_km) else {
            return Ok(None);
        };

        let charge = Uuid::new_v4();
        let workload = retry
            .run("workload.increment", || self.ledger.increment(selected.id, charge))
            .await?;
        record_increment();
        info!(department = %selected.name, workload, "complaint routed");
        Ok(Some(RoutingDecision::Routed(RoutedDepartment::from(&selected))))
    }

    async fn fallback(&self, config: &RoutingConfig, retry: &RetryPolicy) -> RoutingDecision {
        let Some(id) = config.fallback_department_id.filter(|_| config.use_fallback) else {
            warn!("no fallback department configured, complaint left unassigned");
            return RoutingDecision::Unassigned;
        };

        let attempt = async {
            let department = retry
                .run("department.find", || self.directory.find_by_id(id))
                .await?
                .ok_or_else(|| Error::NotFound(format!("fallback department {id}")))?;
            let charge = Uuid::new_v4();
            retry
                .run("workload.increment", || {
                    self.ledger.increment(department.id, charge)
                })
                .await?;
            Ok::<_, Error>(department)
        };

        match attempt.await {
            Ok(department) => {
                record_increment();
                info!(department = %department.name, "complaint sent to fallback department");
                RoutingDecision::Fallback(RoutedDepartment::from(&department))
            }
            Err(e) => {
                warn!(error = %e, fallback = %id, "fallback department unavailable");
                RoutingDecision::Unassigned
            }
        }
    }
}

fn record_increment() {
    metrics::workload_updates().add(1, &[KeyValue::new("direction", "increment")]);
}

// ---------------------------------------------------------------------------
// Selection
// ---------------------------------------------------------------------------

/// Run the zone, proximity and workload stages over `candidates`.
///
/// `candidates` must already be restricted to the query's category.
pub fn select_department(
    candidates: Vec<Department>,
    query: &RoutingQuery,
    max_distance_km: f64,
) -> Option<Department> {
    let mut candidates = candidates;
    if let Some(zone) = query.zone.as_deref().filter(|z| !z.is_empty()) {
        candidates = filter_by_zone(candidates, zone);
    }
    if let Some(origin) = query.location.as_ref().filter(|l| l.has_coordinates()) {
        candidates = filter_by_proximity(candidates, origin, max_distance_km);
    }
    least_loaded(candidates)
}

/// Departments in `zone`, or all of them if none is.
pub fn filter_by_zone(candidates: Vec<Department>, zone: &str) -> Vec<Department> {
    if !candidates.iter().any(|d| d.in_zone(zone)) {
        return candidates;
    }
    candidates.into_iter().filter(|d| d.in_zone(zone)).collect()
}

/// Departments within `max_km` of `origin`, nearest first.
///
/// Departments without a location are never within range. If nobody is in
/// range the input comes back in its original order.
pub fn filter_by_proximity(
    candidates: Vec<Department>,
    origin: &Location,
    max_km: f64,
) -> Vec<Department> {
    let mut nearby: Vec<(f64, &Department)> = candidates
        .iter()
        .filter_map(|d| {
            let km = d.location.as_ref().map_or(f64::INFINITY, |l| geo::distance(origin, l));
            (km <= max_km).then_some((km, d))
        })
        .collect();
    if nearby.is_empty() {
        return candidates;
    }
    // Stable, so equidistant departments keep their prior order.
    nearby.sort_by(|a, b| a.0.total_cmp(&b.0));
    nearby.into_iter().map(|(_, d)| d.clone()).collect()
}

/// Lowest workload wins; the first one in order breaks ties.
pub fn least_loaded(candidates: Vec<Department>) -> Option<Department> {
    candidates.into_iter().min_by_key(Department::workload)
}
