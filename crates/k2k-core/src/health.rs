//! Component health tracking for the health endpoints.

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Instant;

/// Input consumer.
pub const KAFKA: &str = "kafka";
/// Schema provider.
pub const SCHEMA_REGISTRY: &str = "schema_registry";
/// Output and dead-letter producers.
pub const PRODUCER: &str = "producer";

/// Health status of a component.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "lowercase")]
pub enum ComponentStatus {
    /// Component is healthy
    Healthy,
    /// Component works but reported a problem
    Degraded(String),
    /// Component is unhealthy
    Unhealthy(String),
    /// Component has not reported yet
    Unknown,
}

/// Overall system health status.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Snapshot served by the health endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub pipeline_running: bool,
    pub uptime_seconds: u64,
    pub components: BTreeMap<String, ComponentStatus>,
}

/// Registry of component statuses shared between the engine and the HTTP server.
pub struct HealthCheck {
    components: RwLock<BTreeMap<String, ComponentStatus>>,
    started_at: Instant,
    pipeline_running: RwLock<bool>,
}

impl HealthCheck {
    pub fn new() -> Self {
        Self {
            components: RwLock::new(BTreeMap::new()),
            started_at: Instant::now(),
            pipeline_running: RwLock::new(false),
        }
    }

    /// Health check with the pipeline components registered as unknown.
    pub fn for_pipeline() -> Self {
        let health = Self::new();
        for name in [KAFKA, SCHEMA_REGISTRY, PRODUCER] {
            health.register_component(name);
        }
        health
    }

    pub fn register_component(&self, name: &str) {
        self.components
            .write()
            .insert(name.to_string(), ComponentStatus::Unknown);
    }

    pub fn mark_healthy(&self, name: &str) {
        self.set(name, ComponentStatus::Healthy);
    }

    pub fn mark_degraded(&self, name: &str, reason: &str) {
        self.set(name, ComponentStatus::Degraded(reason.to_string()));
    }

    pub fn mark_unhealthy(&self, name: &str, reason: &str) {
        self.set(name, ComponentStatus::Unhealthy(reason.to_string()));
    }

    fn set(&self, name: &str, status: ComponentStatus) {
        self.components.write().insert(name.to_string(), status);
    }

    pub fn get_component_status(&self, name: &str) -> Option<ComponentStatus> {
        self.components.read().get(name).cloned()
    }

    /// Worst status across all components. Unknown counts as healthy.
    pub fn overall_status(&self) -> HealthStatus {
        let components = self.components.read();

        let mut has_degraded = false;
        for status in components.values() {
            match status {
                ComponentStatus::Unhealthy(_) => return HealthStatus::Unhealthy,
                ComponentStatus::Degraded(_) => has_degraded = true,
                _ => {}
            }
        }

        if has_degraded {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }

    /// Healthy or degraded.
    pub fn is_operational(&self) -> bool {
        self.overall_status() != HealthStatus::Unhealthy
    }

    /// Operational and the pipeline loop is running.
    pub fn is_ready(&self) -> bool {
        self.is_pipeline_running() && self.is_operational()
    }

    pub fn pipeline_started(&self) {
        *self.pipeline_running.write() = true;
    }

    pub fn pipeline_stopped(&self) {
        *self.pipeline_running.write() = false;
    }

    pub fn is_pipeline_running(&self) -> bool {
        *self.pipeline_running.read()
    }

    pub fn report(&self) -> HealthReport {
        HealthReport {
            status: self.overall_status(),
            pipeline_running: self.is_pipeline_running(),
            uptime_seconds: self.started_at.elapsed().as_secs(),
            components: self.components.read().clone(),
        }
    }
}

impl Default for HealthCheck {
    fn default() -> Self {
        Self::new()
    }
}
