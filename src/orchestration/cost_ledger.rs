//! Per-task cost accounting with per-tenant running totals.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

use crate::models::Task;

/// Idempotent per task id: a task is charged once however many COMPLETED
/// events arrive for it.
#[derive(Debug, Default)]
pub struct CostLedger {
    by_task: DashMap<Uuid, f64>,
    by_tenant: DashMap<String, f64>,
}

impl CostLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Charge a completed task its unit cost. Returns the cost charged,
    /// which for a repeat is the original charge.
    pub fn record(&self, task: &Task) -> f64 {
        match self.by_task.entry(task.id) {
            Entry::Occupied(existing) => *existing.get(),
            Entry::Vacant(slot) => {
                let cost = task.task_type.unit_cost();
                slot.insert(cost);
                *self.by_tenant.entry(task.tenant_id.clone()).or_insert(0.0) += cost;
                cost
            }
        }
    }

    pub fn cost_of(&self, task_id: Uuid) -> Option<f64> {
        self.by_task.get(&task_id).map(|cost| *cost)
    }

    pub fn tenant_total(&self, tenant_id: &str) -> f64 {
        self.by_tenant.get(tenant_id).map(|total| *total).unwrap_or(0.0)
    }

    pub fn total(&self) -> f64 {
        self.by_tenant.iter().map(|total| *total.value()).sum()
    }

    pub fn charged_tasks(&self) -> usize {
        self.by_task.len()
    }
}
