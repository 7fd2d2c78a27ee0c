//! 资源预留
//!
//! 按资源类型分组保存预留，同一类型的操作串行化。冲突检测使用
//! 请求窗口 [from, until) 内持有中预留的并发峰值，而不是简单求和，
//! 因此首尾相接的窗口不会互相挤占容量。

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use orchestrator_domain::{AuditEventType, ResourceReservation, ReservationStatus};
use orchestrator_errors::{OrchestratorError, OrchestratorResult};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::audit::AuditTrail;
use crate::observability::MetricsCollector;

pub struct ResourceReservationManager {
    capacities: BTreeMap<String, u64>,
    by_type: DashMap<String, Vec<ResourceReservation>>,
    index: DashMap<Uuid, String>,
    audit: AuditTrail,
    metrics: Arc<MetricsCollector>,
}

/// 窗口内持有中预留的并发峰值
fn peak_within(
    reservations: &[ResourceReservation],
    from: DateTime<Utc>,
    until: DateTime<Utc>,
) -> u64 {
    let mut events: Vec<(DateTime<Utc>, i128)> = Vec::new();
    for r in reservations
        .iter()
        .filter(|r| r.is_holding() && r.overlaps(from, until))
    {
        events.push((r.reserved_from.max(from), r.resource_amount as i128));
        events.push((r.reserved_until.min(until), -(r.resource_amount as i128)));
    }
    // 同一时刻先结束后开始，符合半开区间
    events.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));

    let mut current: i128 = 0;
    let mut peak: i128 = 0;
    for (_, delta) in events {
        current += delta;
        peak = peak.max(current);
    }
    peak as u64
}

impl ResourceReservationManager {
    pub fn new(
        capacities: BTreeMap<String, u64>,
        audit: AuditTrail,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            capacities,
            by_type: DashMap::new(),
            index: DashMap::new(),
            audit,
            metrics,
        }
    }

    /// 未配置容量的类型不受限制
    pub fn capacity(&self, resource_type: &str) -> Option<u64> {
        self.capacities.get(resource_type).copied()
    }

    pub fn reserve(
        &self,
        schedule_id: Uuid,
        tenant_id: &str,
        resource_type: &str,
        amount: u64,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> OrchestratorResult<ResourceReservation> {
        if amount == 0 {
            return Err(OrchestratorError::validation_error(format!(
                "预留数量必须为正数: {resource_type}"
            )));
        }
        if from >= until {
            return Err(OrchestratorError::validation_error(format!(
                "预留窗口无效: {from} >= {until}"
            )));
        }

        let reservation = {
            let mut entry = self.by_type.entry(resource_type.to_string()).or_default();
            let peak = peak_within(entry.value(), from, until);
            if let Some(capacity) = self.capacity(resource_type) {
                if peak.saturating_add(amount) > capacity {
                    drop(entry);
                    warn!(
                        resource_type,
                        requested = amount,
                        peak,
                        capacity,
                        "资源预留冲突"
                    );
                    self.metrics.record_reservation_conflict(resource_type);
                    return Err(OrchestratorError::ReservationConflict {
                        resource_type: resource_type.to_string(),
                        requested: amount,
                        peak,
                        capacity,
                    });
                }
            }
            let reservation =
                ResourceReservation::new(schedule_id, tenant_id, resource_type, amount, from, until);
            entry.value_mut().push(reservation.clone());
            reservation
        };
        self.index
            .insert(reservation.id, reservation.resource_type.clone());

        debug!(
            reservation.id = %reservation.id,
            schedule.id = %schedule_id,
            resource_type,
            amount,
            "创建资源预留"
        );
        self.audit.record(
            AuditEventType::ReservationCreated,
            reservation.id,
            serde_json::json!({
                "schedule_id": schedule_id,
                "tenant_id": tenant_id,
                "resource_type": resource_type,
                "amount": amount,
                "reserved_from": from,
                "reserved_until": until,
            }),
        );
        Ok(reservation)
    }

    fn update<F>(&self, id: Uuid, apply: F) -> OrchestratorResult<ResourceReservation>
    where
        F: FnOnce(&mut ResourceReservation) -> OrchestratorResult<()>,
    {
        let resource_type = self
            .index
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or(OrchestratorError::ReservationNotFound { id })?;
        let mut entry = self
            .by_type
            .get_mut(&resource_type)
            .ok_or(OrchestratorError::ReservationNotFound { id })?;
        let reservation = entry
            .value_mut()
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(OrchestratorError::ReservationNotFound { id })?;
        apply(reservation)?;
        Ok(reservation.clone())
    }

    pub fn activate(&self, id: Uuid) -> OrchestratorResult<ResourceReservation> {
        let reservation = self.update(id, |r| r.activate())?;
        self.audit.record(
            AuditEventType::ReservationActivated,
            id,
            serde_json::json!({ "schedule_id": reservation.schedule_id }),
        );
        Ok(reservation)
    }

    pub fn release(&self, id: Uuid) -> OrchestratorResult<ResourceReservation> {
        let reservation = self.update(id, |r| r.release())?;
        self.audit.record(
            AuditEventType::ReservationReleased,
            id,
            serde_json::json!({ "schedule_id": reservation.schedule_id }),
        );
        Ok(reservation)
    }

    pub fn expire(&self, id: Uuid, now: DateTime<Utc>) -> OrchestratorResult<ResourceReservation> {
        let reservation = self.update(id, |r| r.expire(now))?;
        self.audit.record(
            AuditEventType::ReservationExpired,
            id,
            serde_json::json!({ "schedule_id": reservation.schedule_id }),
        );
        Ok(reservation)
    }

    /// 把窗口已结束但仍在持有的预留标记为 EXPIRED
    ///
    /// 同时丢弃窗口已结束的 RELEASED/EXPIRED 预留。本轮刚过期的预留
    /// 保留到下一轮，期间仍可查询。
    pub fn expire_overdue(&self, now: DateTime<Utc>) -> usize {
        let mut expired = Vec::new();
        let mut pruned = Vec::new();
        for mut entry in self.by_type.iter_mut() {
            entry.value_mut().retain_mut(|reservation| {
                if reservation.reserved_until > now {
                    return true;
                }
                if reservation.is_holding() {
                    if reservation.expire(now).is_ok() {
                        expired.push((reservation.id, reservation.schedule_id));
                    }
                    return true;
                }
                pruned.push(reservation.id);
                false
            });
        }
        self.by_type.retain(|_, reservations| !reservations.is_empty());
        for id in &pruned {
            self.index.remove(id);
        }

        for (id, schedule_id) in &expired {
            self.audit.record(
                AuditEventType::ReservationExpired,
                id,
                serde_json::json!({ "schedule_id": schedule_id }),
            );
        }
        if !expired.is_empty() {
            info!(count = expired.len(), "资源预留已过期");
        }
        if !pruned.is_empty() {
            debug!(count = pruned.len(), "清理已结束的资源预留");
        }
        expired.len()
    }

    /// 释放调度的全部持有中预留
    pub fn release_for_schedule(&self, schedule_id: Uuid) -> usize {
        let mut released = Vec::new();
        for mut entry in self.by_type.iter_mut() {
            for reservation in entry.value_mut().iter_mut() {
                if reservation.schedule_id == schedule_id && reservation.release().is_ok() {
                    released.push(reservation.id);
                }
            }
        }
        for id in &released {
            self.audit.record(
                AuditEventType::ReservationReleased,
                id,
                serde_json::json!({ "schedule_id": schedule_id }),
            );
        }
        released.len()
    }

    pub fn get(&self, id: Uuid) -> Option<ResourceReservation> {
        let resource_type = self.index.get(&id)?.value().clone();
        self.by_type
            .get(&resource_type)?
            .iter()
            .find(|r| r.id == id)
            .cloned()
    }

    pub fn find_for_schedule(&self, schedule_id: Uuid) -> Vec<ResourceReservation> {
        self.collect(|r| r.schedule_id == schedule_id)
    }

    /// 调度在 `at` 时刻可直接激活的 RESERVED 预留
    pub fn find_reserved_covering(
        &self,
        schedule_id: Uuid,
        at: DateTime<Utc>,
    ) -> Vec<ResourceReservation> {
        self.collect(|r| {
            r.schedule_id == schedule_id && r.status == ReservationStatus::Reserved && r.covers(at)
        })
    }

    pub fn list_by_status(&self, status: ReservationStatus) -> Vec<ResourceReservation> {
        self.collect(|r| r.status == status)
    }

    pub fn list_by_tenant(&self, tenant_id: &str) -> Vec<ResourceReservation> {
        self.collect(|r| r.tenant_id == tenant_id)
    }

    pub fn peak_usage(&self, resource_type: &str, from: DateTime<Utc>, until: DateTime<Utc>) -> u64 {
        self.by_type
            .get(resource_type)
            .map(|entry| peak_within(entry.value(), from, until))
            .unwrap_or(0)
    }

    /// 当前保存的预留数量，包括尚未清理的已结束预留
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    fn collect<P>(&self, predicate: P) -> Vec<ResourceReservation>
    where
        P: Fn(&ResourceReservation) -> bool,
    {
        let mut found: Vec<ResourceReservation> = self
            .by_type
            .iter()
            .flat_map(|entry| {
                entry
                    .value()
                    .iter()
                    .filter(|r| predicate(r))
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect();
        found.sort_by_key(|r| (r.reserved_from, r.created_at));
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::InMemoryAuditSink;
    use chrono::Duration;

    fn manager(capacity: u64) -> ResourceReservationManager {
        let mut capacities = BTreeMap::new();
        capacities.insert("cpu_slots".to_string(), capacity);
        ResourceReservationManager::new(
            capacities,
            AuditTrail::new(Arc::new(InMemoryAuditSink::new())),
            Arc::new(MetricsCollector::new()),
        )
    }

    #[test]
    fn test_conflict_uses_peak_not_sum() {
        let manager = manager(4);
        let t0 = Utc::now();
        let hour = Duration::hours(1);
        let schedule = Uuid::new_v4();

        manager
            .reserve(schedule, "acme", "cpu_slots", 3, t0, t0 + hour)
            .unwrap();
        manager
            .reserve(schedule, "acme", "cpu_slots", 3, t0 + hour, t0 + hour * 2)
            .unwrap();

        // 覆盖两个首尾相接的窗口，峰值为 3
        assert_eq!(manager.peak_usage("cpu_slots", t0, t0 + hour * 2), 3);
        manager
            .reserve(schedule, "acme", "cpu_slots", 1, t0, t0 + hour * 2)
            .unwrap();

        let err = manager
            .reserve(schedule, "acme", "cpu_slots", 1, t0, t0 + hour)
            .unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::ReservationConflict { peak: 4, capacity: 4, .. }
        ));
    }

    #[test]
    fn test_released_reservations_free_capacity() {
        let manager = manager(2);
        let t0 = Utc::now();
        let until = t0 + Duration::minutes(30);
        let r = manager
            .reserve(Uuid::new_v4(), "acme", "cpu_slots", 2, t0, until)
            .unwrap();
        assert!(manager
            .reserve(Uuid::new_v4(), "acme", "cpu_slots", 1, t0, until)
            .is_err());

        manager.release(r.id).unwrap();
        assert!(manager
            .reserve(Uuid::new_v4(), "acme", "cpu_slots", 2, t0, until)
            .is_ok());
    }

    #[test]
    fn test_unconfigured_type_is_unbounded() {
        let manager = manager(1);
        let t0 = Utc::now();
        let until = t0 + Duration::minutes(5);
        for _ in 0..10 {
            manager
                .reserve(Uuid::new_v4(), "acme", "gpu", 100, t0, until)
                .unwrap();
        }
        assert_eq!(manager.capacity("gpu"), None);
    }

    #[test]
    fn test_validation() {
        let manager = manager(1);
        let t0 = Utc::now();
        assert!(matches!(
            manager.reserve(Uuid::new_v4(), "acme", "cpu_slots", 0, t0, t0 + Duration::minutes(1)),
            Err(OrchestratorError::ValidationError(_))
        ));
        assert!(matches!(
            manager.reserve(Uuid::new_v4(), "acme", "cpu_slots", 1, t0, t0),
            Err(OrchestratorError::ValidationError(_))
        ));
    }

    #[test]
    fn test_lifecycle_and_expiry() {
        let manager = manager(8);
        let t0 = Utc::now();
        let schedule = Uuid::new_v4();
        let r = manager
            .reserve(schedule, "acme", "cpu_slots", 1, t0, t0 + Duration::minutes(10))
            .unwrap();

        assert_eq!(manager.find_reserved_covering(schedule, t0).len(), 1);
        manager.activate(r.id).unwrap();
        assert!(manager.activate(r.id).is_err());
        assert!(manager.find_reserved_covering(schedule, t0).is_empty());

        assert_eq!(manager.expire_overdue(t0 + Duration::minutes(5)), 0);
        assert_eq!(manager.expire_overdue(t0 + Duration::minutes(10)), 1);
        assert_eq!(
            manager.get(r.id).unwrap().status,
            ReservationStatus::Expired
        );
        assert!(manager.release(r.id).is_err());
        assert!(matches!(
            manager.release(Uuid::new_v4()),
            Err(OrchestratorError::ReservationNotFound { .. })
        ));
    }

    #[test]
    fn test_finished_reservations_are_pruned_after_window() {
        let manager = manager(8);
        let t0 = Utc::now();
        let hour = Duration::hours(1);
        let schedule = Uuid::new_v4();

        for i in 0..5 {
            let from = t0 + hour * i;
            let r = manager
                .reserve(schedule, "acme", "cpu_slots", 2, from, from + hour)
                .unwrap();
            manager.activate(r.id).unwrap();
            manager.release(r.id).unwrap();
            manager.expire_overdue(from + hour);
            assert!(manager.len() <= 1, "cycle {i}: {} stored", manager.len());
        }

        // 刚过期的预留保留一轮
        let held = manager
            .reserve(schedule, "acme", "cpu_slots", 1, t0 + hour * 5, t0 + hour * 6)
            .unwrap();
        assert_eq!(manager.expire_overdue(t0 + hour * 6), 1);
        assert_eq!(
            manager.get(held.id).unwrap().status,
            ReservationStatus::Expired
        );
        assert_eq!(manager.expire_overdue(t0 + hour * 6), 0);
        assert!(manager.get(held.id).is_none());
        assert!(manager.is_empty());
    }

    #[test]
    fn test_pruning_keeps_unfinished_windows() {
        let manager = manager(8);
        let t0 = Utc::now();
        let schedule = Uuid::new_v4();
        let released = manager
            .reserve(schedule, "acme", "cpu_slots", 1, t0, t0 + Duration::minutes(30))
            .unwrap();
        manager.release(released.id).unwrap();
        let future = manager
            .reserve(
                schedule,
                "acme",
                "cpu_slots",
                1,
                t0 + Duration::hours(1),
                t0 + Duration::hours(2),
            )
            .unwrap();

        // 已释放但窗口未结束的预留仍可查询
        manager.expire_overdue(t0 + Duration::minutes(10));
        assert_eq!(manager.len(), 2);

        manager.expire_overdue(t0 + Duration::minutes(30));
        assert!(manager.get(released.id).is_none());
        assert_eq!(
            manager.get(future.id).unwrap().status,
            ReservationStatus::Reserved
        );
    }

    #[test]
    fn test_release_for_schedule() {
        let manager = manager(8);
        let t0 = Utc::now();
        let schedule = Uuid::new_v4();
        let until = t0 + Duration::minutes(10);
        manager.reserve(schedule, "acme", "cpu_slots", 1, t0, until).unwrap();
        manager.reserve(schedule, "acme", "memory", 512, t0, until).unwrap();
        manager
            .reserve(Uuid::new_v4(), "acme", "cpu_slots", 1, t0, until)
            .unwrap();

        assert_eq!(manager.release_for_schedule(schedule), 2);
        assert_eq!(manager.release_for_schedule(schedule), 0);
        assert_eq!(manager.list_by_status(ReservationStatus::Reserved).len(), 1);
    }
}
