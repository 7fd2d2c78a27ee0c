//! 资源锁管理
//!
//! 每个资源键一组持有者，按键加锁（DashMap 分片），不存在全局锁。
//! 获取从不排队等待，冲突直接返回 `LockConflict`，由调用方决定是否重试。
//! 过期的锁在冲突检查中视为不存在，物理删除由清扫任务完成。

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use orchestrator_domain::{AuditEventType, LockType, ResourceKey, ResourceLock};
use orchestrator_errors::{OrchestratorError, OrchestratorResult};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::audit::AuditTrail;
use crate::observability::{MetricsCollector, StructuredLogger};

pub struct ResourceLockManager {
    locks: DashMap<ResourceKey, Vec<ResourceLock>>,
    audit: AuditTrail,
    metrics: Arc<MetricsCollector>,
}

impl ResourceLockManager {
    pub fn new(audit: AuditTrail, metrics: Arc<MetricsCollector>) -> Self {
        Self {
            locks: DashMap::new(),
            audit,
            metrics,
        }
    }

    pub fn acquire(
        &self,
        key: &ResourceKey,
        lock_type: LockType,
        request_id: Uuid,
        ttl: Duration,
    ) -> OrchestratorResult<ResourceLock> {
        self.acquire_at(key, lock_type, request_id, ttl, Utc::now())
    }

    /// 同一请求重复获取已持有的键时续租；SHARED 可在无其他持有者时升级为 EXCLUSIVE
    pub fn acquire_at(
        &self,
        key: &ResourceKey,
        lock_type: LockType,
        request_id: Uuid,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> OrchestratorResult<ResourceLock> {
        if ttl <= Duration::zero() {
            return Err(OrchestratorError::validation_error(format!(
                "锁的 TTL 必须为正数: {key}"
            )));
        }

        let (result, expired) = {
            let mut entry = self.locks.entry(key.clone()).or_default();
            let holders = entry.value_mut();

            let mut expired = Vec::new();
            holders.retain(|lock| {
                if lock.is_expired(now) {
                    expired.push(lock.holder_request_id);
                    false
                } else {
                    true
                }
            });

            let conflict = holders.iter().find(|lock| {
                lock.holder_request_id != request_id && !lock_type.is_compatible_with(lock.lock_type)
            });

            let result = if let Some(conflict) = conflict {
                Err(OrchestratorError::LockConflict {
                    resource_type: key.resource_type.clone(),
                    resource_id: key.resource_id.clone(),
                    holder: conflict.holder_request_id,
                    held_as: conflict.lock_type.to_string(),
                })
            } else if let Some(existing) = holders
                .iter_mut()
                .find(|lock| lock.holder_request_id == request_id)
            {
                existing.expires_at = now + ttl;
                if lock_type == LockType::Exclusive {
                    existing.lock_type = LockType::Exclusive;
                }
                Ok(existing.clone())
            } else {
                let lock = ResourceLock {
                    key: key.clone(),
                    lock_type,
                    holder_request_id: request_id,
                    acquired_at: now,
                    expires_at: now + ttl,
                };
                holders.push(lock.clone());
                Ok(lock)
            };
            (result, expired)
        };

        for holder in expired {
            self.audit.record(
                AuditEventType::LockExpired,
                key,
                serde_json::json!({ "holder_request_id": holder }),
            );
        }

        match &result {
            Ok(lock) => {
                debug!(lock.resource = %key, lock.holder = %request_id, lock.expires_at = %lock.expires_at, "获取资源锁");
                self.audit.record(
                    AuditEventType::LockAcquired,
                    key,
                    serde_json::json!({
                        "holder_request_id": request_id,
                        "lock_type": lock.lock_type,
                        "expires_at": lock.expires_at,
                    }),
                );
            }
            Err(OrchestratorError::LockConflict { holder, held_as, .. }) => {
                StructuredLogger::log_lock_conflict(&key.to_string(), request_id, *holder, held_as);
                self.metrics.record_lock_conflict(&key.resource_type);
            }
            Err(_) => {}
        }
        result
    }

    /// 释放请求在该键上的锁；不存在或已过期时返回 `Ok(false)`
    pub fn release(&self, key: &ResourceKey, request_id: Uuid) -> OrchestratorResult<bool> {
        self.release_at(key, request_id, Utc::now())
    }

    pub fn release_at(
        &self,
        key: &ResourceKey,
        request_id: Uuid,
        now: DateTime<Utc>,
    ) -> OrchestratorResult<bool> {
        let released = match self.locks.get_mut(key) {
            Some(mut holders) => {
                let position = holders
                    .iter()
                    .position(|lock| lock.holder_request_id == request_id);
                match position {
                    Some(index) => !holders.remove(index).is_expired(now),
                    None => false,
                }
            }
            None => false,
        };
        self.locks.remove_if(key, |_, holders| holders.is_empty());

        if released {
            self.audit.record(
                AuditEventType::LockReleased,
                key,
                serde_json::json!({ "holder_request_id": request_id }),
            );
        }
        Ok(released)
    }

    /// 释放某个请求持有的全部锁，返回释放的数量
    pub fn release_all(&self, request_id: Uuid) -> usize {
        let mut released = Vec::new();
        for mut entry in self.locks.iter_mut() {
            let before = entry.value().len();
            entry
                .value_mut()
                .retain(|lock| lock.holder_request_id != request_id);
            if entry.value().len() != before {
                released.push(entry.key().clone());
            }
        }
        self.locks.retain(|_, holders| !holders.is_empty());

        for key in &released {
            self.audit.record(
                AuditEventType::LockReleased,
                key,
                serde_json::json!({ "holder_request_id": request_id }),
            );
        }
        released.len()
    }

    /// 延长未过期的租约
    pub fn renew(
        &self,
        key: &ResourceKey,
        request_id: Uuid,
        ttl: Duration,
    ) -> OrchestratorResult<ResourceLock> {
        self.renew_at(key, request_id, ttl, Utc::now())
    }

    pub fn renew_at(
        &self,
        key: &ResourceKey,
        request_id: Uuid,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> OrchestratorResult<ResourceLock> {
        let renewed = self.locks.get_mut(key).and_then(|mut holders| {
            holders
                .iter_mut()
                .find(|lock| lock.holder_request_id == request_id && !lock.is_expired(now))
                .map(|lock| {
                    lock.expires_at = now + ttl;
                    lock.clone()
                })
        });
        renewed.ok_or_else(|| {
            OrchestratorError::validation_error(format!(
                "请求 {request_id} 未持有 {key} 的有效锁，无法续租"
            ))
        })
    }

    pub fn sweep_expired(&self) -> usize {
        self.sweep_expired_at(Utc::now())
    }

    /// 物理删除已过期的锁
    pub fn sweep_expired_at(&self, now: DateTime<Utc>) -> usize {
        let mut swept = Vec::new();
        for mut entry in self.locks.iter_mut() {
            let key = entry.key().clone();
            entry.value_mut().retain(|lock| {
                if lock.is_expired(now) {
                    swept.push((key.clone(), lock.holder_request_id));
                    false
                } else {
                    true
                }
            });
        }
        self.locks.retain(|_, holders| !holders.is_empty());

        for (key, holder) in &swept {
            self.audit.record(
                AuditEventType::LockExpired,
                key,
                serde_json::json!({ "holder_request_id": holder }),
            );
        }
        if !swept.is_empty() {
            info!(count = swept.len(), "清理过期资源锁");
            self.metrics.record_locks_swept(swept.len());
        }
        swept.len()
    }

    /// 按固定间隔清扫过期锁，直到收到关闭信号
    pub fn spawn_sweeper(
        self: Arc<Self>,
        interval: std::time::Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.sweep_expired();
                    }
                    _ = shutdown.cancelled() => {
                        debug!("锁清扫任务退出");
                        break;
                    }
                }
            }
        })
    }

    pub fn active_locks(&self, key: &ResourceKey) -> Vec<ResourceLock> {
        let now = Utc::now();
        self.locks
            .get(key)
            .map(|holders| {
                holders
                    .iter()
                    .filter(|lock| !lock.is_expired(now))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn locks_held_by(&self, request_id: Uuid) -> Vec<ResourceLock> {
        let now = Utc::now();
        self.locks
            .iter()
            .flat_map(|entry| {
                entry
                    .value()
                    .iter()
                    .filter(|lock| lock.holder_request_id == request_id && !lock.is_expired(now))
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// 当前记录的锁数量，包含尚未清扫的过期锁
    pub fn len(&self) -> usize {
        self.locks.iter().map(|entry| entry.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::InMemoryAuditSink;

    fn manager() -> (ResourceLockManager, Arc<InMemoryAuditSink>) {
        let sink = Arc::new(InMemoryAuditSink::new());
        let manager = ResourceLockManager::new(
            AuditTrail::new(sink.clone()),
            Arc::new(MetricsCollector::new()),
        );
        (manager, sink)
    }

    fn key() -> ResourceKey {
        ResourceKey::new("table", "orders")
    }

    #[test]
    fn test_exclusive_conflicts_with_any_holder() {
        let (manager, _) = manager();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        manager
            .acquire(&key(), LockType::Exclusive, a, Duration::seconds(60))
            .unwrap();

        let err = manager
            .acquire(&key(), LockType::Shared, b, Duration::seconds(60))
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::LockConflict { holder, .. } if holder == a));
        assert!(manager
            .acquire(&key(), LockType::Exclusive, b, Duration::seconds(60))
            .is_err());
    }

    #[test]
    fn test_shared_locks_coexist() {
        let (manager, _) = manager();
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        manager
            .acquire(&key(), LockType::Shared, a, Duration::seconds(60))
            .unwrap();
        manager
            .acquire(&key(), LockType::Shared, b, Duration::seconds(60))
            .unwrap();
        assert_eq!(manager.active_locks(&key()).len(), 2);

        assert!(manager
            .acquire(&key(), LockType::Exclusive, c, Duration::seconds(60))
            .is_err());
    }

    #[test]
    fn test_expired_lock_is_logically_absent() {
        let (manager, _) = manager();
        let now = Utc::now();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        manager
            .acquire_at(&key(), LockType::Exclusive, a, Duration::seconds(10), now)
            .unwrap();

        let later = now + Duration::seconds(10);
        let lock = manager
            .acquire_at(&key(), LockType::Exclusive, b, Duration::seconds(10), later)
            .unwrap();
        assert_eq!(lock.holder_request_id, b);
    }

    #[test]
    fn test_reacquire_renews_lease() {
        let (manager, _) = manager();
        let now = Utc::now();
        let a = Uuid::new_v4();
        manager
            .acquire_at(&key(), LockType::Shared, a, Duration::seconds(10), now)
            .unwrap();
        let renewed = manager
            .acquire_at(&key(), LockType::Exclusive, a, Duration::seconds(30), now)
            .unwrap();
        assert_eq!(renewed.lock_type, LockType::Exclusive);
        assert_eq!(renewed.expires_at, now + Duration::seconds(30));
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_release_is_idempotent() {
        let (manager, sink) = manager();
        let a = Uuid::new_v4();
        manager
            .acquire(&key(), LockType::Exclusive, a, Duration::seconds(60))
            .unwrap();

        assert!(manager.release(&key(), a).unwrap());
        assert!(!manager.release(&key(), a).unwrap());
        assert!(!manager.release(&ResourceKey::new("table", "missing"), a).unwrap());
        assert!(manager.is_empty());
        assert_eq!(sink.events_of_type(AuditEventType::LockReleased).len(), 1);
    }

    #[test]
    fn test_release_all_drops_every_key_of_holder() {
        let (manager, _) = manager();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let other = ResourceKey::new("table", "customers");
        manager
            .acquire(&key(), LockType::Exclusive, a, Duration::seconds(60))
            .unwrap();
        manager
            .acquire(&other, LockType::Shared, a, Duration::seconds(60))
            .unwrap();
        manager
            .acquire(&other, LockType::Shared, b, Duration::seconds(60))
            .unwrap();

        assert_eq!(manager.release_all(a), 2);
        assert!(manager.locks_held_by(a).is_empty());
        assert_eq!(manager.locks_held_by(b).len(), 1);
    }

    #[test]
    fn test_renew_requires_live_lease() {
        let (manager, _) = manager();
        let now = Utc::now();
        let a = Uuid::new_v4();
        manager
            .acquire_at(&key(), LockType::Exclusive, a, Duration::seconds(10), now)
            .unwrap();

        let renewed = manager
            .renew_at(&key(), a, Duration::seconds(60), now + Duration::seconds(5))
            .unwrap();
        assert_eq!(renewed.expires_at, now + Duration::seconds(65));

        assert!(manager
            .renew_at(&key(), a, Duration::seconds(60), now + Duration::seconds(100))
            .is_err());
    }

    #[test]
    fn test_sweep_removes_only_expired() {
        let (manager, sink) = manager();
        let now = Utc::now();
        let other = ResourceKey::new("table", "customers");
        manager
            .acquire_at(&key(), LockType::Exclusive, Uuid::new_v4(), Duration::seconds(5), now)
            .unwrap();
        manager
            .acquire_at(&other, LockType::Exclusive, Uuid::new_v4(), Duration::seconds(50), now)
            .unwrap();

        assert_eq!(manager.sweep_expired_at(now + Duration::seconds(10)), 1);
        assert_eq!(manager.len(), 1);
        assert_eq!(sink.events_of_type(AuditEventType::LockExpired).len(), 1);
    }
}
