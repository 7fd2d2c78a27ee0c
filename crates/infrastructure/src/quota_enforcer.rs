//! 租户配额
//!
//! 配额在租户首次出现时按配置写入默认值。用量来自 `ResourceUsageSource`
//! （导入队列中排队与执行中的请求）。`admit_request` 在租户级互斥锁内完成
//! 检查与入队，同一租户的并发提交不会同时通过检查。

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use dashmap::DashMap;
use orchestrator_config::QuotaConfig;
use orchestrator_domain::{
    resource_types, AuditEventType, EnforcementLevel, ResourceRequirements, TenantLimit,
};
use orchestrator_errors::{OrchestratorError, OrchestratorResult};
use tracing::{debug, info, warn};

use crate::audit::AuditTrail;
use crate::observability::{MetricsCollector, StructuredLogger};

/// 租户资源用量来源
pub trait ResourceUsageSource: Send + Sync {
    fn consumed(&self, tenant_id: &str, resource_type: &str) -> u64;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuotaDecision {
    Allow,
    AllowWithWarning(String),
    Deny(String),
}

impl QuotaDecision {
    pub fn is_allowed(&self) -> bool {
        !matches!(self, QuotaDecision::Deny(_))
    }

    fn label(&self) -> &'static str {
        match self {
            QuotaDecision::Allow => "allow",
            QuotaDecision::AllowWithWarning(_) => "warn",
            QuotaDecision::Deny(_) => "deny",
        }
    }
}

/// 默认配额模板
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LimitTemplate {
    pub resource_type: String,
    pub resource_limit: u64,
    pub resource_unit: String,
    pub enforcement_level: EnforcementLevel,
}

impl LimitTemplate {
    pub fn from_config(config: &QuotaConfig) -> OrchestratorResult<Vec<Self>> {
        config
            .default_limits
            .iter()
            .map(|limit| {
                let enforcement_level = match limit.enforcement_level.as_str() {
                    "HARD" => EnforcementLevel::Hard,
                    "SOFT" => EnforcementLevel::Soft,
                    "ADVISORY" => EnforcementLevel::Advisory,
                    other => {
                        return Err(OrchestratorError::config_error(format!(
                            "未知的配额执行级别: {other}"
                        )))
                    }
                };
                Ok(Self {
                    resource_type: limit.resource_type.clone(),
                    resource_limit: limit.limit,
                    resource_unit: limit.unit.clone(),
                    enforcement_level,
                })
            })
            .collect()
    }

    fn for_tenant(&self, tenant_id: &str) -> TenantLimit {
        TenantLimit::new(
            tenant_id,
            self.resource_type.clone(),
            self.resource_limit,
            self.resource_unit.clone(),
            self.enforcement_level,
        )
    }
}

pub struct TenantQuotaEnforcer {
    defaults: Vec<LimitTemplate>,
    limits: DashMap<String, BTreeMap<String, TenantLimit>>,
    tenant_locks: DashMap<String, Arc<Mutex<()>>>,
    usage: Arc<dyn ResourceUsageSource>,
    audit: AuditTrail,
    metrics: Arc<MetricsCollector>,
}

impl TenantQuotaEnforcer {
    pub fn new(
        defaults: Vec<LimitTemplate>,
        usage: Arc<dyn ResourceUsageSource>,
        audit: AuditTrail,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            defaults,
            limits: DashMap::new(),
            tenant_locks: DashMap::new(),
            usage,
            audit,
            metrics,
        }
    }

    fn ensure_seeded(&self, tenant_id: &str) {
        self.limits.entry(tenant_id.to_string()).or_insert_with(|| {
            debug!(tenant.id = tenant_id, "写入租户默认配额");
            self.defaults
                .iter()
                .map(|template| (template.resource_type.clone(), template.for_tenant(tenant_id)))
                .collect()
        });
    }

    fn tenant_lock(&self, tenant_id: &str) -> Arc<Mutex<()>> {
        self.tenant_locks
            .entry(tenant_id.to_string())
            .or_default()
            .value()
            .clone()
    }

    pub fn limit_for(&self, tenant_id: &str, resource_type: &str) -> Option<TenantLimit> {
        self.ensure_seeded(tenant_id);
        self.limits
            .get(tenant_id)
            .and_then(|limits| limits.get(resource_type).cloned())
    }

    pub fn limits_for(&self, tenant_id: &str) -> Vec<TenantLimit> {
        self.ensure_seeded(tenant_id);
        self.limits
            .get(tenant_id)
            .map(|limits| limits.values().cloned().collect())
            .unwrap_or_default()
    }

    /// 运维修改配额；替换 (tenant, resource_type) 上已有的值
    pub fn set_limit(&self, limit: TenantLimit) -> OrchestratorResult<()> {
        limit.validate()?;
        self.ensure_seeded(&limit.tenant_id);
        let tenant_id = limit.tenant_id.clone();
        let details = serde_json::json!({
            "resource_type": limit.resource_type,
            "resource_limit": limit.resource_limit,
            "resource_unit": limit.resource_unit,
            "enforcement_level": limit.enforcement_level,
        });
        self.limits
            .entry(tenant_id.clone())
            .or_default()
            .insert(limit.resource_type.clone(), limit);

        info!(tenant.id = %tenant_id, "租户配额已更新");
        self.audit
            .record(AuditEventType::TenantLimitUpdated, &tenant_id, details);
        Ok(())
    }

    pub fn consumed(&self, tenant_id: &str, resource_type: &str) -> u64 {
        self.usage.consumed(tenant_id, resource_type)
    }

    fn evaluate(limit: &TenantLimit, consumed: u64, requested: u64) -> QuotaDecision {
        if consumed.saturating_add(requested) <= limit.resource_limit {
            return QuotaDecision::Allow;
        }
        let reason = format!(
            "租户 {} 资源 {} 请求 {}{}, 已使用 {}, 上限 {}",
            limit.tenant_id,
            limit.resource_type,
            requested,
            limit.resource_unit,
            consumed,
            limit.resource_limit
        );
        match limit.enforcement_level {
            EnforcementLevel::Hard => QuotaDecision::Deny(reason),
            EnforcementLevel::Soft => QuotaDecision::AllowWithWarning(reason),
            EnforcementLevel::Advisory => {
                info!(tenant.id = %limit.tenant_id, reason = %reason, "超出建议配额");
                QuotaDecision::Allow
            }
        }
    }

    /// 单一资源类型的准入判断，不加租户锁
    pub fn admit(&self, tenant_id: &str, resource_type: &str, requested: u64) -> QuotaDecision {
        let Some(limit) = self.limit_for(tenant_id, resource_type) else {
            return QuotaDecision::Allow;
        };
        let consumed = self.consumed(tenant_id, resource_type);
        let decision = Self::evaluate(&limit, consumed, requested);
        self.metrics
            .record_quota_decision(resource_type, decision.label());
        decision
    }

    /// 检查租户全部配额，通过后在持有租户锁的情况下执行 `on_admit`
    ///
    /// `concurrent_imports` 未显式声明时按 1 计算。HARD 超限返回 `QuotaExceeded`，
    /// `on_admit` 不会被调用。
    pub fn admit_request<T, F>(
        &self,
        tenant_id: &str,
        requirements: &ResourceRequirements,
        on_admit: F,
    ) -> OrchestratorResult<T>
    where
        F: FnOnce() -> OrchestratorResult<T>,
    {
        let lock = self.tenant_lock(tenant_id);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        for limit in self.limits_for(tenant_id) {
            let requested = match requirements.get(&limit.resource_type) {
                Some(amount) => *amount,
                None if limit.resource_type == resource_types::CONCURRENT_IMPORTS => 1,
                None => 0,
            };
            if requested == 0 {
                continue;
            }

            let consumed = self.consumed(tenant_id, &limit.resource_type);
            let decision = Self::evaluate(&limit, consumed, requested);
            self.metrics
                .record_quota_decision(&limit.resource_type, decision.label());

            match decision {
                QuotaDecision::Allow => {}
                QuotaDecision::AllowWithWarning(reason) => {
                    warn!(tenant.id = tenant_id, reason = %reason, "超出软配额，仍然放行");
                    self.audit.record(
                        AuditEventType::QuotaWarning,
                        tenant_id,
                        serde_json::json!({
                            "resource_type": limit.resource_type,
                            "requested": requested,
                            "consumed": consumed,
                            "limit": limit.resource_limit,
                        }),
                    );
                }
                QuotaDecision::Deny(_) => {
                    StructuredLogger::log_quota_denied(
                        tenant_id,
                        &limit.resource_type,
                        requested,
                        consumed,
                        limit.resource_limit,
                    );
                    self.audit.record(
                        AuditEventType::QuotaDenied,
                        tenant_id,
                        serde_json::json!({
                            "resource_type": limit.resource_type,
                            "requested": requested,
                            "consumed": consumed,
                            "limit": limit.resource_limit,
                        }),
                    );
                    return Err(OrchestratorError::QuotaExceeded {
                        tenant_id: tenant_id.to_string(),
                        resource_type: limit.resource_type,
                        requested,
                        consumed,
                        limit: limit.resource_limit,
                    });
                }
            }
        }

        on_admit()
    }
}
