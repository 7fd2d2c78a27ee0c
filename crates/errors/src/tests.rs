use crate::*;
use uuid::Uuid;

#[test]
fn test_error_display() {
    let err = OrchestratorError::ValidationError("priority out of range".to_string());
    assert_eq!(err.to_string(), "数据验证失败: priority out of range");

    let holder = Uuid::nil();
    let err = OrchestratorError::LockConflict {
        resource_type: "table".to_string(),
        resource_id: "orders".to_string(),
        holder,
        held_as: "EXCLUSIVE".to_string(),
    };
    assert_eq!(
        err.to_string(),
        format!("资源锁冲突: table/orders 已被请求 {holder} 以 EXCLUSIVE 方式持有")
    );

    let err = OrchestratorError::QuotaExceeded {
        tenant_id: "acme".to_string(),
        resource_type: "concurrent_imports".to_string(),
        requested: 1,
        consumed: 2,
        limit: 2,
    };
    assert!(err.to_string().contains("acme"));
    assert!(err.to_string().contains("上限 2"));
}

#[test]
fn test_admission_blocked_classification() {
    let quota = OrchestratorError::QuotaExceeded {
        tenant_id: "t".to_string(),
        resource_type: "memory".to_string(),
        requested: 10,
        consumed: 1020,
        limit: 1024,
    };
    assert!(quota.is_admission_blocked());
    assert!(quota.is_retryable());

    let reservation = OrchestratorError::ReservationConflict {
        resource_type: "cpu_slots".to_string(),
        requested: 2,
        peak: 7,
        capacity: 8,
    };
    assert!(reservation.is_admission_blocked());

    let cycle = OrchestratorError::CycleError {
        orchestration_id: Uuid::nil(),
        depends_on_id: Uuid::nil(),
    };
    assert!(!cycle.is_admission_blocked());
    assert!(!cycle.is_retryable());

    let validation = OrchestratorError::validation_error("bad");
    assert!(!validation.is_retryable());
}

#[test]
fn test_runtime_errors_are_retryable() {
    assert!(OrchestratorError::timeout_error("30m").is_retryable());
    assert!(OrchestratorError::executor_failure("boom").is_retryable());
    assert!(OrchestratorError::LockConflict {
        resource_type: "table".to_string(),
        resource_id: "x".to_string(),
        holder: Uuid::nil(),
        held_as: "SHARED".to_string(),
    }
    .is_retryable());
    assert!(!OrchestratorError::internal("x").is_retryable());
    assert!(OrchestratorError::internal("x").is_fatal());
}

#[test]
fn test_error_kind_labels() {
    assert_eq!(
        OrchestratorError::RequestNotFound { id: Uuid::nil() }.error_kind(),
        "not_found"
    );
    assert_eq!(
        OrchestratorError::timeout_error("x").error_kind(),
        "execution_timeout"
    );
    assert_eq!(
        OrchestratorError::config_error("x").error_kind(),
        "configuration"
    );
}

#[test]
fn test_conversions() {
    let json_err = serde_json::from_str::<serde_json::Value>("{bad").unwrap_err();
    let err: OrchestratorError = json_err.into();
    assert!(matches!(err, OrchestratorError::Serialization(_)));

    let err: OrchestratorError = anyhow::anyhow!("wrapped").into();
    assert!(matches!(err, OrchestratorError::Internal(ref m) if m == "wrapped"));

    let err: OrchestratorError = Uuid::parse_str("not-a-uuid").unwrap_err().into();
    assert!(matches!(err, OrchestratorError::Serialization(_)));
}

#[test]
fn test_user_message() {
    let err = OrchestratorError::ScheduleNotFound { id: Uuid::nil() };
    assert_eq!(err.user_message(), "请求的调度不存在");
    assert_eq!(
        OrchestratorError::internal("x").user_message(),
        "系统繁忙，请稍后重试"
    );
}
