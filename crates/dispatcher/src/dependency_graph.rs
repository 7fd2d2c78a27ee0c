//! 编排依赖图
//!
//! 节点按下标存放在数组中，`index` 负责 Uuid 到下标的映射。
//! 边 `a -> b` 表示编排 a 依赖编排 b。新增边之前做可达性检查，图始终无环。

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;
use orchestrator_domain::{AuditEventType, DependencyType, OrchestrationDependency, OrchestrationState};
use orchestrator_errors::{OrchestratorError, OrchestratorResult};
use orchestrator_infrastructure::AuditTrail;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Clone)]
struct Node {
    id: Uuid,
    state: OrchestrationState,
    resources_released: bool,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct StateSnapshot {
    state: OrchestrationState,
    resources_released: bool,
}

#[derive(Default)]
struct GraphInner {
    nodes: Vec<Node>,
    index: HashMap<Uuid, usize>,
    edges: HashMap<(usize, usize), OrchestrationDependency>,
    outgoing: Vec<Vec<usize>>,
    incoming: Vec<Vec<usize>>,
}

impl GraphInner {
    fn node_index(&mut self, id: Uuid) -> usize {
        if let Some(&idx) = self.index.get(&id) {
            return idx;
        }
        let idx = self.nodes.len();
        self.nodes.push(Node {
            id,
            state: OrchestrationState::Pending,
            resources_released: false,
        });
        self.outgoing.push(Vec::new());
        self.incoming.push(Vec::new());
        self.index.insert(id, idx);
        idx
    }

    /// 从 `from` 沿依赖方向能否走到 `target`
    fn reaches(&self, from: usize, target: usize) -> bool {
        let mut visited = HashSet::new();
        let mut queue = VecDeque::from([from]);
        while let Some(current) = queue.pop_front() {
            if current == target {
                return true;
            }
            if !visited.insert(current) {
                continue;
            }
            queue.extend(self.outgoing[current].iter().copied());
        }
        false
    }

    fn edge_satisfied(&self, edge: &OrchestrationDependency, target: usize) -> bool {
        let node = &self.nodes[target];
        match edge.dependency_type {
            DependencyType::Sequential | DependencyType::Data => {
                node.state == OrchestrationState::Succeeded
            }
            DependencyType::Resource => node.resources_released || node.state.is_terminal(),
        }
    }

    fn blocking(&self, idx: usize) -> Vec<Uuid> {
        self.outgoing[idx]
            .iter()
            .filter(|&&target| {
                self.edges
                    .get(&(idx, target))
                    .map_or(false, |edge| !self.edge_satisfied(edge, target))
            })
            .map(|&target| self.nodes[target].id)
            .collect()
    }
}

pub struct OrchestrationDependencyGraph {
    inner: RwLock<GraphInner>,
    audit: AuditTrail,
}

impl OrchestrationDependencyGraph {
    pub fn new(audit: AuditTrail) -> Self {
        Self {
            inner: RwLock::new(GraphInner::default()),
            audit,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, GraphInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, GraphInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// 新增依赖边；自依赖或成环时返回 `CycleError`
    ///
    /// 以相同类型重复添加返回已有的边。类型不同时返回 `ValidationError`，
    /// 已有的边保持不变。
    pub fn add_dependency(
        &self,
        orchestration_id: Uuid,
        depends_on_id: Uuid,
        dependency_type: DependencyType,
    ) -> OrchestratorResult<OrchestrationDependency> {
        let cycle = || OrchestratorError::CycleError {
            orchestration_id,
            depends_on_id,
        };
        if orchestration_id == depends_on_id {
            return Err(cycle());
        }

        let dependency = {
            let mut inner = self.write();
            if let (Some(&from), Some(&to)) = (
                inner.index.get(&orchestration_id),
                inner.index.get(&depends_on_id),
            ) {
                if let Some(existing) = inner.edges.get(&(from, to)) {
                    if existing.dependency_type != dependency_type {
                        return Err(OrchestratorError::validation_error(format!(
                            "依赖 {orchestration_id} -> {depends_on_id} 已存在，类型为 {:?}，\
                             需先删除再以 {dependency_type:?} 重新添加",
                            existing.dependency_type
                        )));
                    }
                    debug!(
                        orchestration.id = %orchestration_id,
                        depends_on = %depends_on_id,
                        "依赖已存在"
                    );
                    return Ok(existing.clone());
                }
                if inner.reaches(to, from) {
                    return Err(cycle());
                }
            }

            let from = inner.node_index(orchestration_id);
            let to = inner.node_index(depends_on_id);
            let dependency = OrchestrationDependency {
                orchestration_id,
                depends_on_orchestration_id: depends_on_id,
                dependency_type,
                created_at: Utc::now(),
            };
            inner.edges.insert((from, to), dependency.clone());
            inner.outgoing[from].push(to);
            inner.incoming[to].push(from);
            dependency
        };

        info!(
            orchestration.id = %orchestration_id,
            depends_on = %depends_on_id,
            dependency_type = ?dependency_type,
            "新增编排依赖"
        );
        self.audit.record(
            AuditEventType::DependencyAdded,
            orchestration_id,
            serde_json::json!({
                "depends_on": depends_on_id,
                "dependency_type": dependency_type,
            }),
        );
        Ok(dependency)
    }

    pub fn remove_dependency(&self, orchestration_id: Uuid, depends_on_id: Uuid) -> bool {
        let removed = {
            let mut inner = self.write();
            let (Some(&from), Some(&to)) = (
                inner.index.get(&orchestration_id),
                inner.index.get(&depends_on_id),
            ) else {
                return false;
            };
            if inner.edges.remove(&(from, to)).is_none() {
                return false;
            }
            inner.outgoing[from].retain(|&n| n != to);
            inner.incoming[to].retain(|&n| n != from);
            true
        };
        if removed {
            self.audit.record(
                AuditEventType::DependencyRemoved,
                orchestration_id,
                serde_json::json!({ "depends_on": depends_on_id }),
            );
        }
        removed
    }

    /// 未登记的编排没有依赖，视为满足
    pub fn is_satisfied(&self, orchestration_id: Uuid) -> bool {
        self.blocking_dependencies(orchestration_id).is_empty()
    }

    pub fn blocking_dependencies(&self, orchestration_id: Uuid) -> Vec<Uuid> {
        let inner = self.read();
        match inner.index.get(&orchestration_id) {
            Some(&idx) => inner.blocking(idx),
            None => Vec::new(),
        }
    }

    /// 依赖未满足时返回 `DependencyNotSatisfied`
    pub fn ensure_satisfied(&self, orchestration_id: Uuid) -> OrchestratorResult<()> {
        let blocking = self.blocking_dependencies(orchestration_id);
        if blocking.is_empty() {
            Ok(())
        } else {
            Err(OrchestratorError::DependencyNotSatisfied {
                orchestration_id,
                blocking,
            })
        }
    }

    /// 进入 RUNNING 时清除资源释放标记
    pub fn set_state(&self, orchestration_id: Uuid, state: OrchestrationState) {
        let mut inner = self.write();
        let idx = inner.node_index(orchestration_id);
        let node = &mut inner.nodes[idx];
        if state == OrchestrationState::Running {
            node.resources_released = false;
        }
        debug!(
            orchestration.id = %orchestration_id,
            from = ?node.state,
            to = ?state,
            "编排状态变更"
        );
        node.state = state;
    }

    /// 进入 RUNNING 并返回之前的状态，供入队失败时回滚
    pub(crate) fn enter_running(&self, orchestration_id: Uuid) -> StateSnapshot {
        let mut inner = self.write();
        let idx = inner.node_index(orchestration_id);
        let node = &mut inner.nodes[idx];
        let previous = StateSnapshot {
            state: node.state,
            resources_released: node.resources_released,
        };
        node.state = OrchestrationState::Running;
        node.resources_released = false;
        debug!(
            orchestration.id = %orchestration_id,
            from = ?previous.state,
            "编排进入运行状态"
        );
        previous
    }

    pub(crate) fn restore(&self, orchestration_id: Uuid, snapshot: StateSnapshot) {
        let mut inner = self.write();
        let idx = inner.node_index(orchestration_id);
        let node = &mut inner.nodes[idx];
        node.state = snapshot.state;
        node.resources_released = snapshot.resources_released;
        debug!(
            orchestration.id = %orchestration_id,
            state = ?snapshot.state,
            "回滚编排状态"
        );
    }

    pub fn mark_resources_released(&self, orchestration_id: Uuid) {
        let mut inner = self.write();
        let idx = inner.node_index(orchestration_id);
        inner.nodes[idx].resources_released = true;
    }

    pub fn state(&self, orchestration_id: Uuid) -> Option<OrchestrationState> {
        let inner = self.read();
        inner
            .index
            .get(&orchestration_id)
            .map(|&idx| inner.nodes[idx].state)
    }

    pub fn dependencies_of(&self, orchestration_id: Uuid) -> Vec<OrchestrationDependency> {
        let inner = self.read();
        let Some(&idx) = inner.index.get(&orchestration_id) else {
            return Vec::new();
        };
        inner.outgoing[idx]
            .iter()
            .filter_map(|&to| inner.edges.get(&(idx, to)).cloned())
            .collect()
    }

    pub fn dependents_of(&self, orchestration_id: Uuid) -> Vec<Uuid> {
        let inner = self.read();
        let Some(&idx) = inner.index.get(&orchestration_id) else {
            return Vec::new();
        };
        inner.incoming[idx]
            .iter()
            .map(|&from| inner.nodes[from].id)
            .collect()
    }

    /// 被依赖者排在前面（Kahn 算法）
    pub fn topological_order(&self) -> Vec<Uuid> {
        let inner = self.read();
        let mut remaining: Vec<usize> = inner.outgoing.iter().map(Vec::len).collect();
        let mut queue: VecDeque<usize> = remaining
            .iter()
            .enumerate()
            .filter(|(_, &count)| count == 0)
            .map(|(idx, _)| idx)
            .collect();

        let mut order = Vec::with_capacity(inner.nodes.len());
        while let Some(idx) = queue.pop_front() {
            order.push(inner.nodes[idx].id);
            for &dependent in &inner.incoming[idx] {
                remaining[dependent] -= 1;
                if remaining[dependent] == 0 {
                    queue.push_back(dependent);
                }
            }
        }
        order
    }

    pub fn is_acyclic(&self) -> bool {
        self.topological_order().len() == self.len()
    }

    pub fn len(&self) -> usize {
        self.read().nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn edge_count(&self) -> usize {
        self.read().edges.len()
    }
}
