use std::collections::HashMap;
use std::sync::Arc;

use orchestrator_domain::ImportExecutor;
use tracing::{debug, info};

/// 按导入类型查找执行器
///
/// 显式绑定优先；没有绑定时依次询问已注册执行器的 `supports_import_type`。
#[derive(Default, Clone)]
pub struct ExecutorRegistry {
    executors: Vec<Arc<dyn ImportExecutor>>,
    by_type: HashMap<String, Arc<dyn ImportExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, executor: Arc<dyn ImportExecutor>) -> &mut Self {
        info!(executor = executor.name(), "注册导入执行器");
        self.executors.push(executor);
        self
    }

    /// 把导入类型显式绑定到执行器，覆盖已有绑定
    pub fn bind(&mut self, import_type: impl Into<String>, executor: Arc<dyn ImportExecutor>) -> &mut Self {
        let import_type = import_type.into();
        info!(import_type = %import_type, executor = executor.name(), "绑定导入类型");
        self.by_type.insert(import_type, executor);
        self
    }

    pub fn find(&self, import_type: &str) -> Option<Arc<dyn ImportExecutor>> {
        if let Some(executor) = self.by_type.get(import_type) {
            return Some(executor.clone());
        }
        let found = self
            .executors
            .iter()
            .find(|executor| executor.supports_import_type(import_type))
            .cloned();
        if found.is_none() {
            debug!(import_type, "没有支持该导入类型的执行器");
        }
        found
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .executors
            .iter()
            .chain(self.by_type.values())
            .map(|executor| executor.name().to_string())
            .collect();
        names.sort();
        names.dedup();
        names
    }

    pub fn len(&self) -> usize {
        self.names().len()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty() && self.by_type.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchestrator_testing_utils::MockImportExecutor;

    #[test]
    fn test_lookup_by_support_and_binding() {
        let mut registry = ExecutorRegistry::new();
        registry
            .register(Arc::new(MockImportExecutor::new("csv")))
            .register(Arc::new(MockImportExecutor::new("json")));

        assert_eq!(registry.find("csv").unwrap().name(), "mock-csv");
        assert_eq!(registry.find("json").unwrap().name(), "mock-json");
        assert!(registry.find("parquet").is_none());

        registry.bind("parquet", Arc::new(MockImportExecutor::new("json")));
        assert_eq!(registry.find("parquet").unwrap().name(), "mock-json");
        assert_eq!(registry.names(), vec!["mock-csv", "mock-json"]);
        assert_eq!(registry.len(), 2);
    }
}
