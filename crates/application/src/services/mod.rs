pub mod orchestrator;

pub use orchestrator::ImportOrchestrator;
