pub mod entities;
pub mod events;
pub mod ports;
pub mod repositories;
pub mod schedule;
pub mod value_objects;

pub use entities::*;
pub use events::*;
pub use ports::*;
pub use repositories::*;
pub use schedule::*;
pub use value_objects::*;
pub use orchestrator_errors::{OrchestratorError, OrchestratorResult};
