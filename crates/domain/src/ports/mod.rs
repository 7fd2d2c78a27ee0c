pub mod audit;
pub mod executor;

pub use audit::*;
pub use executor::*;
