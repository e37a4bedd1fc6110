pub mod aggregate;
pub mod approval;
pub mod config;
pub mod error;
pub mod history;
pub mod identity;
pub mod registry;
pub mod service;
pub mod status;
pub mod store;
pub mod telemetry;
pub mod types;
pub mod utils;

pub use error::{ConfigError, Rejection, ServiceError, StoreError};
pub use service::PlanService;
