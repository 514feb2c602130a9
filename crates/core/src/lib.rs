// Core types and engine for the Conductor workflow runner

pub mod capability;
pub mod config;
pub mod error;
pub mod events;
pub mod metrics;
pub mod storage;
pub mod template;
pub mod types;
pub mod workflow;

pub use capability::{CapabilityError, CapabilityInvoker};
pub use config::{CapabilityConfig, CapabilitySettings, ConfigError, EngineConfig};
pub use error::{EngineError, EngineResult};
pub use template::{TemplateRegistry, TemplateSummary, WorkflowCatalog};
pub use types::*;
pub use workflow::{RunHandle, WorkflowEngine};
