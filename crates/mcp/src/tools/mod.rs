mod registry;
mod simulated;

pub use registry::{Tool, ToolInfo, ToolRegistry};
pub use simulated::{simulated_registry, SimulatedTool};
