// Capability tools the workflow engine invokes.
// The registry implements the engine's invoker and routes by capability name.

pub mod tools;

pub use tools::{simulated_registry, SimulatedTool, Tool, ToolInfo, ToolRegistry};
