//! Agent adapters for aibench.
//!
//! Adapters implement [`aibench_core::AgentExecutor`] and are looked up by
//! the `agent.type` key of a run configuration through [`AgentRegistry`].

pub mod command;
pub mod normalize;
pub mod registry;

pub use command::{CommandAgent, CommandSettings};
pub use normalize::{
    environment_snapshot, JsonLinesMessages, JsonUsage, LogNormalizer, MessageStrategy,
    PlainTextMessage, Pricing, TextUsage, UsageStrategy,
};
pub use registry::{AgentFactory, AgentRegistry};
