//! Engine process manager.
//!
//! Spawns the Alpaca engine, reads its handshake, serializes every request
//! over its stdin/stdout pair and shuts it down with the quit sentinel.

pub mod error;
pub mod gateway;
pub mod mock;
pub mod process;
pub mod protocol;
mod worker;

pub use error::{EngineError, StartupError};
pub use gateway::{advertisement_prompt, instruction_prompt, GatewayConfig, InferenceGateway};
pub use mock::{MockEngine, MockLauncher};
pub use process::{
    EngineChannel, EngineLauncher, EngineSpec, ProcessLauncher, ProcessSupervisor, StopOutcome,
    SupervisorConfig, SupervisorState,
};
pub use protocol::{
    EngineReply, GenerationParams, InferenceRequest, InferenceResult, ProtocolError, SystemInfo,
};
pub use worker::SerializerStats;
