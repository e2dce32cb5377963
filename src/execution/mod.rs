// Order placement and tick orchestration
pub mod orchestrator;
pub mod position_controller;

pub use orchestrator::{EngineEvent, Orchestrator};
pub use position_controller::{PartialOutcome, PositionController};
