mod engine;

pub use engine::{EngineSnapshot, Phase, Session, SessionType, TimerEngine};
