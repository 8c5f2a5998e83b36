//! Trailing-stop guard
//!
//! Trailing-stop and position-risk core for a breakout trading bot: a
//! per-position state machine that ratchets the protective stop once the
//! trade has moved far enough in its favor, plus the sizing, configuration,
//! replay and persistence pieces around it.

pub mod config;
pub mod data;
pub mod error;
pub mod position;
pub mod replay;
pub mod risk;
pub mod state_store;
pub mod trailing;
pub mod types;

pub use config::Config;
pub use error::{ErrorKind, TrailingError, TrailingResult};
pub use position::Position;
pub use trailing::{
    CloseReason, StopUpdate, TrailingConfig, TrailingMode, TrailingModeKind, TrailingSnapshot,
    TrailingState, TrailingStopController,
};
pub use types::*;
