//! Core of the chronowave radio: the broadcast clock, the media catalog,
//! the track registry and the player state machine.

pub mod audio;
pub mod catalog;
pub mod clock;
pub mod config;
pub mod error;
pub mod platform;
pub mod player;
pub mod protocol;
pub mod registry;
pub mod state;

pub use error::{RadioError, Result};
