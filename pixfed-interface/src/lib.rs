//! # Interface to the pixel FED readout board
//!
//! Configuration of the board and its Fitel receivers,
//! readout of its fifos and DDR banks, and tracking of
//! the channel health under single event upsets.
//!
//! The crate never talks to a bus itself. Everything
//! goes through a `RegisterAccess` implementation which
//! is provided by the owner of the transport. For tests
//! and dry runs, `sim::SimBoard` emulates the board.
//!
pub mod registers;
pub mod access;
pub mod errors;
pub mod fitel;
pub mod health;
pub mod drain;
pub mod firmware;
pub mod control;
pub mod threads;
pub mod sim;

pub use access::{
    RegisterAccess,
    RegisterError,
};
pub use errors::FEDError;
pub use control::{
    FEDController,
    SetupReport,
};
pub use health::{
    ChannelHealthMonitor,
    EnableBits,
    HealthReport,
    HealthState,
};

extern crate crossbeam_channel;

#[macro_use] extern crate log;
