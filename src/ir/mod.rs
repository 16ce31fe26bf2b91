//! Impulse Response Module
//!
//! Loading, validation and hot replacement of the response the engine
//! convolves with.

pub mod response;
pub mod store;

pub use response::{ImpulseResponse, ImpulseResponseHandle, IrOptions};
pub use store::ImpulseResponseStore;
