//! Request timing
//!
//! - `TimingController`: decides the delay before each request
//! - `DelayHistory`: bounded record of emitted delays with an entropy estimate

mod controller;
mod entropy;

pub use controller::{Delay, DelayKind, TimingController};
pub use entropy::{
    DelayHistory, ENTROPY_BINS, ENTROPY_WINDOW, HISTORY_CAPACITY, MIN_ENTROPY_SAMPLES,
};
