// Core module - the prober trait the scheduler drives
pub mod prober;

pub use prober::{PortProber, ProberFactory};
