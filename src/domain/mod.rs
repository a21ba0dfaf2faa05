//! Domain layer: the sale record, its value objects and the ports the saga
//! talks through.

pub mod money;
pub mod performance;
pub mod ports;
pub mod sale;
