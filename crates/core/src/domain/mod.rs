pub mod bill;
pub mod classification;
pub mod memory;
pub mod negotiation;
pub mod strategy;
