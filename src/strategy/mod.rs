pub mod allocator;
pub mod calibrator;
pub mod circuit_breaker;
pub mod quoter;
pub mod risk;
