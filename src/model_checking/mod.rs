pub mod belief_support;
pub mod conditional;
pub mod error;
pub mod hole_variance;
pub mod memory;
pub mod memory_product;
pub mod reachability;
pub mod scheduler;
pub mod sts;
