pub mod changes;
pub mod error;
pub mod memory;
pub mod plan;
pub mod plans;
pub mod ports;
pub mod projection;
pub mod util;

pub type DomainResult<T> = Result<T, error::DomainError>;
