//! Simulator error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SimulatorError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Catalog error: {0}")]
    Catalog(#[from] coupon_flow::CatalogError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Flow error: {0}")]
    Flow(#[from] coupon_flow::FlowError),

    #[error("Profile error: {0}")]
    Profile(#[from] coupon_flow::ProfileError),

    #[error("Unknown package: {0}")]
    UnknownPackage(String),
}

pub type Result<T> = std::result::Result<T, SimulatorError>;
