use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProblemError {
    /// Break definitions cannot be sequenced within the vehicle time window.
    #[error("inconsistent breaks for vehicle {vehicle_id}")]
    InconsistentBreaks { vehicle_id: u64 },
    #[error("cost value overflow")]
    Overflow,
    #[error("amount dimension mismatch: expected {expected}, got {actual}")]
    AmountDimensionMismatch { expected: usize, actual: usize },
    #[error("no matrix registered for profile {profile}")]
    UnknownProfile { profile: String },
    #[error("location index {index} is out of matrix bounds")]
    InvalidLocation { index: usize },
    #[error("invalid time windows for id {id}")]
    InvalidTimeWindows { id: u64 },
    #[error("shipment {id} must pair a pickup with its delivery")]
    UnpairedShipment { id: u64 },
}
