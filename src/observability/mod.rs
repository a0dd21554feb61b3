// Observability
pub mod audit;
