pub mod reconciliation;

pub use reconciliation::{ReconciliationConfig, ReconciliationReport, ReconciliationWorker};
