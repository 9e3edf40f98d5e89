//! Summit Vars - Typed Variable Store
//!
//! The shared state layer of the Summit automation engine:
//! - Flat `name -> Variable` namespace (dotted names by convention)
//! - Typed values (bool / i64 / f64 / string) with no implicit coercion
//! - Last-writer-wins writes with per-call atomicity
//! - Best-effort JSON snapshots for persistence across restarts
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐     ┌──────────────┐     ┌─────────────┐
//! │ Data Sources│────▶│   VarStore   │◀────│    Rules    │
//! │ (push/poll) │     │  (DashMap)   │     │ (read/write)│
//! └─────────────┘     └──────────────┘     └─────────────┘
//!                            │
//!                            ▼
//!                     ┌──────────────┐
//!                     │   Snapshot   │
//!                     │  (JSON file) │
//!                     └──────────────┘
//! ```

mod error;
mod store;
mod value;

// Re-export public API
pub use error::{Result, VarError};
pub use store::{StoreStats, VarStore, Variable};
pub use value::Value;
