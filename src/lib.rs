//! # barliman
//!
//! Live verification of a program definition against input/output examples.
//!
//! Every edit to the definition, the interpreter semantics, or an example
//! eventually produces a new generation of checks, each delegated to an
//! external miniKanren evaluator subprocess:
//!
//! ```text
//!   edit ──► Scheduler (debounce) ──► Snapshot
//!                                        │
//!                                        ▼
//!                ┌──────────────── Generation ────────────────┐
//!                │ DefinitionCheck  CombinedSearch  Example×N │
//!                │        └────── ImplicationEngine ──────┘   │
//!                └──────────────────────┬─────────────────────┘
//!                                       ▼
//!                               SchedulerEvent sink
//! ```
//!
//! A new generation only starts once the previous one has cancelled and
//! reaped all of its processes. Within a generation, implication rules cancel
//! checks whose result is already determined (a failing example means the
//! combined search cannot succeed, a successful search means every example
//! passes).
//!
//! ## Modules
//! - `check`: outcomes, output classification, and the subprocess task
//! - `generation`: one snapshot's checks plus the implication engine
//! - `scheduler`: debouncing and generation replacement
//! - `query`: program text sent to the evaluator
//! - `snapshot` / `session`: inputs, in memory and on disk

pub mod check;
pub mod config;
pub mod events;
pub mod generation;
pub mod query;
pub mod scheduler;
pub mod session;
pub mod snapshot;
pub mod util;

#[cfg(test)]
mod test_support;

pub use check::{CheckKind, Outcome};
pub use config::Config;
pub use events::SchedulerEvent;
pub use query::{QueryBuilder, SchemeQueryBuilder};
pub use scheduler::{Scheduler, SchedulerError};
pub use snapshot::{Example, ExampleId, SharedInputs, Snapshot, SnapshotSource};
