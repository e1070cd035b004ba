//! Generation core: failure taxonomy, response checks, JSON repair, the retry loop and
//! the run driver that rolls ledgers up through pipelines and source units.

pub mod batch;
pub mod classify;
pub mod controller;
pub mod errors;
pub mod repair;
pub mod run;
pub mod validate;

pub use batch::{AttemptTranscript, BatchOutcome, BatchReport, BatchState, PromptBatch};
pub use classify::classify;
pub use controller::{RetryController, RetryPolicy, TranscriptHook};
pub use errors::{ErrorKind, ErrorSet};
pub use repair::{extract_json_array, JsonRepairer, Record, Repaired};
pub use run::{GenerationRun, RunSummary};
pub use validate::{count_identity_mismatches, fields_match, ExpectedIds, StructuralValidator};
