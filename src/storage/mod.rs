//! Answer Storage Facade.
//!
//! - `facade`: the single entry point, bound to one backend by run mode
//! - `backend`: the capabilities every backend provides
//! - `remote`: live-synced document store backend
//! - `local`: embedded SQLite backend with one-shot watches
//! - `answer`: deriving answer records from interactive state

mod answer;
mod backend;
mod facade;
mod local;
mod remote;
mod types;

pub use answer::{answers_question_id_to_ref_id, EmbeddableConfig};
pub use facade::{RunMode, StorageFacade};
pub use types::Session;
