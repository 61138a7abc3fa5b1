//! Record retrieval. The pipeline consumes `UserRecords`; these adapters fetch them.

mod file;
mod provider;
pub mod types;

pub use file::FileRecordSource;
pub use provider::{HttpJsonRecordSource, RecordSource};
