mod error;
mod paths;
mod schema;
mod store;
mod validate;

pub use error::SessionStoreError;
pub use paths::{archive_root, session_file_name, task_root, validate_session_key};
pub use schema::{SessionRecordType, StoredSession, STORE_VERSION};
pub use store::TaskStore;
