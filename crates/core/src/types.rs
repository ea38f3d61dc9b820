/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Opaque, globally unique job identifier (`task_<hex>` when system generated).
pub type TaskId = String;

/// Identifier of a project directory under the projects root.
pub type ProjectId = String;

/// Identifier of one dispatched run (`run_<hex>`).
pub type RunId = String;
