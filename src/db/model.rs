//! Row types returned by the outbox repository.

/// A due outbox entry. `payload` is the serialized batch job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxItem {
    pub id: i64,
    pub job_id: String,
    pub payload: String,
    pub attempt: i32,
}
