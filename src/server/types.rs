use hickory_server::proto::rr::RecordType;
use std::sync::Arc;
use std::time::Instant;

#[derive(Clone)]
pub struct QueryContext {
    /// Lowercased, trailing-dot query name.
    pub name: Arc<str>,
    pub qtype: RecordType,
    pub start: Instant,
}
