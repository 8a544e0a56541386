use anyhow::Result;
use hickory_resolver::proto::rr::{Record, RecordType};
use hickory_resolver::TokioResolver;

/// Final pipeline stage: answers whatever the filters let through.
#[async_trait::async_trait]
pub trait DnsResolver: Send + Sync {
    /// Returns the answer records and the upstream that produced them.
    async fn resolve(&self, name: &str, query_type: RecordType) -> Result<(Vec<Record>, String)>;
}

pub struct Upstream {
    pub url: String,
    pub resolver: TokioResolver,
}
