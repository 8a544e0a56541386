//! DNS request handler.
//!
//! Each query is run through the filter stages in configured order. A stage
//! either answers with its block response code, which ends the pipeline, or
//! hands the response handle on to the next stage. Whatever no stage blocks is
//! forwarded upstream.

use crate::engine::{normalize, Blocklist, Decision};
use crate::resolver::DnsResolver;
use crate::stats::StatsCollector;
use hickory_server::authority::MessageResponseBuilder;
use hickory_server::proto::op::{Header, ResponseCode};
use hickory_server::proto::rr::Record;
use hickory_server::server::{Request, RequestHandler, ResponseHandler, ResponseInfo};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error};

use super::types::QueryContext;

#[derive(Clone)]
pub struct DnsHandler {
    stats: Arc<StatsCollector>,
    /// Filter stages, in pipeline order.
    filters: Arc<[Arc<Blocklist>]>,
    /// Final stage.
    resolver: Arc<dyn DnsResolver>,
}

impl DnsHandler {
    pub fn new(
        stats: Arc<StatsCollector>,
        filters: Vec<Arc<Blocklist>>,
        resolver: Arc<dyn DnsResolver>,
    ) -> Self {
        Self {
            stats,
            filters: filters.into(),
            resolver,
        }
    }

    fn get_query_info(&self, request: &Request) -> Option<QueryContext> {
        let query = request.queries().first()?;
        Some(QueryContext {
            name: normalize(&query.name().to_string()).into(),
            qtype: query.query_type(),
            start: Instant::now(),
        })
    }

    /// Runs one filter stage.
    ///
    /// Returns the response handle when the query should continue down the pipeline.
    async fn apply_filter<R: ResponseHandler>(
        &self,
        filter: &Blocklist,
        request: &Request,
        response_handle: R,
        query: &QueryContext,
    ) -> Result<ResponseInfo, R> {
        let classification = filter.classify(&query.name);
        let domain_metrics = filter.config().domain_metrics;

        match classification.decision() {
            Decision::Block => {
                self.stats.inc_blocked();
                if domain_metrics {
                    self.stats.inc_domain_blocked(&query.name);
                }
                debug!(
                    "blocked \"{} IN {}\" from {}",
                    query.qtype,
                    query.name,
                    request.src()
                );
                let code = filter.config().block_response.response_code();
                Ok(self
                    .send_response(request, response_handle, code, &[])
                    .await)
            }
            Decision::Allow => {
                self.stats.inc_allowed();
                if domain_metrics {
                    self.stats.inc_domain_allowed(&query.name);
                }
                debug!("allowed \"{}\" over a block match", query.name);
                Err(response_handle)
            }
            Decision::Pass => Err(response_handle),
        }
    }

    async fn send_response<R: ResponseHandler>(
        &self,
        request: &Request,
        mut response_handle: R,
        code: ResponseCode,
        records: &[Record],
    ) -> ResponseInfo {
        let mut header = Header::response_from_request(request.header());
        header.set_authoritative(false);
        header.set_response_code(code);

        let builder = MessageResponseBuilder::from_message_request(request);
        let response = builder.build(header, records.iter(), &[], &[], &[]);
        match response_handle.send_response(response).await {
            Ok(info) => info,
            Err(e) => {
                error!("failed to write response to {}: {}", request.src(), e);
                let mut header = Header::new();
                header.set_response_code(ResponseCode::ServFail);
                header.into()
            }
        }
    }

    async fn resolve_and_serve<R: ResponseHandler>(
        &self,
        request: &Request,
        response_handle: R,
        query: QueryContext,
    ) -> ResponseInfo {
        match self.resolver.resolve(&query.name, query.qtype).await {
            Ok((records, upstream)) => {
                debug!(
                    "forwarded {} to {} [{}ms]",
                    query.name,
                    upstream,
                    query.start.elapsed().as_millis()
                );
                self.send_response(request, response_handle, ResponseCode::NoError, &records)
                    .await
            }
            Err(e) => {
                error!("Upstream resolution failed for {}: {}", query.name, e);
                self.send_response(request, response_handle, ResponseCode::ServFail, &[])
                    .await
            }
        }
    }
}

#[async_trait::async_trait]
impl RequestHandler for DnsHandler {
    async fn handle_request<R: ResponseHandler>(
        &self,
        request: &Request,
        response_handle: R,
    ) -> ResponseInfo {
        self.stats.inc_queries();

        let query = match self.get_query_info(request) {
            Some(query) => query,
            None => {
                return self
                    .send_response(request, response_handle, ResponseCode::FormErr, &[])
                    .await;
            }
        };

        let mut response_handle = response_handle;
        for filter in self.filters.iter() {
            response_handle = match self
                .apply_filter(filter, request, response_handle, &query)
                .await
            {
                Ok(info) => return info,
                Err(handle) => handle,
            };
        }

        self.resolve_and_serve(request, response_handle, query)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BlocklistConfig;
    use crate::engine::{DomainSet, StandardLoader};
    use anyhow::{bail, Result};
    use hickory_server::authority::{MessageRequest, MessageResponse};
    use hickory_server::proto::op::{Message, Query};
    use hickory_server::proto::rr::{Name, RecordType};
    use hickory_server::proto::serialize::binary::BinDecodable;
    use hickory_server::proto::xfer::Protocol;

    /// Upstream that is always down.
    struct Unreachable;

    #[async_trait::async_trait]
    impl DnsResolver for Unreachable {
        async fn resolve(&self, name: &str, _qtype: RecordType) -> Result<(Vec<Record>, String)> {
            bail!("no upstream answered for {}", name)
        }
    }

    /// Client socket that is gone by the time the answer is written.
    #[derive(Clone)]
    struct ClosedClient;

    #[async_trait::async_trait]
    impl ResponseHandler for ClosedClient {
        async fn send_response<'a>(
            &mut self,
            _response: MessageResponse<
                '_,
                'a,
                impl Iterator<Item = &'a Record> + Send + 'a,
                impl Iterator<Item = &'a Record> + Send + 'a,
                impl Iterator<Item = &'a Record> + Send + 'a,
                impl Iterator<Item = &'a Record> + Send + 'a,
            >,
        ) -> std::io::Result<ResponseInfo> {
            Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "client went away",
            ))
        }
    }

    fn request(name: &str) -> Request {
        let mut msg = Message::new();
        msg.add_query(Query::query(Name::from_ascii(name).unwrap(), RecordType::A));
        msg.set_id(7);
        let bytes = msg.to_vec().unwrap();
        let message = MessageRequest::from_bytes(&bytes).unwrap();
        Request::new(message, "127.0.0.1:5300".parse().unwrap(), Protocol::Udp)
    }

    fn handler(stats: Arc<StatsCollector>, block: &[&str]) -> DnsHandler {
        let mut config = BlocklistConfig::new("block");
        config.domain_metrics = true;
        let bl = Blocklist::new(config, Arc::new(StandardLoader::new().unwrap()));
        bl.block_table().replace(block.iter().collect::<DomainSet>());
        DnsHandler::new(stats, vec![Arc::new(bl)], Arc::new(Unreachable))
    }

    #[tokio::test]
    async fn test_failed_block_write_keeps_counters() {
        let stats = StatsCollector::new();
        let handler = handler(stats.clone(), &["bad.domain."]);

        let info = handler
            .handle_request(&request("bad.domain."), ClosedClient)
            .await;

        assert_eq!(info.response_code(), ResponseCode::ServFail);
        assert_eq!(stats.total_queries(), 1);
        assert_eq!(stats.blocked(), 1);
        assert_eq!(stats.domain_blocked("bad.domain."), 1);
    }

    #[tokio::test]
    async fn test_failed_forward_write_is_servfail() {
        let stats = StatsCollector::new();
        let handler = handler(stats.clone(), &[]);

        let info = handler
            .handle_request(&request("good.domain."), ClosedClient)
            .await;

        assert_eq!(info.response_code(), ResponseCode::ServFail);
        assert_eq!(stats.blocked(), 0);
    }
}
