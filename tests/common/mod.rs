#![allow(dead_code)]

use anyhow::{anyhow, Result};
use dns_blocklist::engine::{normalize, ListLoader};
use dns_blocklist::resolver::DnsResolver;
use hickory_server::proto::op::{Message, Query};
use hickory_server::proto::rr::{Name, RData, Record, RecordType};
use hickory_server::server::RequestHandler;
use hickory_server::ServerFuture;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::UdpSocket;

/// Lists served from memory; a missing location fails to load.
#[derive(Default)]
pub struct MemoryLoader {
    lists: Mutex<HashMap<String, Vec<String>>>,
}

impl MemoryLoader {
    pub fn set(&self, location: &str, domains: &[&str]) {
        self.lists.lock().unwrap().insert(
            location.to_string(),
            domains.iter().map(|d| normalize(d)).collect(),
        );
    }

    pub fn remove(&self, location: &str) {
        self.lists.lock().unwrap().remove(location);
    }
}

#[async_trait::async_trait]
impl ListLoader for MemoryLoader {
    async fn load(&self, location: &str, _bootstrap: Option<SocketAddr>) -> Result<Vec<String>> {
        self.lists
            .lock()
            .unwrap()
            .get(location)
            .cloned()
            .ok_or_else(|| anyhow!("no list at {}", location))
    }
}

/// A source that never answers.
pub struct StalledLoader;

#[async_trait::async_trait]
impl ListLoader for StalledLoader {
    async fn load(&self, _location: &str, _bootstrap: Option<SocketAddr>) -> Result<Vec<String>> {
        std::future::pending().await
    }
}

/// Answers every query with an A record for 1.2.3.4.
#[derive(Default)]
pub struct MockResolver {
    pub call_count: AtomicUsize,
}

impl MockResolver {
    pub fn calls(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl DnsResolver for MockResolver {
    async fn resolve(&self, name: &str, _qtype: RecordType) -> Result<(Vec<Record>, String)> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        let name = Name::from_ascii(name).unwrap();
        let record = Record::from_rdata(name, 60, RData::A("1.2.3.4".parse().unwrap()));
        Ok((vec![record], "mock".to_string()))
    }
}

/// Upstream that never answers successfully.
pub struct FailingResolver;

#[async_trait::async_trait]
impl DnsResolver for FailingResolver {
    async fn resolve(&self, name: &str, _qtype: RecordType) -> Result<(Vec<Record>, String)> {
        Err(anyhow!("all upstreams failed for {}", name))
    }
}

/// Serves `handler` on an ephemeral loopback UDP port.
pub async fn start_server<H: RequestHandler>(handler: H) -> SocketAddr {
    let mut server = ServerFuture::new(handler);
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();
    server.register_socket(socket);

    tokio::spawn(async move {
        let _ = server.block_until_done().await;
    });

    addr
}

pub struct Client {
    socket: UdpSocket,
    next_id: u16,
}

impl Client {
    pub async fn connect(addr: SocketAddr) -> Self {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        socket.connect(addr).await.unwrap();
        Self { socket, next_id: 1 }
    }

    pub async fn query(&mut self, name: &str) -> Message {
        let mut msg = Message::new();
        msg.add_query(Query::query(Name::from_ascii(name).unwrap(), RecordType::A));
        msg.set_id(self.next_id);
        msg.set_recursion_desired(true);
        self.next_id = self.next_id.wrapping_add(1);

        self.socket.send(&msg.to_vec().unwrap()).await.unwrap();

        let mut buf = [0u8; 512];
        let len = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            self.socket.recv(&mut buf),
        )
        .await
        .expect("no response from server")
        .unwrap();
        Message::from_vec(&buf[..len]).unwrap()
    }
}
