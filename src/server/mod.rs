mod handler;
mod types;

pub use handler::DnsHandler;
