//! Provisioned throughput 部署的流式压测工具

pub mod common;
pub mod executor;
pub mod http_client;
pub mod load;
pub mod metrics;
pub mod model;
pub mod scheduler;
pub mod token;
pub mod tokenize;
pub mod workload;

#[cfg(test)]
mod test_support;
