//! Custom Resource Definitions for modelserve

mod serve_request;

pub use serve_request::{
    ServePhase, ServeRequest, ServeRequestSpec, ServeRequestStatus, DEFAULT_CPU_LIMIT_MILLICORES,
    DEFAULT_MEMORY_LIMIT_MB, DEFAULT_REPLICAS, MAX_CPU_LIMIT_MILLICORES, MAX_MEMORY_LIMIT_MB,
    MAX_REPLICAS,
};
