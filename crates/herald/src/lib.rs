//! Herald, an S3-compatible gateway
//!
//! Herald fronts a heterogeneous pool of object-storage backends behind a
//! single S3 REST endpoint. Clients sign requests with AWS Signature V4
//! (headers or presigned query); Herald verifies the signature, resolves the
//! target bucket to a native S3 backend or an OpenStack Swift backend,
//! translates the operation, and mirrors state-changing operations
//! asynchronously to configured replicas.
//!
//! # Architecture
//!
//! - [`service`]: the front door, a generic [hyper](https://github.com/hyperium/hyper)
//!   service that authenticates, resolves and dispatches each request
//! - [`auth`] / [`sig_v4`]: AWS Signature V4 verification and signing
//! - [`request`]: path-style vs virtual-hosted-style request classification
//! - [`config`] / [`registry`]: validated backend/bucket topology
//! - [`s3`]: pass-through resolver for native S3 backends
//! - [`swift`]: the S3↔Swift protocol translator
//! - [`mirror`]: durable at-least-once replication queue and workers
//! - [`keystone`]: cached OpenStack identity tokens
//!
//! The library is transport-complete: [`service::HeraldService`] implements
//! both `hyper::service::Service` and `tower::Service`, so it can be served
//! by hyper directly or wrapped in tower middleware.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(
    clippy::bool_assert_comparison,
    clippy::multiple_crate_versions,
    clippy::module_name_repetitions,
    clippy::single_match_else,
    clippy::wildcard_imports,
    clippy::inline_always,
    clippy::needless_continue,
)]

#[macro_use]
mod error;

pub mod auth;
pub mod config;
pub mod dto;
pub mod forward;
pub mod header;
pub mod http;
pub mod keystone;
pub mod mirror;
pub mod net;
pub mod registry;
pub mod request;
pub mod resolver;
pub mod s3;
pub mod service;
pub mod sig_v4;
pub mod swift;
pub mod xml;

pub use self::error::*;
pub use self::http::Body;
pub use self::request::RequestMeta;
