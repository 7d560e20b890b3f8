//! The front door.
//!
//! [`HeraldService`] accepts raw HTTP requests, answers CORS preflights and
//! health checks, verifies the AWS SigV4 signature, resolves the bucket and
//! dispatches into the resolvers. It implements both
//! `hyper::service::Service` and `tower::Service`, so it can be served by
//! hyper directly or stacked under tower middleware.

use crate::auth::{self, ProxyTrust, VerifyInput};
use crate::config::{AppConfig, BackendConfig};
use crate::dto::{Timestamp, TimestampFormat};
use crate::forward::build_client;
use crate::header;
use crate::http::{Body, OrderedHeaders, Response, serialize_error};
use crate::keystone::KeystoneStore;
use crate::mirror::MirrorQueue;
use crate::net::Cidr;
use crate::registry::{Bucket, BucketRegistry};
use crate::request::extract_request_info;
use crate::resolver::{GatewayRequest, RequestContext, dispatch_with_failover};
use crate::xml;
use crate::S3Result;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use http::Method;
use http::StatusCode;
use tracing::{debug, error};

pub type HttpRequest = http::Request<Body>;
pub type HttpResponse = http::Response<Body>;

const ALLOWED_METHODS: &str = "GET, POST, PUT, DELETE, HEAD, OPTIONS";
const ALLOWED_HEADERS: &str = "Content-Type, Authorization, X-Amz-Content-Sha256, X-Amz-Date, \
     X-Amz-Security-Token, X-Amz-User-Agent, X-Amz-Target, X-Amz-Version, X-Amz-Authorization";

/// Builds a [`HeraldService`] and its shared collaborators from a validated
/// configuration.
pub struct HeraldServiceBuilder {
    config: AppConfig,
}

impl HeraldServiceBuilder {
    #[must_use]
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    pub fn build(self) -> Result<HeraldService, crate::config::ConfigError> {
        let registry = Arc::new(BucketRegistry::from_config(&self.config)?);
        let client = build_client();
        let keystone = Arc::new(KeystoneStore::new(client.clone()));
        let mirror = Arc::new(
            MirrorQueue::open(&self.config.task_store_path).map_err(|source| {
                crate::config::ConfigError::Io {
                    path: self.config.task_store_path.clone(),
                    source: std::io::Error::other(source),
                }
            })?,
        );

        // the extra client-facing SigV4 keys; per-bucket backend keys are
        // resolved against the target bucket at request time
        let service_credentials: HashMap<String, String> = self
            .config
            .service_credentials
            .iter()
            .map(|cred| (cred.access_key_id.clone(), cred.secret_access_key.clone()))
            .collect();

        let ctx = Arc::new(RequestContext {
            registry,
            keystone,
            mirror,
            client,
        });

        Ok(HeraldService {
            inner: Arc::new(Inner {
                ctx,
                trust_proxy: self.config.trust_proxy,
                trusted_cidrs: self.config.parsed_cidrs(),
                service_credentials,
            }),
        })
    }
}

#[derive(Clone)]
pub struct HeraldService {
    inner: Arc<Inner>,
}

struct Inner {
    ctx: Arc<RequestContext>,
    trust_proxy: bool,
    trusted_cidrs: Vec<Cidr>,
    service_credentials: HashMap<String, String>,
}

fn preflight_response(origin: Option<&str>) -> Response {
    let mut res = Response::with_status(StatusCode::NO_CONTENT);
    res.set_header("access-control-allow-origin", origin.unwrap_or("*"));
    res.set_header("access-control-allow-methods", ALLOWED_METHODS);
    res.set_header("access-control-allow-headers", ALLOWED_HEADERS);
    res.set_header("access-control-max-age", "86400");
    res
}

fn finish_response(res: Response) -> HttpResponse {
    let mut out = http::Response::builder().status(res.status);
    if let Some(headers) = out.headers_mut() {
        *headers = res.headers;
    }
    out.body(res.body).unwrap_or_else(|_| {
        let mut fallback = http::Response::new(Body::empty());
        *fallback.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
        fallback
    })
}

/// Non-preflight responses echo the Origin and allow credentials. Without
/// an Origin there is nothing to echo, and `*` must not be paired with
/// `allow-credentials`.
fn apply_cors(origin: Option<&str>, res: &mut Response) {
    match origin {
        Some(origin) => {
            res.set_header("access-control-allow-origin", origin);
            res.set_header("access-control-allow-credentials", "true");
        }
        None => res.set_header("access-control-allow-origin", "*"),
    }
}

impl HeraldService {
    /// The shared collaborators, for spawning mirror workers and tests.
    #[must_use]
    pub fn context(&self) -> Arc<RequestContext> {
        self.inner.ctx.clone()
    }

    /// Synthesizes `<ListAllMyBucketsResult>` from the registry: the
    /// gateway owns the bucket namespace, so `GET /` never reaches a
    /// backend.
    fn list_buckets(&self) -> Response {
        let creation_date = Timestamp::now().to_string_format(TimestampFormat::DateTime);
        let mut s = xml::Serializer::with_decl();
        s.element_ns("ListAllMyBucketsResult", xml::S3_XMLNS, |s| {
            s.element("Owner", |s| {
                s.text_element("ID", "herald");
                s.text_element("DisplayName", "herald");
            });
            s.element("Buckets", |s| {
                for name in self.inner.ctx.registry.bucket_names() {
                    s.element("Bucket", |s| {
                        s.text_element("Name", name);
                        s.text_element("CreationDate", &creation_date);
                    });
                }
            });
        });
        let mut res = Response::with_status(StatusCode::OK);
        res.set_xml_body(s.finish());
        res
    }

    /// Resolves the access key against the target bucket's S3 backend
    /// credentials, then the configured service credentials. A backend key
    /// only authenticates requests for its own bucket; Swift-backed buckets
    /// (and the bucketless ListBuckets path) accept service credentials
    /// only.
    fn resolve_secret<'a>(&'a self, bucket: Option<&'a Bucket>, access_key_id: &str) -> S3Result<&'a str> {
        if let Some(bucket) = bucket
            && let BackendConfig::S3(cfg) = &bucket.config
            && cfg.credentials.access_key_id == access_key_id
        {
            return Ok(&cfg.credentials.secret_access_key);
        }
        self.inner
            .service_credentials
            .get(access_key_id)
            .map(String::as_str)
            .ok_or_else(|| s3_error!(AccessDenied, "unknown access key {}", access_key_id))
    }

    async fn handle(&self, req: HttpRequest) -> S3Result<Response> {
        let (parts, body) = req.into_parts();
        let meta = extract_request_info(&parts.method, &parts.uri, &parts.headers)?;

        let decoded_path = meta.decoded_path.clone();
        let ordered = OrderedHeaders::from_header_map(&parts.headers)?;

        let descriptor = auth::extract_signature(&ordered, Some(&meta.query))?;

        // the bucket scopes which credentials may sign the request
        let bucket = match meta.bucket.as_deref() {
            Some(bucket_name) => {
                let Some(bucket) = self.inner.ctx.registry.get(bucket_name) else {
                    return Err(s3_error!(NoSuchBucket, "bucket {} is not configured", bucket_name));
                };
                Some(bucket)
            }
            None => None,
        };

        let secret_key = self.resolve_secret(bucket.as_deref(), &descriptor.access_key_id)?;
        let host_header = parts
            .headers
            .get(http::header::HOST)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned)
            .or_else(|| parts.uri.authority().map(|a| a.as_str().to_owned()));
        let input = VerifyInput {
            method: &parts.method,
            decoded_uri_path: &decoded_path,
            qs: Some(&meta.query),
            headers: &ordered,
            host: host_header.as_deref(),
        };
        let proxy = ProxyTrust {
            trust_proxy: self.inner.trust_proxy,
            trusted_cidrs: &self.inner.trusted_cidrs,
        };
        auth::verify_v4_signature(&input, &descriptor, secret_key, &proxy)?;

        let Some(bucket) = bucket else {
            if meta.method == Method::GET {
                return Ok(self.list_buckets());
            }
            return Err(invalid_request!("no bucket in request"));
        };

        let gateway_req = GatewayRequest {
            uri: parts.uri,
            headers: parts.headers,
            body,
            meta,
        };
        dispatch_with_failover(&self.inner.ctx, &bucket, gateway_req).await
    }

    /// Full request pipeline: CORS, health, auth, resolve, dispatch, error
    /// serialization.
    pub async fn call(&self, req: HttpRequest) -> HttpResponse {
        let t0 = std::time::Instant::now();
        let request_id = uuid::Uuid::new_v4().to_string();
        let origin = req
            .headers()
            .get(http::header::ORIGIN)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);

        debug!(method = %req.method(), uri = %req.uri(), request_id = %request_id, "inbound request");

        // preflights carry only the access-control grant headers
        if req.method() == Method::OPTIONS {
            let mut res = preflight_response(origin.as_deref());
            res.set_header(header::X_AMZ_REQUEST_ID, &request_id);
            return finish_response(res);
        }

        let mut res = if req.uri().path() == "/health" {
            let mut res = Response::with_status(StatusCode::OK);
            res.body = Body::from("OK");
            res
        } else {
            match self.handle(req).await {
                Ok(res) => res,
                Err(mut err) => {
                    err.set_request_id(request_id.clone());
                    if err.status_code().is_server_error() {
                        // the hook a crash-forwarding layer subscribes to
                        error!(request_id = %request_id, %err, "request failed");
                    } else {
                        debug!(request_id = %request_id, %err, "request rejected");
                    }
                    serialize_error(&err, "herald")
                }
            }
        };

        apply_cors(origin.as_deref(), &mut res);
        res.set_header(header::X_AMZ_REQUEST_ID, &request_id);

        let duration = t0.elapsed();
        debug!(status = %res.status, ?duration, request_id = %request_id, "request finished");

        finish_response(res)
    }

    async fn call_owned(self, req: HttpRequest) -> Result<HttpResponse, std::convert::Infallible> {
        Ok(self.call(req).await)
    }
}

impl fmt::Debug for HeraldService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeraldService").finish_non_exhaustive()
    }
}

impl hyper::service::Service<http::Request<hyper::body::Incoming>> for HeraldService {
    type Response = HttpResponse;
    type Error = std::convert::Infallible;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn call(&self, req: http::Request<hyper::body::Incoming>) -> Self::Future {
        let req = req.map(Body::from);
        let service = self.clone();
        Box::pin(service.call_owned(req))
    }
}

impl tower::Service<http::Request<hyper::body::Incoming>> for HeraldService {
    type Response = HttpResponse;
    type Error = std::convert::Infallible;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut std::task::Context<'_>) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: http::Request<hyper::body::Incoming>) -> Self::Future {
        let req = req.map(Body::from);
        let service = self.clone();
        Box::pin(service.call_owned(req))
    }
}
