use crate::error::{ForwarderError, ForwarderErrorFeature};
use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::sync::Arc;
use std::time::Duration;

/// Outbound body type threaded through the client boundary. Matches the
/// teacher's `proxy::context::BoxBody` so the forwarder's streaming path
/// reads the same either way.
pub type BoxBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

pub fn empty_body() -> BoxBody {
    Full::new(Bytes::new()).map_err(|never| match never {}).boxed()
}

/// The boundary named in spec §1/§6: "the HTTP client used to actually send
/// bytes" is an external collaborator whose internals are out of scope — we
/// only specify what the core calls into. `send` owns the connect-and-send
/// step; any error at that stage is classified into the destination vs.
/// client-attributed buckets `ForwarderErrorFeature` already distinguishes.
#[async_trait]
pub trait ProxyHttpClient: Send + Sync {
    async fn send(
        &self,
        request: http::Request<BoxBody>,
        timeout: Option<Duration>,
    ) -> Result<http::Response<BoxBody>, ForwarderErrorFeature>;
}

/// A rustls `ServerCertVerifier` that accepts any certificate. Used for
/// internal / mesh traffic where transport encryption is wanted but
/// upstream identity verification is not, mirroring the teacher's `NoVerifier`.
#[derive(Debug)]
struct NoVerifier;

impl rustls::client::danger::ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}

#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub idle_timeout: Duration,
    pub max_idle_per_host: usize,
    pub connect_timeout: Duration,
    pub tls_verify: bool,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(90),
            max_idle_per_host: 32,
            connect_timeout: Duration::from_secs(5),
            tls_verify: true,
        }
    }
}

/// Default `ProxyHttpClient`, one pool per cluster so differing keepalive
/// settings don't leak across clusters (teacher's
/// `upstream::cluster::build_cluster_http_client`).
pub struct HyperProxyHttpClient {
    inner: Client<HttpsConnector<HttpConnector>, BoxBody>,
}

impl HyperProxyHttpClient {
    pub fn new(pool: &PoolSettings) -> Self {
        let mut http = HttpConnector::new();
        http.set_nodelay(true);
        http.set_keepalive(Some(pool.idle_timeout));
        http.set_connect_timeout(Some(pool.connect_timeout));
        http.enforce_http(false);

        let https = if pool.tls_verify {
            hyper_rustls::HttpsConnectorBuilder::new()
                .with_webpki_roots()
                .https_or_http()
                .enable_http1()
                .enable_http2()
                .wrap_connector(http)
        } else {
            let tls_config = rustls::ClientConfig::builder()
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(NoVerifier))
                .with_no_client_auth();
            hyper_rustls::HttpsConnectorBuilder::new()
                .with_tls_config(tls_config)
                .https_or_http()
                .enable_http1()
                .enable_http2()
                .wrap_connector(http)
        };

        let inner = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(pool.idle_timeout)
            .pool_max_idle_per_host(pool.max_idle_per_host)
            .build(https);

        Self { inner }
    }
}

#[async_trait]
impl ProxyHttpClient for HyperProxyHttpClient {
    async fn send(
        &self,
        request: http::Request<BoxBody>,
        timeout: Option<Duration>,
    ) -> Result<http::Response<BoxBody>, ForwarderErrorFeature> {
        let fut = self.inner.request(request);
        let result = match timeout {
            Some(d) => tokio::time::timeout(d, fut)
                .await
                .map_err(|_| ForwarderErrorFeature::new(ForwarderError::RequestTimedOut))?,
            None => fut.await,
        };

        match result {
            Ok(resp) => {
                let (parts, body) = resp.into_parts();
                Ok(http::Response::from_parts(parts, body.boxed()))
            }
            Err(e) => Err(ForwarderErrorFeature::with_cause(
                ForwarderError::Request,
                e.to_string(),
            )),
        }
    }
}

/// Builds the outbound probe request for a destination (spec §4.4). The
/// transform internals (headers, path, method) are an external concern —
/// this is the narrow seam the prober calls through.
pub trait ProbingRequestFactory: Send + Sync {
    fn build(&self, address: &str) -> http::Request<BoxBody>;
}

/// Simple GET-based probe factory, mirroring the teacher's
/// `upstream::health::check_one_node` URL construction.
pub struct GetProbingRequestFactory {
    pub path: String,
}

impl ProbingRequestFactory for GetProbingRequestFactory {
    fn build(&self, address: &str) -> http::Request<BoxBody> {
        let uri: http::Uri = format!("{}{}", address, self.path)
            .parse()
            .unwrap_or_else(|_| http::Uri::from_static("/"));
        http::Request::builder()
            .method(http::Method::GET)
            .uri(uri)
            .body(empty_body())
            .expect("probe request is always well-formed")
    }
}
