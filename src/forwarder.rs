use crate::context::ProxyContext;
use crate::error::{CoreError, ForwarderError, ForwarderErrorFeature};
use crate::http_client::{empty_body, BoxBody};
use crate::model::Destination;
use crate::registry::ClusterEntry;
use crate::rng::RngFactory;
use http::{StatusCode, Uri};
use std::sync::Arc;
use tracing::warn;

/// Picks a destination and forwards one request (spec §4.1). The only
/// fatal outcome is a pipeline that never populated
/// `ctx.available_destinations` before calling `forward` — every other
/// outcome (no candidates, destination failure) is an ordinary response the
/// caller sends downstream, with the reason recorded on `ctx` for
/// `PassiveEvaluator` to pick up afterward.
pub struct Forwarder {
    rng_factory: Arc<dyn RngFactory>,
}

impl Forwarder {
    pub fn new(rng_factory: Arc<dyn RngFactory>) -> Self {
        Self { rng_factory }
    }

    pub async fn forward(
        &self,
        ctx: &mut ProxyContext,
        cluster_entry: &ClusterEntry,
        request: http::Request<BoxBody>,
    ) -> Result<http::Response<BoxBody>, CoreError> {
        let candidates = ctx.available_destinations.as_ref().ok_or_else(|| {
            CoreError::MisconfiguredPipeline(
                "available_destinations must be computed before forward()".to_string(),
            )
        })?;

        if candidates.is_empty() {
            warn!(
                route = %ctx.route_id,
                cluster = %ctx.cluster.cluster_id,
                "forwarder: no available destinations"
            );
            metrics::counter!(
                "proxy_core_forward_total",
                "cluster" => ctx.cluster.cluster_id.to_string(),
                "outcome" => "no_candidates",
            )
            .increment(1);
            ctx.error_feature = Some(ForwarderErrorFeature::new(ForwarderError::NoAvailableDestinations));
            ctx.record_span_status();
            return Ok(error_response(StatusCode::SERVICE_UNAVAILABLE));
        }

        let destination = if candidates.len() == 1 {
            candidates[0].clone()
        } else {
            warn!(
                route = %ctx.route_id,
                cluster = %ctx.cluster.cluster_id,
                candidates = candidates.len(),
                "forwarder: multiple eligible destinations, picking one at random"
            );
            let mut rng = self.rng_factory.create();
            let idx = rng.pick_index(candidates.len());
            candidates[idx].clone()
        };

        ctx.mark_proxied(destination.id.clone());
        let _guard = ConcurrencyGuard::new(destination.clone(), cluster_entry);

        let request = match retarget(request, &destination.address, ctx.transform.as_ref()) {
            Ok(r) => r,
            Err(message) => {
                warn!(
                    route = %ctx.route_id,
                    cluster = %ctx.cluster.cluster_id,
                    destination = %destination.id,
                    error = %message,
                    "forwarder: could not build a request against the chosen destination"
                );
                ctx.error_feature = Some(ForwarderErrorFeature::with_cause(ForwarderError::Request, message));
                ctx.record_span_status();
                return Ok(error_response(StatusCode::BAD_GATEWAY));
            }
        };

        let timeout = ctx.cluster.request_config.timeout;
        let start = std::time::Instant::now();
        let result = match ctx.cluster.http_client.send(request, timeout).await {
            Ok(resp) => {
                let mut buf = itoa::Buffer::new();
                let status_str = buf.format(resp.status().as_u16());
                metrics::counter!(
                    "proxy_core_forward_total",
                    "cluster" => ctx.cluster.cluster_id.to_string(),
                    "destination" => destination.id.to_string(),
                    "status_code" => status_str.to_owned(),
                    "outcome" => "success",
                )
                .increment(1);
                Ok(resp)
            }
            Err(feature) => {
                warn!(
                    route = %ctx.route_id,
                    cluster = %ctx.cluster.cluster_id,
                    destination = %destination.id,
                    error = %feature.error,
                    "forwarder: destination request failed"
                );
                metrics::counter!(
                    "proxy_core_forward_total",
                    "cluster" => ctx.cluster.cluster_id.to_string(),
                    "destination" => destination.id.to_string(),
                    "outcome" => "failure",
                )
                .increment(1);
                ctx.error_feature = Some(feature);
                Ok(error_response(StatusCode::BAD_GATEWAY))
            }
        };
        metrics::histogram!(
            "proxy_core_forward_duration_seconds",
            "cluster" => ctx.cluster.cluster_id.to_string(),
        )
        .record(start.elapsed().as_secs_f64());
        ctx.record_span_status();
        result
    }
}

/// Rewrites `request`'s URI onto `address`, keeping the inbound path and
/// query, then applies the route's transform (spec §4.1 step 6: "Invoke the
/// HTTP client with (ctx, destination.address, ..., transformer)").
fn retarget(
    request: http::Request<BoxBody>,
    address: &str,
    transform: &dyn crate::model::RequestTransform,
) -> Result<http::Request<BoxBody>, String> {
    let (mut parts, body) = request.into_parts();

    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let uri: Uri = format!("{}{}", address.trim_end_matches('/'), path_and_query)
        .parse()
        .map_err(|e: http::uri::InvalidUri| e.to_string())?;
    parts.uri = uri;

    transform.apply(&mut parts);

    Ok(http::Request::from_parts(parts, body))
}

fn error_response(status: StatusCode) -> http::Response<BoxBody> {
    http::Response::builder()
        .status(status)
        .body(empty_body())
        .expect("status + empty body is always a valid response")
}

/// RAII concurrency accounting on both the destination and its owning
/// cluster, incremented on pick and decremented unconditionally when the
/// request finishes or is dropped early — e.g. the client disconnects mid
/// stream. Grounded in the teacher's `upstream::loadbalance::RequestGuard`.
struct ConcurrencyGuard<'a> {
    destination: Arc<Destination>,
    cluster: &'a ClusterEntry,
}

impl<'a> ConcurrencyGuard<'a> {
    fn new(destination: Arc<Destination>, cluster: &'a ClusterEntry) -> Self {
        destination.inc_concurrency();
        cluster.inc_concurrency();
        metrics::gauge!(
            "proxy_core_destination_in_flight",
            "destination" => destination.id.to_string(),
        )
        .increment(1.0);
        Self { destination, cluster }
    }
}

impl<'a> Drop for ConcurrencyGuard<'a> {
    fn drop(&mut self) {
        self.destination.dec_concurrency();
        self.cluster.dec_concurrency();
        metrics::gauge!(
            "proxy_core_destination_in_flight",
            "destination" => self.destination.id.to_string(),
        )
        .decrement(1.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http_client::{HyperProxyHttpClient, PoolSettings, ProxyHttpClient};
    use crate::model::{ClusterConfigSnapshot, DestinationId, HealthCheckSettings};
    use crate::rng::ScriptedRngFactory;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::time::Duration;

    struct FailingClient;
    #[async_trait]
    impl ProxyHttpClient for FailingClient {
        async fn send(
            &self,
            _request: http::Request<BoxBody>,
            _timeout: Option<Duration>,
        ) -> Result<http::Response<BoxBody>, ForwarderErrorFeature> {
            Err(ForwarderErrorFeature::new(ForwarderError::RequestTimedOut))
        }
    }

    struct CapturingClient {
        seen_uri: std::sync::Mutex<Option<String>>,
    }

    #[async_trait]
    impl ProxyHttpClient for CapturingClient {
        async fn send(
            &self,
            request: http::Request<BoxBody>,
            _timeout: Option<Duration>,
        ) -> Result<http::Response<BoxBody>, ForwarderErrorFeature> {
            *self.seen_uri.lock().unwrap() = Some(request.uri().to_string());
            Ok(http::Response::builder().status(200).body(empty_body()).unwrap())
        }
    }

    fn cluster_with_client(client: Arc<dyn ProxyHttpClient>) -> Arc<ClusterConfigSnapshot> {
        Arc::new(ClusterConfigSnapshot {
            cluster_id: crate::model::ClusterId::new("c1".to_string()),
            http_client: client,
            metadata: HashMap::new(),
            health_check: HealthCheckSettings::default(),
            active_policy: "ConsecutiveFailures".to_string(),
            passive_policy: "TransportFailureRate".to_string(),
            request_config: Default::default(),
        })
    }

    fn registry_entry(cluster: Arc<ClusterConfigSnapshot>) -> Arc<crate::registry::ClusterEntry> {
        let registry = crate::registry::DestinationRegistry::new();
        registry.upsert_cluster((*cluster).clone())
    }

    fn get_request() -> http::Request<BoxBody> {
        http::Request::builder().uri("/x").body(empty_body()).unwrap()
    }

    #[tokio::test]
    async fn empty_candidate_set_returns_503_without_fatal_error() {
        let cluster = cluster_with_client(Arc::new(HyperProxyHttpClient::new(&PoolSettings::default())));
        let entry = registry_entry(cluster.clone());
        let forwarder = Forwarder::new(Arc::new(ScriptedRngFactory::new(vec![])));
        let mut ctx = ProxyContext::new("r1".to_string(), cluster);
        ctx.available_destinations = Some(vec![]);

        let resp = forwarder.forward(&mut ctx, &entry, get_request()).await.unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(matches!(
            ctx.error_feature.as_ref().unwrap().error,
            ForwarderError::NoAvailableDestinations
        ));
    }

    #[tokio::test]
    async fn uncomputed_candidates_is_a_fatal_pipeline_error() {
        let cluster = cluster_with_client(Arc::new(HyperProxyHttpClient::new(&PoolSettings::default())));
        let entry = registry_entry(cluster.clone());
        let forwarder = Forwarder::new(Arc::new(ScriptedRngFactory::new(vec![])));
        let mut ctx = ProxyContext::new("r1".to_string(), cluster);

        let result = forwarder.forward(&mut ctx, &entry, get_request()).await;
        assert!(matches!(result, Err(CoreError::MisconfiguredPipeline(_))));
    }

    #[tokio::test]
    async fn destination_failure_releases_concurrency_guard() {
        let cluster = cluster_with_client(Arc::new(FailingClient));
        let entry = registry_entry(cluster.clone());
        let forwarder = Forwarder::new(Arc::new(ScriptedRngFactory::new(vec![])));
        let dest = Arc::new(Destination::new(
            DestinationId::new("d1".to_string()),
            "http://h1".to_string(),
            HashMap::new(),
        ));
        let mut ctx = ProxyContext::new("r1".to_string(), cluster);
        ctx.available_destinations = Some(vec![dest.clone()]);

        assert_eq!(dest.concurrency(), 0);
        let resp = forwarder.forward(&mut ctx, &entry, get_request()).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(dest.concurrency(), 0, "guard must release on completion");
        assert!(matches!(
            ctx.error_feature.as_ref().unwrap().error,
            ForwarderError::RequestTimedOut
        ));
    }

    #[tokio::test]
    async fn outbound_request_is_retargeted_onto_the_chosen_destination() {
        let client = Arc::new(CapturingClient {
            seen_uri: std::sync::Mutex::new(None),
        });
        let cluster = cluster_with_client(client.clone());
        let entry = registry_entry(cluster.clone());
        let forwarder = Forwarder::new(Arc::new(ScriptedRngFactory::new(vec![])));
        let dest = Arc::new(Destination::new(
            DestinationId::new("d1".to_string()),
            "http://10.0.0.5:8080".to_string(),
            HashMap::new(),
        ));
        let mut ctx = ProxyContext::new("r1".to_string(), cluster);
        ctx.available_destinations = Some(vec![dest]);

        let request = http::Request::builder().uri("/orders?id=7").body(empty_body()).unwrap();
        let resp = forwarder.forward(&mut ctx, &entry, request).await.unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            client.seen_uri.lock().unwrap().as_deref(),
            Some("http://10.0.0.5:8080/orders?id=7")
        );
    }
}
