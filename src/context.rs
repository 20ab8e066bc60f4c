use crate::error::ForwarderErrorFeature;
use crate::model::{ClusterConfigSnapshot, Destination, DestinationId, IdentityTransform, RequestTransform};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Per-request state threaded through the Forwarder and, after the fact,
/// the PassiveEvaluator (spec §4.1/§4.2). Analogous to the teacher's
/// `proxy::context::RequestContext`, trimmed to the fields this core
/// actually needs — routing, filters and logging metadata live upstream
/// of this crate's boundary (spec §1 Non-goals).
pub struct ProxyContext {
    pub route_id: String,
    pub cluster: Arc<ClusterConfigSnapshot>,
    /// The route's request-transform function (spec §4.1 step 6's
    /// `transformer`), applied to the outbound request after its URI has
    /// been rewritten onto the chosen destination. Defaults to a no-op so
    /// routes that carry none don't need to construct one.
    pub transform: Arc<dyn RequestTransform>,
    /// Populated once the Forwarder has computed the eligible candidate
    /// set; `None` before that point distinguishes "not yet computed" from
    /// "computed and empty".
    pub available_destinations: Option<Vec<Arc<Destination>>>,
    /// Signaled if the client disconnects mid-request, so the Forwarder can
    /// distinguish a client-caused abort from a destination failure
    /// (spec §4.2's failure-determination list).
    pub request_aborted: CancellationToken,
    pub proxied_destination: Option<DestinationId>,
    pub error_feature: Option<ForwarderErrorFeature>,
    pub span: tracing::Span,
}

impl ProxyContext {
    pub fn new(route_id: String, cluster: Arc<ClusterConfigSnapshot>) -> Self {
        let span = tracing::info_span!(
            "proxy.forward",
            proxy.route_id = %route_id,
            proxy.cluster_id = %cluster.cluster_id,
            proxy.destination_id = tracing::field::Empty,
            otel.status_code = tracing::field::Empty,
        );
        Self {
            route_id,
            cluster,
            transform: Arc::new(IdentityTransform),
            available_destinations: None,
            request_aborted: CancellationToken::new(),
            proxied_destination: None,
            error_feature: None,
            span,
        }
    }

    pub fn with_transform(mut self, transform: Arc<dyn RequestTransform>) -> Self {
        self.transform = transform;
        self
    }

    pub fn mark_proxied(&mut self, destination_id: DestinationId) {
        self.span.record("proxy.destination_id", tracing::field::display(&destination_id));
        self.proxied_destination = Some(destination_id);
    }

    /// Sets the span's terminal status per spec §4.1 step 7 and §6: Ok when
    /// no error feature was recorded, Error otherwise.
    pub fn record_span_status(&self) {
        let status = if self.error_feature.is_none() { "OK" } else { "ERROR" };
        self.span.record("otel.status_code", status);
    }
}
