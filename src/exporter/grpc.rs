use async_trait::async_trait;
use opentelemetry_proto::tonic::collector::metrics::v1::{
    metrics_service_client::MetricsServiceClient, ExportMetricsServiceRequest,
};
use opentelemetry_proto::tonic::collector::trace::v1::{
    trace_service_client::TraceServiceClient, ExportTraceServiceRequest,
};
use opentelemetry_proto::tonic::metrics::v1::ResourceMetrics;
use opentelemetry_proto::tonic::trace::v1::ResourceSpans;
use tonic::metadata::{Ascii, MetadataValue};
use tonic::service::interceptor::InterceptedService;
use tonic::service::Interceptor;
use tonic::transport::{Channel, ClientTlsConfig};

use super::{ExportError, OtlpTransport, EXPORT_TIMEOUT};

const API_KEY_METADATA: &str = "api-key";

/// Adds the collector license key to every request
#[derive(Debug, Clone)]
pub struct ApiKeyInterceptor {
    api_key: MetadataValue<Ascii>,
}

impl ApiKeyInterceptor {
    pub fn new(api_key: &str) -> Result<Self, ExportError> {
        let api_key = api_key
            .parse()
            .map_err(|_| ExportError::InvalidApiKey("not a valid header value".to_string()))?;
        Ok(Self { api_key })
    }
}

impl Interceptor for ApiKeyInterceptor {
    fn call(&mut self, mut request: tonic::Request<()>) -> Result<tonic::Request<()>, tonic::Status> {
        request
            .metadata_mut()
            .insert(API_KEY_METADATA, self.api_key.clone());
        Ok(request)
    }
}

type Intercepted = InterceptedService<Channel, ApiKeyInterceptor>;

/// OTLP/gRPC transport over one lazily connected TLS channel
///
/// The clients are cheap handles onto the same channel and are cloned per
/// call, so concurrent chunks multiplex over a single connection.
#[derive(Clone)]
pub struct GrpcTransport {
    metrics: MetricsServiceClient<Intercepted>,
    traces: TraceServiceClient<Intercepted>,
}

impl GrpcTransport {
    /// `host` is `name:port`; TLS is always used and every RPC carries the
    /// export deadline
    pub fn new(host: &str, api_key: &str) -> Result<Self, ExportError> {
        let interceptor = ApiKeyInterceptor::new(api_key)?;

        let channel = Channel::from_shared(format!("https://{}", host))
            .map_err(|e| ExportError::Transport(e.to_string()))?
            .tls_config(ClientTlsConfig::new().with_webpki_roots())
            .map_err(|e| ExportError::Transport(e.to_string()))?
            .user_agent(concat!("pxotel/", env!("CARGO_PKG_VERSION")))
            .map_err(|e| ExportError::Transport(e.to_string()))?
            .timeout(EXPORT_TIMEOUT)
            .connect_lazy();

        tracing::info!(host, "OTLP exporter configured");

        Ok(Self {
            metrics: MetricsServiceClient::with_interceptor(channel.clone(), interceptor.clone()),
            traces: TraceServiceClient::with_interceptor(channel, interceptor),
        })
    }
}

#[async_trait]
impl OtlpTransport for GrpcTransport {
    async fn export_metrics(&self, metrics: Vec<ResourceMetrics>) -> Result<(), ExportError> {
        let request = ExportMetricsServiceRequest {
            resource_metrics: metrics,
        };
        let response = self
            .metrics
            .clone()
            .export(request)
            .await
            .map_err(status_error)?
            .into_inner();

        if let Some(partial) = response.partial_success {
            if partial.rejected_data_points > 0 {
                tracing::warn!(
                    rejected = partial.rejected_data_points,
                    message = %partial.error_message,
                    "Collector rejected some data points"
                );
            }
        }
        Ok(())
    }

    async fn export_spans(&self, spans: Vec<ResourceSpans>) -> Result<(), ExportError> {
        let request = ExportTraceServiceRequest {
            resource_spans: spans,
        };
        let response = self
            .traces
            .clone()
            .export(request)
            .await
            .map_err(status_error)?
            .into_inner();

        if let Some(partial) = response.partial_success {
            if partial.rejected_spans > 0 {
                tracing::warn!(
                    rejected = partial.rejected_spans,
                    message = %partial.error_message,
                    "Collector rejected some spans"
                );
            }
        }
        Ok(())
    }
}

fn status_error(status: tonic::Status) -> ExportError {
    match status.code() {
        tonic::Code::Unavailable | tonic::Code::DeadlineExceeded | tonic::Code::Unknown => {
            ExportError::Transport(status.to_string())
        }
        _ => ExportError::Rejected(status.to_string()),
    }
}
