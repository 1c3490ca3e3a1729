/// Common span attribute names.
/// The name either follow the OpenTelemetry semantic conventions,
/// or is specific to Sail.
pub struct SpanAttribute;

impl SpanAttribute {
    pub const EXCEPTION_MESSAGE: &'static str = "exception.message";
    pub const RETRY_ATTEMPT: &'static str = "retry.attempt";
    pub const K8S_NAMESPACE_NAME: &'static str = "k8s.namespace.name";
    pub const SUBMIT_APP_ID: &'static str = "submit.app.id";
}
