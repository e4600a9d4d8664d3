// Controller name for GatewayClasses managed by this control plane.
pub const GATEWAY_CLASS_CONTROLLER_NAME: &str = "gateway.networking.k8s.io/vs-controlplane";

// The finalizer used to reset status and withdraw the virtual service of a deleted Gateway.
pub const GATEWAY_FINALIZER: &str = "vs-controlplane.gateway.networking.k8s.io/virtual-service";

// Field selector restricting the Secret watch to TLS secrets.
pub const TLS_SECRET_FIELD_SELECTOR: &str = "type=kubernetes.io/tls";

// Data keys of a kubernetes.io/tls Secret.
pub const TLS_SECRET_CERT_KEY: &str = "tls.crt";
pub const TLS_SECRET_KEY_KEY: &str = "tls.key";

// Profiles referenced by every gateway parent virtual service.
pub const DEFAULT_L7_APP_PROFILE: &str = "System-HTTP";
pub const DEFAULT_TCP_NW_PROFILE: &str = "System-TCP-Proxy";

// Certificate type set on TLS key/cert nodes attached to a virtual service.
pub const CERT_TYPE_VS: &str = "SSL_CERTIFICATE_TYPE_VIRTUALSERVICE";

pub const ADDRESS_TYPE_IP: &str = "IPAddress";

// Upper bound on status patch attempts for a single event.
pub const MAX_STATUS_PATCH_ATTEMPTS: usize = 5;

pub const GATEWAY_API_GROUP: &str = "gateway.networking.k8s.io";

// Field manager used for server-side apply of GatewayClass status.
pub const FIELD_MANAGER: &str = "vs-controlplane-field-manager";

// Namespace annotation overriding the VIP network of Gateways in that namespace.
pub const VIP_NETWORK_ANNOTATION: &str = "vs-controlplane.gateway.networking.k8s.io/vip-network";
