//! Domain Models

pub mod attempt;
pub mod delivery;
pub mod endpoint;
pub mod event;
pub mod project;
pub mod subscription;

pub use attempt::DeliveryAttempt;
pub use delivery::{DeliveryMetadata, DeliveryStatus, EventDelivery, RetryConfig, RetryStrategy};
pub use endpoint::{
    ClientAssertion, ClientCertificate, ContentType, Endpoint, EndpointAuthentication, EndpointSecret,
    EndpointStatus, OAuth2AuthType, OAuth2Config,
};
pub use event::Event;
pub use project::{Project, ProjectConfig};
pub use subscription::{FilterConfig, Subscription};

/// New random entity id
pub(crate) fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
