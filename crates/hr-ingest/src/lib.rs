//! HookRelay Broker Ingestion
//!
//! Pull workers that turn broker messages into canonical create-event
//! requests and hand them to the same validation gate as the HTTP API:
//! - BrokerSource: poll/ack/nack over one transport
//! - Normalizer: dispatch-mode attribute, JSON envelope, optional transforms
//! - SourceRunner: N workers per source; rejections are dropped, enqueue failures redelivered
//!
//! Transports: SQS (`sqs` feature), Google Pub/Sub REST, AMQP (`amqp` feature), Redis lists.

pub mod error;
pub mod normalizer;
pub mod runner;
pub mod source;
pub mod sources;
pub mod transform;

pub use error::{IngestError, Rejection, Result};
pub use normalizer::Normalizer;
pub use runner::{MessageOutcome, SourceRunner};
pub use source::{BrokerSource, RawMessage};
pub use sources::build_source;
pub use transform::MessageTransform;
