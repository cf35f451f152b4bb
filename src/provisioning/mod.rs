//! Steps run while provisioning an instance.

mod edp_registration;
mod nats_streaming;

pub use edp_registration::{select_environment_key, EdpRegistrationStep};
pub use nats_streaming::{NatsStreamingStep, NATS_STREAMING_COMPONENT};
