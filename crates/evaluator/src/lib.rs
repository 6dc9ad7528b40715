//! Client for the out-of-process evaluation service.
//!
//! The service generates problems, tests, and solutions for a challenge and
//! runs them in a sandbox; this crate hides the submit/poll/retry dance and
//! hands back the full trail. Evaluation mode (standard vs enhanced) is a
//! value choice carried in the request's environment name.

mod client;
mod fixed;
mod request;

pub use client::Evaluate;
pub use client::EvaluatorClient;
pub use fixed::FixedEvaluator;
pub use request::ChallengeRequest;
pub use request::JobState;
pub use request::JobStatus;
pub use request::JobTicket;
