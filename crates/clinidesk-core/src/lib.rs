pub mod config;
pub mod context;
pub mod gateway;
pub mod poll;
pub mod resources;
pub mod schedule;
pub mod session;

// Re-export main types for convenience
pub use config::Config;
pub use context::{AppContext, CredentialPair, StatusLevel, StatusMessage};
pub use gateway::{ApiGateway, ApiResponse, Payload};
pub use poll::{PollEvent, PollState, SummaryDialog, SummaryPoller};
pub use resources::{Consultation, FieldSet, Patient, PatientRef, Resource, ResourceList, ResourcePage};
pub use schedule::ScheduledTask;
pub use session::{SessionError, SessionStore, TokenStore};
