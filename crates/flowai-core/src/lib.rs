pub mod batch;
pub mod errors;
pub mod model;
pub mod provider;
pub mod tokens;

pub use batch::{BatchFailure, BatchOutcome, BatchStatus};
pub use errors::ProviderError;
pub use model::{BreakOut, Client, Entity, EntityKind, Programme, Relation, Sequence, Session, Sponsor, Status};
pub use provider::{GenerateOptions, Generation, ProviderKind, TextProvider};
pub use tokens::TokenUsage;
