pub mod breakouts;
pub mod clients;
pub mod conversations;
pub mod database;
pub mod entities;
pub mod error;
pub mod programmes;
pub mod row_helpers;
pub mod schema;
pub mod sequences;
pub mod sessions;
pub mod sponsors;

pub use breakouts::BreakOutRepo;
pub use clients::{ClientDashboard, ClientRepo};
pub use conversations::{ConversationRepo, ConversationRow};
pub use database::Database;
pub use error::StoreError;
pub use programmes::{ProgrammeRepo, ProgrammeStatistics};
pub use sequences::SequenceRepo;
pub use sessions::{BreakOutSummary, SequenceSummary, SessionRepo, SessionSummary};
pub use sponsors::SponsorRepo;
