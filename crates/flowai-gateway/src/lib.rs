//! Conversation gateway: routes prompts to a registered text provider and
//! persists each exchange.

pub mod error;
pub mod gateway;
pub mod mock;
pub mod registry;

pub use error::GatewayError;
pub use gateway::{ClientAnalysis, ConversationGateway, ConversationRequest, GatewayConfig};
pub use mock::{ScriptedProvider, ScriptedResponse};
pub use registry::ProviderRegistry;
