use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use flowai_core::{BatchOutcome, GenerateOptions, Generation, ProviderError, Status, TextProvider};
use flowai_settings::GatewaySettings;
use flowai_store::{ClientRepo, ConversationRepo, ConversationRow, Database, SessionRepo};

use crate::error::GatewayError;
use crate::registry::ProviderRegistry;

/// One conversation to create. A missing provider name uses the default.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ConversationRequest {
    #[serde(default)]
    pub provider: Option<String>,
    pub user_input: String,
}

impl ConversationRequest {
    pub fn new(provider: Option<&str>, user_input: &str) -> Self {
        Self {
            provider: provider.map(str::to_string),
            user_input: user_input.to_string(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct GatewayConfig {
    /// Upper bound on a single provider call.
    pub request_timeout: Duration,
    pub options: GenerateOptions,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self::from_settings(&GatewaySettings::default())
    }
}

impl GatewayConfig {
    pub fn from_settings(settings: &GatewaySettings) -> Self {
        Self {
            request_timeout: Duration::from_millis(settings.request_timeout_ms),
            options: GenerateOptions::default(),
        }
    }
}

/// Recommendations generated for a client's sessions.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ClientAnalysis {
    pub recommendations: String,
    pub tokens_used: u32,
    pub analyzed_sessions: usize,
}

pub struct ConversationGateway {
    registry: ProviderRegistry,
    config: GatewayConfig,
    conversations: ConversationRepo,
    clients: ClientRepo,
    sessions: SessionRepo,
}

impl ConversationGateway {
    pub fn new(db: Database, registry: ProviderRegistry, config: GatewayConfig) -> Self {
        Self {
            registry,
            config,
            conversations: ConversationRepo::new(db.clone()),
            clients: ClientRepo::new(db.clone()),
            sessions: SessionRepo::new(db),
        }
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Generate a response for one prompt and persist the exchange.
    #[instrument(
        skip(self, request),
        fields(provider = request.provider.as_deref().unwrap_or("default"))
    )]
    pub async fn create(&self, request: &ConversationRequest) -> Result<ConversationRow, GatewayError> {
        if request.user_input.trim().is_empty() {
            return Err(GatewayError::Validation("user_input must not be empty".into()));
        }
        let provider = self.registry.resolve(request.provider.as_deref())?;
        let generation = self.generate(provider.as_ref(), &request.user_input).await?;

        let row = self.conversations.create(
            provider.kind(),
            &request.user_input,
            &generation.text,
            generation.usage,
        )?;
        info!(
            uuid = %row.uuid,
            provider = %row.provider,
            total_tokens = row.tokens.total_tokens,
            "conversation created"
        );
        Ok(row)
    }

    /// Create each conversation in turn. One failure never aborts the rest.
    #[instrument(skip(self, requests), fields(count = requests.len()))]
    pub async fn bulk_create(&self, requests: &[ConversationRequest]) -> BatchOutcome<ConversationRow> {
        let mut outcome = BatchOutcome::default();
        for (index, request) in requests.iter().enumerate() {
            let result = self.create(request).await;
            if let Err(e) = &result {
                warn!(index, error_kind = e.error_kind(), error = %e, "bulk conversation item failed");
            }
            outcome.record(index, result);
        }
        info!(
            succeeded = outcome.success.len(),
            failed = outcome.errors.len(),
            "bulk conversation create finished"
        );
        outcome
    }

    /// Ask the default provider for recommendations on a client's normal
    /// sessions. The exchange is not persisted.
    #[instrument(skip(self), fields(client = %client_uuid))]
    pub async fn analyze_client(&self, client_uuid: &Uuid) -> Result<ClientAnalysis, GatewayError> {
        let client = self.clients.get_by_uuid(client_uuid)?;
        let sessions = self
            .sessions
            .list_for_client(client.id, Some(Status::Normal))?;

        let mut context = format!(
            "Client: {}\nContext: {}\nObjectives: {}\n\n",
            client.name, client.context, client.objectives
        );
        for session in &sessions {
            context.push_str(&format!(
                "Session: {}\nObjectives: {}\nDesign principles: {}\n\n",
                session.title, session.objectives, session.design_principles
            ));
        }
        let prompt = format!(
            "As an expert in collaborative session design, analyse the following data \
             and propose recommendations to improve future sessions:\n\n{context}"
        );

        let provider = self.registry.resolve(None)?;
        let generation = self.generate(provider.as_ref(), &prompt).await?;
        Ok(ClientAnalysis {
            recommendations: generation.text,
            tokens_used: generation.usage.total_tokens,
            analyzed_sessions: sessions.len(),
        })
    }

    /// Single attempt bounded by the configured timeout.
    async fn generate(
        &self,
        provider: &dyn TextProvider,
        prompt: &str,
    ) -> Result<Generation, GatewayError> {
        let started = Instant::now();
        let call = provider.generate(prompt, &self.config.options);
        match tokio::time::timeout(self.config.request_timeout, call).await {
            Ok(Ok(generation)) => {
                debug!(
                    provider = %provider.kind(),
                    model = provider.model(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    total_tokens = generation.usage.total_tokens,
                    "provider call succeeded"
                );
                Ok(generation)
            }
            Ok(Err(e)) => {
                warn!(provider = %provider.kind(), error_kind = e.error_kind(), error = %e, "provider call failed");
                Err(e.into())
            }
            Err(_) => {
                warn!(
                    provider = %provider.kind(),
                    timeout_ms = self.config.request_timeout.as_millis() as u64,
                    "provider call timed out"
                );
                Err(ProviderError::Timeout(self.config.request_timeout).into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use flowai_core::{BatchStatus, Client, ProviderKind, Session};

    use super::*;
    use crate::mock::{ScriptedProvider, ScriptedResponse};

    fn gateway_with(provider: Arc<ScriptedProvider>, config: GatewayConfig) -> (Database, ConversationGateway) {
        let db = Database::in_memory().unwrap();
        let mut registry = ProviderRegistry::new(ProviderKind::Grok);
        let _ = registry.register(provider);
        (db.clone(), ConversationGateway::new(db, registry, config))
    }

    fn stored(db: &Database) -> Vec<ConversationRow> {
        ConversationRepo::new(db.clone()).list(100).unwrap()
    }

    #[tokio::test]
    async fn create_persists_exchange() {
        let provider = Arc::new(ScriptedProvider::new(
            ProviderKind::Grok,
            vec![ScriptedResponse::text("Start with a check-in.", 12, 5)],
        ));
        let (db, gateway) = gateway_with(provider.clone(), GatewayConfig::default());

        let row = gateway
            .create(&ConversationRequest::new(None, "How should we open?"))
            .await
            .unwrap();
        assert_eq!(row.provider, ProviderKind::Grok);
        assert_eq!(row.ai_response, "Start with a check-in.");
        assert_eq!(row.tokens.total_tokens, 17);

        let rows = stored(&db);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].uuid, row.uuid);
        assert_eq!(rows[0].user_input, "How should we open?");
        assert_eq!(provider.prompts(), vec!["How should we open?".to_string()]);
    }

    #[tokio::test]
    async fn empty_prompt_is_rejected_before_calling_provider() {
        let provider = Arc::new(ScriptedProvider::new(ProviderKind::Grok, vec![]));
        let (db, gateway) = gateway_with(provider.clone(), GatewayConfig::default());

        let err = gateway
            .create(&ConversationRequest::new(Some("grok"), "   "))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Validation(_)));
        assert_eq!(provider.call_count(), 0);
        assert!(stored(&db).is_empty());
    }

    #[tokio::test]
    async fn unsupported_provider_is_a_configuration_error() {
        let provider = Arc::new(ScriptedProvider::new(ProviderKind::Grok, vec![]));
        let (_db, gateway) = gateway_with(provider, GatewayConfig::default());

        let unknown = gateway
            .create(&ConversationRequest::new(Some("gemini"), "hi"))
            .await
            .unwrap_err();
        assert!(matches!(unknown, GatewayError::UnsupportedProvider(_)));

        let unregistered = gateway
            .create(&ConversationRequest::new(Some("mistral"), "hi"))
            .await
            .unwrap_err();
        assert_eq!(unregistered.error_kind(), "unsupported_provider");
    }

    #[tokio::test]
    async fn provider_failure_is_not_retried_or_persisted() {
        let provider = Arc::new(ScriptedProvider::new(
            ProviderKind::Grok,
            vec![
                ScriptedResponse::Error(ProviderError::ServerError {
                    status: 503,
                    body: "overloaded".into(),
                }),
                ScriptedResponse::text("unused", 1, 1),
            ],
        ));
        let (db, gateway) = gateway_with(provider.clone(), GatewayConfig::default());

        let err = gateway
            .create(&ConversationRequest::new(None, "hello"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            GatewayError::Provider(ProviderError::ServerError { status: 503, .. })
        ));
        assert_eq!(provider.call_count(), 1);
        assert!(stored(&db).is_empty());
    }

    #[tokio::test]
    async fn slow_provider_times_out() {
        let provider = Arc::new(ScriptedProvider::new(
            ProviderKind::Grok,
            vec![ScriptedResponse::delayed(
                Duration::from_secs(5),
                ScriptedResponse::text("too late", 1, 1),
            )],
        ));
        let config = GatewayConfig {
            request_timeout: Duration::from_millis(20),
            ..Default::default()
        };
        let (db, gateway) = gateway_with(provider, config);

        let err = gateway
            .create(&ConversationRequest::new(None, "hello"))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Provider(ProviderError::Timeout(_))));
        assert_eq!(err.error_kind(), "timeout");
        assert!(stored(&db).is_empty());
    }

    #[tokio::test]
    async fn bulk_create_isolates_failures() {
        let provider = Arc::new(ScriptedProvider::new(
            ProviderKind::Grok,
            vec![
                ScriptedResponse::text("one", 1, 1),
                ScriptedResponse::Error(ProviderError::NetworkError("reset".into())),
                ScriptedResponse::text("three", 1, 1),
            ],
        ));
        let (db, gateway) = gateway_with(provider, GatewayConfig::default());

        let requests = vec![
            ConversationRequest::new(None, "first"),
            ConversationRequest::new(None, "second"),
            ConversationRequest::new(None, "third"),
        ];
        let outcome = gateway.bulk_create(&requests).await;

        let responses: Vec<&str> = outcome.success.iter().map(|r| r.ai_response.as_str()).collect();
        assert_eq!(responses, vec!["one", "three"]);
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].index, 1);
        assert!(outcome.errors[0].error.contains("reset"));
        assert_eq!(outcome.status(), BatchStatus::MultiStatus);
        assert_eq!(stored(&db).len(), 2);
    }

    #[tokio::test]
    async fn bulk_create_all_succeed() {
        let provider = Arc::new(ScriptedProvider::new(
            ProviderKind::Grok,
            vec![ScriptedResponse::text("a", 1, 1), ScriptedResponse::text("b", 1, 1)],
        ));
        let (_db, gateway) = gateway_with(provider, GatewayConfig::default());

        let outcome = gateway
            .bulk_create(&[
                ConversationRequest::new(Some("grok"), "x"),
                ConversationRequest::new(None, "y"),
            ])
            .await;
        assert_eq!(outcome.success.len(), 2);
        assert_eq!(outcome.status(), BatchStatus::Created);
    }

    #[test]
    fn request_deserializes_without_provider() {
        let request: ConversationRequest =
            serde_json::from_value(serde_json::json!({"user_input": "hi"})).unwrap();
        assert_eq!(request.provider, None);
        assert_eq!(request.user_input, "hi");
    }

    #[tokio::test]
    async fn analyze_client_uses_normal_sessions() {
        let provider = Arc::new(ScriptedProvider::new(
            ProviderKind::Grok,
            vec![ScriptedResponse::text("Shorter plenaries.", 200, 40)],
        ));
        let (db, gateway) = gateway_with(provider.clone(), GatewayConfig::default());

        let client = ClientRepo::new(db.clone())
            .create(Client {
                name: "Acme".into(),
                objectives: "Align leadership".into(),
                ..Default::default()
            })
            .unwrap();
        let sessions = SessionRepo::new(db.clone());
        let _ = sessions
            .create(Session {
                client_id: client.id,
                title: "Kickoff".into(),
                design_principles: "Divergent then convergent".into(),
                ..Default::default()
            })
            .unwrap();
        let dropped = sessions
            .create(Session {
                client_id: client.id,
                title: "Cancelled".into(),
                ..Default::default()
            })
            .unwrap();
        sessions.set_status(dropped.id, Status::Deleted).unwrap();

        let analysis = gateway.analyze_client(&client.uuid).await.unwrap();
        assert_eq!(analysis.recommendations, "Shorter plenaries.");
        assert_eq!(analysis.tokens_used, 240);
        assert_eq!(analysis.analyzed_sessions, 1);

        let prompt = &provider.prompts()[0];
        assert!(prompt.contains("Client: Acme"));
        assert!(prompt.contains("Objectives: Align leadership"));
        assert!(prompt.contains("Design principles: Divergent then convergent"));
        assert!(!prompt.contains("Cancelled"));
        assert!(stored(&db).is_empty());
    }

    #[tokio::test]
    async fn analyze_unknown_client_is_not_found() {
        let provider = Arc::new(ScriptedProvider::new(ProviderKind::Grok, vec![]));
        let (_db, gateway) = gateway_with(provider.clone(), GatewayConfig::default());

        let err = gateway.analyze_client(&Uuid::now_v7()).await.unwrap_err();
        assert!(matches!(err, GatewayError::Store(flowai_store::StoreError::NotFound(_))));
        assert_eq!(provider.call_count(), 0);
    }
}
