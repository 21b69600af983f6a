//! Integration tests for the chatwire library.
//! These tests require a running backend; set CHATWIRE_URL to enable them.

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use chatwire::{BackendClient, ChatRequest, StreamingChatSession, TurnEvent};

    fn backend() -> Option<BackendClient> {
        let url = std::env::var("CHATWIRE_URL").ok()?;
        Some(BackendClient::new(Some(url)).expect("Failed to create client"))
    }

    #[tokio::test]
    async fn test_health_and_config() {
        let Some(client) = backend() else {
            eprintln!("Skipping test: CHATWIRE_URL not set");
            return;
        };

        client.health().await.expect("backend should be healthy");
        let config = client
            .generation_config()
            .await
            .expect("config fetch should succeed");
        assert!(!config.model.is_empty());
    }

    #[tokio::test]
    async fn test_streaming_turn() {
        let Some(client) = backend() else {
            eprintln!("Skipping test: CHATWIRE_URL not set");
            return;
        };

        let session = StreamingChatSession::new(client);
        let turn = session
            .send(ChatRequest::new("Say 'test passed'").with_max_tokens(16))
            .await
            .expect("stream request should succeed");

        let events: Vec<_> = turn.collect().await;
        let terminal = events.last().expect("stream should yield events");
        assert!(
            matches!(terminal, TurnEvent::Completed),
            "expected a completed turn, got {terminal:?}"
        );
    }

    #[tokio::test]
    async fn test_usage_stats() {
        let Some(client) = backend() else {
            eprintln!("Skipping test: CHATWIRE_URL not set");
            return;
        };

        let stats = client
            .usage_stats()
            .await
            .expect("stats fetch should succeed");
        assert!(!stats.model_config.model.is_empty());
    }
}
