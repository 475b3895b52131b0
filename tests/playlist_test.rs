//! Integration tests for playlist actuation against a mock backend

#[cfg(feature = "playlist")]
mod playlist_tests {
    use emotiplay_agent::capture::{EncodedFrame, FrameProvider};
    use emotiplay_agent::config::{Config, PlaylistConfig};
    use emotiplay_agent::core::EmotionClass;
    use emotiplay_agent::pipeline::{DetectionPipeline, PipelineEvent};
    use emotiplay_agent::playlist::{PlaylistClient, PlaylistError};
    use emotiplay_agent::stream::transport::memory;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn playlist_config(base_url: String) -> PlaylistConfig {
        PlaylistConfig {
            enabled: true,
            base_url,
            timeout: Duration::from_secs(2),
        }
    }

    #[tokio::test]
    async fn test_play_posts_playlist_key() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/spotify/play"))
            .and(body_json(json!({"emotion": "surprise"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"message": "Playing surprise"})))
            .expect(1)
            .mount(&server)
            .await;

        let client = PlaylistClient::new(&playlist_config(server.uri())).unwrap();
        let ack = client.play(EmotionClass::Surprised).await.unwrap();
        assert_eq!(ack.message.as_deref(), Some("Playing surprise"));
    }

    #[tokio::test]
    async fn test_pause_and_devices() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/spotify/pause"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"message": "Paused"})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/spotify/devices"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "devices": [
                    {"id": "a1", "name": "Desk speaker", "type": "Speaker", "is_active": false},
                    {"id": "b2", "name": "Laptop", "type": "Computer", "is_active": true, "volume_percent": 40}
                ]
            })))
            .mount(&server)
            .await;

        let client = PlaylistClient::new(&playlist_config(server.uri())).unwrap();
        assert_eq!(client.pause().await.unwrap().message.as_deref(), Some("Paused"));

        let devices = client.devices().await.unwrap();
        assert_eq!(devices.len(), 2);
        assert!(devices[1].is_active);
        assert_eq!(devices[1].volume_percent, Some(40));
    }

    #[tokio::test]
    async fn test_server_error_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/spotify/play"))
            .respond_with(ResponseTemplate::new(401).set_body_string("Access token not available"))
            .mount(&server)
            .await;

        let client = PlaylistClient::new(&playlist_config(server.uri())).unwrap();
        match client.play(EmotionClass::Happy).await {
            Err(PlaylistError::Server { status, message }) => {
                assert_eq!(status, 401);
                assert!(message.contains("Access token"));
            }
            other => panic!("expected server error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_network_error() {
        let client = PlaylistClient::new(&playlist_config("http://127.0.0.1:9".to_string())).unwrap();
        assert!(matches!(
            client.pause().await,
            Err(PlaylistError::Network(_))
        ));
    }

    #[tokio::test]
    async fn test_pipeline_switches_only_on_class_change() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/spotify/play"))
            .and(body_json(json!({"emotion": "happy"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"message": "ok"})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/spotify/play"))
            .and(body_json(json!({"emotion": "sad"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"message": "ok"})))
            .expect(1)
            .mount(&server)
            .await;

        let mut config = Config::default();
        config.playlist = playlist_config(server.uri());
        config.history.dedup.enabled = false;

        let (connector, mut dials) = memory::pair();
        let mut pipeline = DetectionPipeline::new(&config, connector);
        let events = pipeline.subscribe();
        let provider: Arc<dyn FrameProvider> = Arc::new(|| Some(EncodedFrame::from_data_url("QUJD")));
        pipeline.start(provider);

        let peer = dials.next_dial().await.unwrap().accept();
        for label in ["Happy", "Happy", "Happy", "Sad"] {
            peer.send_text(format!(r#"{{"emotions": [{{"emotion": "{label}", "confidence": 0.8}}]}}"#));
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        let mut actuated = Vec::new();
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while actuated.len() < 2 && std::time::Instant::now() < deadline {
            match events.try_recv() {
                Ok(PipelineEvent::Actuated { class, ok }) => {
                    assert!(ok);
                    actuated.push(class);
                }
                Ok(_) => {}
                Err(_) => tokio::time::sleep(Duration::from_millis(20)).await,
            }
        }
        assert_eq!(actuated.len(), 2);
        assert!(actuated.contains(&EmotionClass::Happy));
        assert!(actuated.contains(&EmotionClass::Sad));

        pipeline.stop_and_wait().await;
    }

    async fn wait_for_actuations(
        events: &crossbeam_channel::Receiver<PipelineEvent>,
        want: usize,
    ) -> Vec<EmotionClass> {
        let mut actuated = Vec::new();
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while actuated.len() < want && std::time::Instant::now() < deadline {
            match events.try_recv() {
                Ok(PipelineEvent::Actuated { class, ok }) => {
                    assert!(ok);
                    actuated.push(class);
                }
                Ok(_) => {}
                Err(_) => tokio::time::sleep(Duration::from_millis(20)).await,
            }
        }
        actuated
    }

    #[tokio::test]
    async fn test_restart_replays_current_class() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/spotify/play"))
            .and(body_json(json!({"emotion": "happy"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"message": "ok"})))
            .expect(2)
            .mount(&server)
            .await;

        let mut config = Config::default();
        config.playlist = playlist_config(server.uri());

        let (connector, mut dials) = memory::pair();
        let mut pipeline = DetectionPipeline::new(&config, connector);
        let events = pipeline.subscribe();
        let provider: Arc<dyn FrameProvider> = Arc::new(|| Some(EncodedFrame::from_data_url("QUJD")));
        let happy = r#"{"emotions": [{"emotion": "Happy", "confidence": 0.8}]}"#;

        pipeline.start(Arc::clone(&provider));
        let peer = dials.next_dial().await.unwrap().accept();
        peer.send_text(happy);
        assert_eq!(wait_for_actuations(&events, 1).await, vec![EmotionClass::Happy]);
        pipeline.stop_and_wait().await;

        pipeline.start(provider);
        let peer = dials.next_dial().await.unwrap().accept();
        peer.send_text(happy);
        assert_eq!(wait_for_actuations(&events, 1).await, vec![EmotionClass::Happy]);

        pipeline.stop_and_wait().await;
    }
}
