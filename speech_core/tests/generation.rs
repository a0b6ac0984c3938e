//! End-to-end pipeline tests against a scripted in-process WebSocket server
//! standing in for the remote speech API.

use base64::{engine::general_purpose, Engine as _};
use futures_util::{SinkExt, StreamExt};
use tempfile::tempdir;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

use speech_core::{
    Generation, GeneratorConfig, PhonemeAligner, QuotaLimits, SpeechError, SpeechGenerator, Voice,
};

/// What the fake server sends after the client's content turn.
#[derive(Clone)]
enum Script {
    /// Audio frames (one part each) followed by turn completion.
    Audio(Vec<Vec<u8>>),
    /// Immediate turn completion with no audio parts.
    Empty,
    /// A garbled frame, then audio, then completion.
    GarbledThenAudio(Vec<u8>),
}

/// Accept connections forever, replaying `script` on each. Returns a ws URL.
async fn spawn_fake_api(script: Script) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let script = script.clone();
            tokio::spawn(async move {
                let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

                let setup = ws.next().await.unwrap().unwrap();
                let setup: serde_json::Value =
                    serde_json::from_str(setup.to_text().unwrap()).unwrap();
                assert!(setup["setup"]["model"].is_string());
                assert!(
                    setup["setup"]["generation_config"]["speech_config"]["voice_config"]
                        ["prebuilt_voice_config"]["voice_name"]
                        .is_string()
                );
                ws.send(Message::Text(r#"{"setupComplete":{}}"#.into()))
                    .await
                    .unwrap();

                let turn = ws.next().await.unwrap().unwrap();
                let turn: serde_json::Value =
                    serde_json::from_str(turn.to_text().unwrap()).unwrap();
                assert_eq!(turn["clientContent"]["turnComplete"], true);

                let audio_frame = |pcm: &[u8]| {
                    serde_json::json!({
                        "serverContent": {
                            "modelTurn": {
                                "parts": [{
                                    "inlineData": {
                                        "mimeType": "audio/pcm",
                                        "data": general_purpose::STANDARD.encode(pcm)
                                    }
                                }]
                            }
                        }
                    })
                    .to_string()
                };

                match script {
                    Script::Audio(chunks) => {
                        for chunk in &chunks {
                            ws.send(Message::Text(audio_frame(chunk).into()))
                                .await
                                .unwrap();
                        }
                    }
                    Script::Empty => {}
                    Script::GarbledThenAudio(chunk) => {
                        ws.send(Message::Text("this is not json".into())).await.unwrap();
                        ws.send(Message::Text(audio_frame(&chunk).into()))
                            .await
                            .unwrap();
                    }
                }
                ws.send(Message::Text(
                    r#"{"serverContent":{"turnComplete":true}}"#.into(),
                ))
                .await
                .unwrap();
                let _ = ws.close(None).await;
            });
        }
    });
    format!("ws://{addr}")
}

fn test_config(url: &str, output_dir: &std::path::Path) -> GeneratorConfig {
    let mut config = GeneratorConfig::new("test-key", output_dir);
    config.api_url = Some(url.to_string());
    config.quality_validation = false;
    config
}

fn pcm(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

fn fifteen_words() -> String {
    "the quick brown fox jumps over the lazy dog while reciting fifteen carefully counted words"
        .to_string()
}

#[tokio::test]
async fn generates_clip_and_catalog_entry() {
    let dir = tempdir().unwrap();
    // Half a second of audio split across three fragments.
    let url = spawn_fake_api(Script::Audio(vec![
        pcm(&vec![1000i16; 4_000]),
        pcm(&vec![-1000i16; 4_000]),
        pcm(&vec![0i16; 4_000]),
    ]))
    .await;
    let mut generator = SpeechGenerator::new(test_config(&url, dir.path()));

    let generation = generator
        .generate(&fifteen_words(), Voice::Puck, None)
        .await
        .unwrap();

    let clip = match generation {
        Generation::Clip(clip) => clip,
        Generation::NoAudio => panic!("expected a clip"),
    };
    assert_eq!(clip.file_name, "voice-puck-000.wav");
    assert!(clip.path.exists());
    assert!(clip.duration_seconds > 0.0);
    assert!((clip.duration_seconds - 0.5).abs() < 1e-9);
    assert!(clip.alignment_score.is_none());

    let catalog = speech_core::catalog::load(dir.path()).unwrap();
    assert_eq!(catalog.samples.len(), 1);
    let sample = &catalog.samples[0];
    assert_eq!(sample.audio_file, "voice-puck-000.wav");
    assert_eq!(sample.speaker_id, "puck");
    assert_eq!(sample.sample_rate, 24_000);
    assert_eq!(sample.channels, 1);
    assert!(sample.file_size > 0);

    // Backend disabled: no alignment fields in the document at all.
    let raw = std::fs::read_to_string(dir.path().join("labels.json")).unwrap();
    assert!(!raw.contains("alignment_score"));
    assert!(!raw.contains("alignment_passed"));
}

#[tokio::test]
async fn sequential_generations_number_clips_without_gaps() {
    let dir = tempdir().unwrap();
    let url = spawn_fake_api(Script::Audio(vec![pcm(&vec![7i16; 2_400])])).await;
    let mut generator = SpeechGenerator::new(test_config(&url, dir.path()));

    for expected in 0..3 {
        let generation = generator
            .generate(&fifteen_words(), Voice::Kore, None)
            .await
            .unwrap();
        match generation {
            Generation::Clip(clip) => {
                assert_eq!(clip.file_name, format!("voice-kore-{expected:03}.wav"))
            }
            Generation::NoAudio => panic!("expected a clip"),
        }
    }

    let catalog = speech_core::catalog::load(dir.path()).unwrap();
    assert_eq!(catalog.samples.len(), 3);
    for (i, sample) in catalog.samples.iter().enumerate() {
        assert_eq!(sample.audio_file, format!("voice-kore-{i:03}.wav"));
        assert!(dir.path().join(&sample.audio_file).exists());
    }
}

#[tokio::test]
async fn clean_close_without_audio_is_an_empty_result() {
    let dir = tempdir().unwrap();
    let url = spawn_fake_api(Script::Empty).await;
    let mut generator = SpeechGenerator::new(test_config(&url, dir.path()));

    let generation = generator
        .generate(&fifteen_words(), Voice::Puck, None)
        .await
        .unwrap();
    assert!(matches!(generation, Generation::NoAudio));

    // Nothing was written or cataloged.
    assert!(generator.list_generated_files().is_empty());
    assert!(!dir.path().join("labels.json").exists());
}

#[tokio::test]
async fn garbled_server_message_is_skipped_not_fatal() {
    let dir = tempdir().unwrap();
    let url = spawn_fake_api(Script::GarbledThenAudio(pcm(&vec![5i16; 2_400]))).await;
    let mut generator = SpeechGenerator::new(test_config(&url, dir.path()));

    let generation = generator
        .generate(&fifteen_words(), Voice::Fenrir, None)
        .await
        .unwrap();
    match generation {
        Generation::Clip(clip) => assert!((clip.duration_seconds - 0.1).abs() < 1e-9),
        Generation::NoAudio => panic!("expected a clip despite the garbled frame"),
    }
}

#[tokio::test]
async fn below_threshold_clip_is_discarded_and_not_cataloged() {
    let dir = tempdir().unwrap();
    let url = spawn_fake_api(Script::Audio(vec![pcm(&vec![4i16; 2_400])])).await;
    let mut generator = SpeechGenerator::with_aligner(
        test_config(&url, dir.path()),
        PhonemeAligner::with_scorer(|_, _| 0.4),
    );

    let err = generator
        .generate(&fifteen_words(), Voice::Puck, None)
        .await
        .unwrap_err();
    match err {
        SpeechError::QualityRejected { score } => assert!((score - 0.4).abs() < 1e-9),
        other => panic!("expected quality rejection, got {other:?}"),
    }

    // The rejected WAV was removed and nothing reached the catalog.
    assert!(generator.list_generated_files().is_empty());
    assert!(!dir.path().join("labels.json").exists());
}

#[tokio::test]
async fn passing_score_is_recorded_in_the_catalog() {
    let dir = tempdir().unwrap();
    let url = spawn_fake_api(Script::Audio(vec![pcm(&vec![4i16; 2_400])])).await;
    let mut generator = SpeechGenerator::with_aligner(
        test_config(&url, dir.path()),
        PhonemeAligner::with_scorer(|_, _| 0.9),
    );

    let generation = generator
        .generate(&fifteen_words(), Voice::Kore, None)
        .await
        .unwrap();
    match generation {
        Generation::Clip(clip) => assert_eq!(clip.alignment_score, Some(0.9)),
        Generation::NoAudio => panic!("expected a clip"),
    }

    let catalog = speech_core::catalog::load(dir.path()).unwrap();
    assert_eq!(catalog.samples[0].alignment_score, Some(0.9));
    assert_eq!(catalog.samples[0].alignment_passed, Some(true));
}

#[tokio::test]
async fn short_text_is_rejected_before_any_network_call() {
    let dir = tempdir().unwrap();
    // Deliberately unroutable endpoint: if the pipeline tried to connect,
    // the error would be Transport, not InvalidInput.
    let mut config = test_config("ws://127.0.0.1:1", dir.path());
    config.limits = QuotaLimits {
        requests_per_minute: 1,
        tokens_per_minute: 10,
        requests_per_day: 1,
    };
    let mut generator = SpeechGenerator::new(config);

    let err = generator
        .generate("only five words right here", Voice::Puck, None)
        .await
        .unwrap_err();
    assert!(matches!(err, SpeechError::InvalidInput(_)));

    // Rejected input consumed no quota either.
    assert_eq!(generator.quota().minute_requests(), 0);
    assert!(!dir.path().join("labels.json").exists());
}

#[tokio::test]
async fn daily_limit_rejects_terminally() {
    let dir = tempdir().unwrap();
    let url = spawn_fake_api(Script::Audio(vec![pcm(&vec![3i16; 2_400])])).await;
    let mut config = test_config(&url, dir.path());
    config.limits = QuotaLimits {
        requests_per_minute: 100,
        tokens_per_minute: 1_000_000,
        requests_per_day: 2,
    };
    let mut generator = SpeechGenerator::new(config);

    for _ in 0..2 {
        generator
            .generate(&fifteen_words(), Voice::Puck, None)
            .await
            .unwrap();
    }
    let err = generator
        .generate(&fifteen_words(), Voice::Puck, None)
        .await
        .unwrap_err();
    assert!(matches!(err, SpeechError::DailyLimitExceeded(2)));
}

#[tokio::test]
async fn batch_processes_items_sequentially_and_collects_failures() {
    let dir = tempdir().unwrap();
    let url = spawn_fake_api(Script::Audio(vec![pcm(&vec![9i16; 2_400])])).await;
    let mut generator = SpeechGenerator::new(test_config(&url, dir.path()));

    let texts = vec![
        fifteen_words(),
        "too short".to_string(),
        fifteen_words(),
    ];
    let results = generator
        .generate_batch(&texts, Voice::Aoede, None)
        .await
        .unwrap();

    assert_eq!(results.len(), 3);
    assert!(matches!(results[0], Ok(Generation::Clip(_))));
    assert!(matches!(results[1], Err(SpeechError::InvalidInput(_))));
    assert!(matches!(results[2], Ok(Generation::Clip(_))));

    // The invalid item did not consume a sequence number.
    assert_eq!(
        generator.list_generated_files(),
        vec!["voice-aoede-000.wav", "voice-aoede-001.wav"]
    );
}

#[tokio::test]
async fn oversized_batch_is_rejected_up_front() {
    let dir = tempdir().unwrap();
    let mut generator =
        SpeechGenerator::new(test_config("ws://127.0.0.1:1", dir.path()));

    let texts = vec![fifteen_words(); 101];
    let err = generator
        .generate_batch(&texts, Voice::Puck, None)
        .await
        .unwrap_err();
    assert!(matches!(err, SpeechError::InvalidInput(_)));
}

#[tokio::test]
async fn transport_failure_is_tagged_as_transport() {
    let dir = tempdir().unwrap();
    let mut generator =
        SpeechGenerator::new(test_config("ws://127.0.0.1:1", dir.path()));

    let err = generator
        .generate(&fifteen_words(), Voice::Puck, None)
        .await
        .unwrap_err();
    assert!(matches!(err, SpeechError::Transport(_)));
}
