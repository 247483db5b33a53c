//! End-to-end conversation flows through the registry with scripted providers.

use parley::config::Config;
use parley::pipeline::{OutboundPacket, WireFrame};
use parley::provider::mock::{MockGenerator, MockRecognizer, MockReply, MockSynthesizer};
use parley::provider::{Providers, RecognitionEvent};
use parley::session::{InputSource, SessionSnapshot, SessionState, Speaker, SynthesisStatus};
use parley::{Catalog, ParleyError, SessionHandle, SessionId, SessionRegistry, Submission};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

struct Harness {
    registry: SessionRegistry,
    generator: Arc<MockGenerator>,
    synthesizer: Arc<MockSynthesizer>,
}

impl Harness {
    fn new(generator: MockGenerator, synthesizer: MockSynthesizer, config: Config) -> Self {
        Self::with_recognizer(generator, synthesizer, MockRecognizer::silent(), config)
    }

    fn with_recognizer(
        generator: MockGenerator,
        synthesizer: MockSynthesizer,
        recognizer: MockRecognizer,
        config: Config,
    ) -> Self {
        let generator = Arc::new(generator);
        let synthesizer = Arc::new(synthesizer);
        let providers = Providers::new(
            Arc::new(recognizer),
            generator.clone(),
            synthesizer.clone(),
        );
        Self {
            registry: SessionRegistry::new(config, Catalog::default(), providers),
            generator,
            synthesizer,
        }
    }

    async fn open(&self) -> (SessionId, SessionHandle, mpsc::Receiver<OutboundPacket>) {
        let id = self.registry.create(None).await.unwrap();
        let handle = self.registry.get(&id).await.unwrap();
        let output = self.registry.attach_output(&id).await.unwrap();
        (id, handle, output)
    }
}

/// Config with summarization pushed out of the way.
fn quiet_config() -> Config {
    let mut config = Config::default();
    config.summarizer.threshold = 10_000;
    config
}

async fn next_packet(output: &mut mpsc::Receiver<OutboundPacket>) -> OutboundPacket {
    tokio::time::timeout(Duration::from_secs(3), output.recv())
        .await
        .expect("packet should arrive in time")
        .expect("outbound channel should be open")
}

/// Packets up to and including the next stop marker.
async fn packets_until_stop(output: &mut mpsc::Receiver<OutboundPacket>) -> Vec<OutboundPacket> {
    let mut packets = Vec::new();
    loop {
        let packet = next_packet(output).await;
        let stop = packet.is_stop();
        packets.push(packet);
        if stop {
            return packets;
        }
    }
}

async fn wait_for<F>(handle: &SessionHandle, check: F) -> SessionSnapshot
where
    F: Fn(&SessionSnapshot) -> bool,
{
    for _ in 0..600 {
        let snapshot = handle.snapshot().await.unwrap();
        if check(&snapshot) {
            return snapshot;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("session never reached the expected condition");
}

fn sentence(text: &str) -> OutboundPacket {
    OutboundPacket::Sentence {
        sentence: text.to_string(),
        audio: Some(MockSynthesizer::audio_for(text)),
    }
}

#[tokio::test]
async fn single_sentence_reply_then_stop() {
    let harness = Harness::new(
        MockGenerator::replying("Hi there!"),
        MockSynthesizer::new(),
        quiet_config(),
    );
    let (_id, handle, mut output) = harness.open().await;

    assert_eq!(
        handle.submit_text("Hello").await.unwrap(),
        Submission::Accepted { epoch: 1 }
    );
    let packets = packets_until_stop(&mut output).await;
    assert_eq!(packets, vec![sentence("Hi there!"), OutboundPacket::Stop]);

    let frames: Vec<WireFrame> = packets.into_iter().flat_map(|p| p.into_frames()).collect();
    assert_eq!(
        frames,
        vec![
            WireFrame::Text(r#"{"type":"metadata","sentence":"Hi there!"}"#.to_string()),
            WireFrame::Binary(b"audio:Hi there!".to_vec()),
            WireFrame::Text(r#"{"type":"stop"}"#.to_string()),
        ]
    );

    let snapshot = wait_for(&handle, |s| s.state == SessionState::Listening).await;
    assert_eq!(snapshot.turns.len(), 2);
    let agent = &snapshot.turns[1];
    assert_eq!(agent.speaker, Speaker::Agent);
    assert_eq!(agent.text, "Hi there!");
    assert_eq!(agent.chunks.len(), 1);
    assert_eq!(agent.chunks[0].ordinal, 0);
    assert_eq!(agent.chunks[0].status, SynthesisStatus::Ready);
}

#[tokio::test]
async fn two_sentences_arrive_in_ordinal_order() {
    let generator = MockGenerator::new(MockReply::text(&["Hello! How ", "are you?"]));
    // The first sentence synthesizes slowest, so completion order is reversed.
    let synthesizer = MockSynthesizer::new().delay_on("Hello", Duration::from_millis(80));
    let harness = Harness::new(generator, synthesizer, quiet_config());
    let (_id, handle, mut output) = harness.open().await;

    handle.submit_text("Hello! How are you?").await.unwrap();
    let packets = packets_until_stop(&mut output).await;
    assert_eq!(
        packets,
        vec![
            sentence("Hello!"),
            sentence("How are you?"),
            OutboundPacket::Stop
        ]
    );

    let snapshot = wait_for(&handle, |s| s.state == SessionState::Listening).await;
    let ordinals: Vec<u32> = snapshot.turns[1].chunks.iter().map(|c| c.ordinal).collect();
    assert_eq!(ordinals, vec![0, 1]);
}

#[tokio::test]
async fn barge_in_stops_old_epoch_before_new_output() {
    let generator = MockGenerator::replying("Second reply. ")
        .then(MockReply::text(&["First reply. ", "Still going"]).held_open());
    let harness = Harness::new(generator, MockSynthesizer::new(), quiet_config());
    let (_id, handle, mut output) = harness.open().await;

    handle.submit_text("Tell me a story").await.unwrap();
    assert_eq!(next_packet(&mut output).await, sentence("First reply."));
    wait_for(&handle, |s| s.state == SessionState::Speaking).await;

    assert_eq!(
        handle.submit_text("Actually, stop").await.unwrap(),
        Submission::Accepted { epoch: 2 }
    );
    assert_eq!(next_packet(&mut output).await, OutboundPacket::Stop);
    let packets = packets_until_stop(&mut output).await;
    assert_eq!(packets, vec![sentence("Second reply."), OutboundPacket::Stop]);

    let snapshot = wait_for(&handle, |s| {
        s.state == SessionState::Listening && s.agent_turns().count() == 1
    })
    .await;
    assert_eq!(snapshot.epoch, 2);
    let agent: Vec<_> = snapshot.agent_turns().collect();
    assert_eq!(agent[0].epoch, 2);
    assert_eq!(agent[0].text, "Second reply.");

    // Nothing from the superseded epoch trails in.
    let late = tokio::time::timeout(Duration::from_millis(100), output.recv()).await;
    assert!(late.is_err(), "no packets expected after the turn ended");
}

#[tokio::test]
async fn barge_in_discards_old_sentence_still_synthesizing() {
    let generator = MockGenerator::replying("Second reply. ")
        .then(MockReply::text(&["Quick start. Slow part. "]).held_open());
    let synthesizer = MockSynthesizer::new().delay_on("Slow", Duration::from_millis(300));
    let harness = Harness::new(generator, synthesizer, quiet_config());
    let (_id, handle, mut output) = harness.open().await;

    handle.submit_text("Tell me a story").await.unwrap();
    assert_eq!(next_packet(&mut output).await, sentence("Quick start."));

    // "Slow part." of epoch 1 is still being synthesized here.
    handle.submit_text("Never mind").await.unwrap();
    assert_eq!(next_packet(&mut output).await, OutboundPacket::Stop);
    let packets = packets_until_stop(&mut output).await;
    assert_eq!(packets, vec![sentence("Second reply."), OutboundPacket::Stop]);

    // Well past the old synthesis finishing: nothing of epoch 1 shows up.
    let late = tokio::time::timeout(Duration::from_millis(500), output.recv()).await;
    assert!(late.is_err(), "late epoch 1 packet: {late:?}");
    assert_eq!(harness.synthesizer.calls(), 3);

    let snapshot = wait_for(&handle, |s| s.state == SessionState::Listening).await;
    let agent: Vec<_> = snapshot.agent_turns().collect();
    assert_eq!(agent.len(), 1);
    assert_eq!(agent[0].epoch, 2);
}

#[tokio::test]
async fn unread_output_stalls_generation_until_drained() {
    let increments: Vec<String> = (0..20).map(|i| format!("Sentence {i:02}. ")).collect();
    let increments: Vec<&str> = increments.iter().map(String::as_str).collect();
    let mut config = quiet_config();
    config.session.outbound_capacity = 1;
    config.synthesis.max_in_flight = 2;
    let harness = Harness::new(
        MockGenerator::new(MockReply::text(&increments)),
        MockSynthesizer::new(),
        config,
    );
    let (_id, handle, mut output) = harness.open().await;

    handle.submit_text("Count to twenty").await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    let stalled = harness.generator.yielded();
    // Outbound slot, station, station queue, the pending send, one more
    // permit and one sentence waiting for a permit.
    assert!(stalled <= 8, "generator drained to {stalled} increments");
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(harness.generator.yielded(), stalled);

    let packets = packets_until_stop(&mut output).await;
    let expected: Vec<OutboundPacket> = (0..20)
        .map(|i| sentence(&format!("Sentence {i:02}.")))
        .chain(std::iter::once(OutboundPacket::Stop))
        .collect();
    assert_eq!(packets, expected);
    assert_eq!(harness.generator.yielded(), 20);

    let snapshot = wait_for(&handle, |s| s.state == SessionState::Listening).await;
    assert_eq!(snapshot.turns[1].chunks.len(), 20);
}

#[tokio::test]
async fn long_history_is_budgeted_around_summary_and_newest_turns() {
    const BUDGET: usize = 900;
    let mut config = Config::default();
    config.context.budget_bytes = BUDGET;
    config.summarizer.threshold = 40;
    config.summarizer.retain_turns = 30;
    let harness = Harness::new(
        MockGenerator::replying("Sure. "),
        MockSynthesizer::new(),
        config,
    );
    let (_id, handle, mut output) = harness.open().await;

    for i in 0..24 {
        handle.submit_text(&format!("message {i:02}")).await.unwrap();
        packets_until_stop(&mut output).await;
        wait_for(&handle, |s| {
            s.state == SessionState::Listening && s.turns.len() == 2 * (i + 1)
        })
        .await;
    }
    let before = wait_for(&handle, |s| !s.summary.summary.is_empty() && !s.summarizing).await;
    assert_eq!(before.turns.len(), 48);
    assert!(before.turns.iter().any(|t| t.compacted));

    handle.submit_text("message 24").await.unwrap();
    packets_until_stop(&mut output).await;

    let contexts = harness.generator.contexts().await;
    let last = contexts
        .iter()
        .rev()
        .find(|c| c.contains("User's Message: message 24"))
        .expect("final turn context");
    assert!(last.len() <= BUDGET, "context is {} bytes", last.len());
    assert!(last.contains("Past Key Info: Sure."));
    assert!(last.contains("Assistant(You)'s Identity"));
    assert!(last.ends_with("Assistant_Response:"));

    // Kept history is a contiguous run ending at the newest turn. The ten
    // compacted turns and the oldest raw ones are gone.
    let present: Vec<usize> = (0..24)
        .filter(|i| last.contains(&format!("User: message {i:02}\n")))
        .collect();
    assert_eq!(present.last(), Some(&23));
    let oldest = present[0];
    assert!(oldest > 5, "history should have evicted raw turns, kept from {oldest}");
    assert_eq!(present, (oldest..24).collect::<Vec<_>>());
}

#[tokio::test]
async fn failed_synthesis_is_delivered_as_metadata_only() {
    let generator = MockGenerator::new(MockReply::text(&["Zero. One. Two."]));
    let synthesizer = MockSynthesizer::new().fail_on("One");
    let harness = Harness::new(generator, synthesizer, quiet_config());
    let (_id, handle, mut output) = harness.open().await;

    handle.submit_text("Count").await.unwrap();
    let packets = packets_until_stop(&mut output).await;
    assert_eq!(
        packets,
        vec![
            sentence("Zero."),
            OutboundPacket::Sentence {
                sentence: "One.".to_string(),
                audio: None,
            },
            sentence("Two."),
            OutboundPacket::Stop,
        ]
    );
    assert_eq!(
        packets[1].clone().into_frames(),
        vec![WireFrame::Text(
            r#"{"type":"metadata","sentence":"One."}"#.to_string()
        )]
    );

    let snapshot = wait_for(&handle, |s| s.state == SessionState::Listening).await;
    let statuses: Vec<SynthesisStatus> =
        snapshot.turns[1].chunks.iter().map(|c| c.status).collect();
    assert_eq!(
        statuses,
        vec![
            SynthesisStatus::Ready,
            SynthesisStatus::Failed,
            SynthesisStatus::Ready
        ]
    );
    assert!(!snapshot.turns[1].failed);
    assert_eq!(harness.synthesizer.calls(), 3);
}

#[tokio::test]
async fn generation_failure_speaks_error_text_and_keeps_session() {
    let generator = MockGenerator::replying("Back again. ").then(MockReply::failing());
    let config = quiet_config();
    let error_text = config.generation.error_text.clone();
    let harness = Harness::new(generator, MockSynthesizer::new(), config);
    let (_id, handle, mut output) = harness.open().await;

    handle.submit_text("Hello?").await.unwrap();
    let packets = packets_until_stop(&mut output).await;
    assert_eq!(
        packets,
        vec![
            OutboundPacket::Sentence {
                sentence: error_text.clone(),
                audio: None,
            },
            OutboundPacket::Stop,
        ]
    );

    let snapshot = wait_for(&handle, |s| s.state == SessionState::Listening).await;
    assert!(snapshot.turns[1].failed);
    assert_eq!(snapshot.turns[1].text, error_text);

    handle.submit_text("Still there?").await.unwrap();
    assert_eq!(
        packets_until_stop(&mut output).await,
        vec![sentence("Back again."), OutboundPacket::Stop]
    );
}

#[tokio::test]
async fn empty_input_changes_nothing() {
    let harness = Harness::new(
        MockGenerator::replying("Hi. "),
        MockSynthesizer::new(),
        quiet_config(),
    );
    let (id, handle, mut output) = harness.open().await;

    assert_eq!(
        harness.registry.submit_text(&id, " \t\n").await.unwrap(),
        Submission::Ignored
    );
    let snapshot = handle.snapshot().await.unwrap();
    assert_eq!(snapshot.epoch, 0);
    assert!(snapshot.turns.is_empty());
    assert_eq!(harness.generator.calls().await, 0);

    let nothing = tokio::time::timeout(Duration::from_millis(50), output.recv()).await;
    assert!(nothing.is_err());
}

#[tokio::test]
async fn voice_turn_from_recognized_audio() {
    let recognizer = MockRecognizer::new(vec![
        RecognitionEvent::interim("what"),
        RecognitionEvent::interim("what"),
        RecognitionEvent::interim("what time"),
        RecognitionEvent::final_text(" what time is it "),
    ]);
    let harness = Harness::with_recognizer(
        MockGenerator::replying("It is noon. "),
        MockSynthesizer::new(),
        recognizer,
        quiet_config(),
    );
    let (_id, handle, mut output) = harness.open().await;

    let mut input = handle.open_audio_input().await.unwrap();
    input.send_audio(vec![0u8; 320 * 4]).await.unwrap();

    let mut events = Vec::new();
    while let Some(event) = input.next_event().await {
        events.push(event.to_json().unwrap());
    }
    assert_eq!(
        events,
        vec![
            r#"{"type":"interim","text":"what"}"#,
            r#"{"type":"interim","text":"what time"}"#,
            r#"{"type":"final","text":"what time is it"}"#,
        ]
    );

    assert_eq!(
        packets_until_stop(&mut output).await,
        vec![sentence("It is noon."), OutboundPacket::Stop]
    );
    let snapshot = wait_for(&handle, |s| s.turns.len() == 2).await;
    assert_eq!(snapshot.turns[0].text, "what time is it");
    assert_eq!(snapshot.turns[0].source, InputSource::Voice);
}

#[tokio::test]
async fn closing_twice_reports_not_found() {
    let harness = Harness::new(
        MockGenerator::new(MockReply::text(&["Long answer. "]).held_open()),
        MockSynthesizer::new(),
        quiet_config(),
    );
    let (id, handle, mut output) = harness.open().await;

    handle.submit_text("Go").await.unwrap();
    assert_eq!(next_packet(&mut output).await, sentence("Long answer."));

    harness.registry.destroy(&id).await.unwrap();
    assert!(matches!(
        harness.registry.destroy(&id).await,
        Err(ParleyError::SessionNotFound { .. })
    ));

    // The outbound channel drains and closes once the session is gone.
    let closed = tokio::time::timeout(Duration::from_secs(2), async {
        while output.recv().await.is_some() {}
    })
    .await;
    assert!(closed.is_ok());
    assert!(handle.snapshot().await.is_err());
}
