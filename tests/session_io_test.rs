//! Write/read behaviour of a session against the simulated instrument.

use scpi_player::config::ErrorPolicy;
use scpi_player::transport::{MockBackend, MockCall, MockReply, ResourceId};
use scpi_player::{
    MessageReader, MessageWriter, ReadOutcome, ScriptPlayer, Session, SessionSettings,
};

async fn open_session(mock: &MockBackend, capacity: usize) -> Session {
    let mut session = Session::open(
        Box::new(mock.clone()),
        ResourceId::new("TCPIP::169.254.56.79::5025::SOCKET"),
    )
    .await
    .unwrap();
    session
        .configure(SessionSettings {
            buffer_capacity: capacity,
            ..SessionSettings::default()
        })
        .unwrap();
    mock.clear_call_log();
    session
}

#[tokio::test]
async fn test_command_is_one_write_and_no_read() {
    let mock = MockBackend::simulated_instrument();
    let mut session = open_session(&mock, 64).await;
    let mut player = ScriptPlayer::new(&mut session, ErrorPolicy::Abort, Vec::new());

    player.play(&b"OUTP ON\n"[..]).await.unwrap();

    assert_eq!(mock.call_log(), vec![MockCall::Write(b"OUTP ON\n".to_vec())]);
}

#[tokio::test]
async fn test_query_is_one_write_then_one_logical_read() {
    let mock = MockBackend::new().with_reply("MEAS:VOLT?", MockReply::text("1.25E+00\n"));
    let mut session = open_session(&mock, 64).await;
    let mut player = ScriptPlayer::new(&mut session, ErrorPolicy::Abort, Vec::new());

    let summary = player.play(&b"MEAS:VOLT?\n"[..]).await.unwrap();

    assert_eq!(summary.queries, 1);
    assert_eq!(summary.responses, 1);
    assert_eq!(
        mock.call_log(),
        vec![
            MockCall::Write(b"MEAS:VOLT?\n".to_vec()),
            MockCall::Read {
                capacity: 64,
                returned: Some(9)
            },
        ]
    );
}

#[tokio::test]
async fn test_fragments_reconstruct_exact_concatenation() {
    // 8 + 8 + 4 bytes
    let payload = "#215ABCDEFGHIJKLMNO\n";
    assert_eq!(payload.len(), 20);
    let mock = MockBackend::new().with_reply("CURV?", MockReply::text(payload));
    let mut session = open_session(&mock, 8).await;
    let writer = MessageWriter::new();
    let mut reader = MessageReader::for_session(&session);

    writer.write(&mut session, "CURV?").await.unwrap();
    let ReadOutcome::Complete(response) = reader.read(&mut session).await.unwrap() else {
        panic!("expected a response");
    };

    assert_eq!(response.as_bytes(), payload.as_bytes());
    assert_eq!(response.chunks(), 3);
    let reads: Vec<Option<usize>> = mock
        .call_log()
        .into_iter()
        .filter_map(|call| match call {
            MockCall::Read { returned, .. } => Some(returned),
            _ => None,
        })
        .collect();
    assert_eq!(reads, vec![Some(8), Some(8), Some(4)]);
}

#[tokio::test]
async fn test_exact_multiple_of_capacity_takes_extra_read() {
    // k = 2 buffers of 6 bytes
    let payload = "12345,6789A\n";
    let mock = MockBackend::new().with_reply("DATA?", MockReply::text(payload));
    let mut session = open_session(&mock, 6).await;
    let mut reader = MessageReader::for_session(&session);

    MessageWriter::new()
        .write(&mut session, "DATA?")
        .await
        .unwrap();
    let ReadOutcome::Complete(response) = reader.read(&mut session).await.unwrap() else {
        panic!("expected a response");
    };

    assert_eq!(response.text(), payload);
    assert_eq!(mock.read_count(), 3);
    assert_eq!(
        mock.call_log().last(),
        Some(&MockCall::Read {
            capacity: 6,
            returned: Some(0)
        })
    );
}

#[tokio::test]
async fn test_timeout_does_not_stop_the_run() {
    let mock = MockBackend::new()
        .with_reply("SYST:ERR?", MockReply::Silent)
        .with_reply("*IDN?", MockReply::text("Acme,Model1,SN123\n"));
    let mut session = open_session(&mock, 64).await;
    let mut player = ScriptPlayer::new(&mut session, ErrorPolicy::Abort, Vec::new());

    let summary = player.play(&b"SYST:ERR?\n*IDN?\n"[..]).await.unwrap();
    let transcript = String::from_utf8(player.into_transcript()).unwrap();

    assert_eq!(summary.timeouts, 1);
    assert_eq!(summary.responses, 1);
    assert_eq!(
        transcript,
        "0000001: SYST:ERR?  --> Timeout\n0000002: *IDN?  --> Acme,Model1,SN123\n"
    );
}

#[tokio::test]
async fn test_sequence_numbers_include_blank_lines() {
    let mock = MockBackend::simulated_instrument();
    let mut session = open_session(&mock, 64).await;
    let mut player = ScriptPlayer::new(&mut session, ErrorPolicy::Abort, Vec::new());

    let summary = player
        .play(&b"*RST\n*CLS\n\nVOLT 1\nVOLT?\n"[..])
        .await
        .unwrap();
    let transcript = String::from_utf8(player.into_transcript()).unwrap();

    let numbers: Vec<&str> = transcript.lines().map(|l| &l[..7]).collect();
    assert_eq!(
        numbers,
        vec!["0000001", "0000002", "0000003", "0000004", "0000005"]
    );
    assert_eq!(summary.lines, 5);
    assert_eq!(summary.writes, 4);
}

#[tokio::test]
async fn test_reset_then_identify() {
    let mock = MockBackend::new().with_reply("*IDN?", MockReply::text("Acme,Model1,SN123\n"));
    let mut session = open_session(&mock, 0x10000).await;
    let mut player = ScriptPlayer::new(&mut session, ErrorPolicy::Abort, Vec::new());

    player.play(&b"*RST\n*IDN?\n"[..]).await.unwrap();
    let transcript = String::from_utf8(player.into_transcript()).unwrap();

    assert_eq!(
        mock.call_log(),
        vec![
            MockCall::Write(b"*RST\n".to_vec()),
            MockCall::Write(b"*IDN?\n".to_vec()),
            MockCall::Read {
                capacity: 0x10000,
                returned: Some(18)
            },
        ]
    );
    assert!(transcript.ends_with("0000002: *IDN?  --> Acme,Model1,SN123\n"));
}

#[tokio::test]
async fn test_unconfigured_session_times_out() {
    let mock = MockBackend::new().with_reply("*IDN?", MockReply::text("Acme\n"));
    let mut session = Session::open(Box::new(mock.clone()), ResourceId::new("ASRL1::INSTR"))
        .await
        .unwrap();
    let mut reader = MessageReader::with_capacity(64);

    MessageWriter::new()
        .write(&mut session, "*IDN?")
        .await
        .unwrap();
    assert_eq!(
        reader.read(&mut session).await.unwrap(),
        ReadOutcome::TimedOut
    );
}
