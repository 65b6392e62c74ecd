//! Whole runs through `run_script` with the simulated instrument.

use scpi_player::config::{ErrorPolicy, PlayerConfig};
use scpi_player::error::{PlayerError, TransportError};
use scpi_player::player::run_script;
use scpi_player::transport::mock::MockOp;
use scpi_player::transport::{MockBackend, MockCall, MockReply};
use std::io::Write;

fn script(lines: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(lines.as_bytes()).unwrap();
    file
}

#[tokio::test]
async fn test_run_releases_session_after_success() -> anyhow::Result<()> {
    let mock = MockBackend::new().with_reply("*IDN?", MockReply::text("Acme,Model1,SN123\n"));
    let script = script("*RST\n*IDN?\n");
    let mut transcript = Vec::new();

    let summary = run_script(
        &PlayerConfig::default(),
        script.path(),
        Box::new(mock.clone()),
        &mut transcript,
    )
    .await?;

    assert_eq!(summary.lines, 2);
    assert_eq!(summary.responses, 1);
    assert_eq!(
        String::from_utf8(transcript)?,
        "0000001: *RST\n0000002: *IDN?  --> Acme,Model1,SN123\n"
    );
    assert_eq!(mock.open_handles(), (0, 0));

    let log = mock.call_log();
    assert_eq!(log[0], MockCall::OpenRm);
    assert_eq!(
        log[1],
        MockCall::Open("TCPIP::169.254.56.79::5025::SOCKET".to_string())
    );
    assert_eq!(&log[log.len() - 2..], &[MockCall::CloseSession, MockCall::CloseRm]);
    Ok(())
}

#[tokio::test]
async fn test_continue_policy_reports_errors_at_the_end() {
    let mock = MockBackend::simulated_instrument();
    mock.fail_next(MockOp::Write, TransportError::ConnectionLost);
    let script = script("VOLT 1\nVOLT?\n");
    let mut transcript = Vec::new();

    let err = run_script(
        &PlayerConfig::default(),
        script.path(),
        Box::new(mock.clone()),
        &mut transcript,
    )
    .await
    .unwrap_err();

    assert!(matches!(err, PlayerError::PlaybackErrors(1)));
    assert_eq!(err.exit_code(), 7);
    // The second directive still ran.
    assert!(String::from_utf8(transcript)
        .unwrap()
        .contains("0000002: VOLT?  --> 0"));
    assert_eq!(mock.open_handles(), (0, 0));
}

#[tokio::test]
async fn test_abort_policy_releases_session() {
    let mock = MockBackend::simulated_instrument();
    mock.fail_next(MockOp::Read, TransportError::ConnectionLost);
    let script = script("*IDN?\n*RST\n");
    let mut config = PlayerConfig::default();
    config.playback.on_transport_error = ErrorPolicy::Abort;

    let err = run_script(&config, script.path(), Box::new(mock.clone()), Vec::new())
        .await
        .unwrap_err();

    assert!(matches!(err, PlayerError::Read { line: 1, .. }));
    assert_eq!(mock.writes(), vec![b"*IDN?\n".to_vec()]);
    assert_eq!(mock.open_handles(), (0, 0));
}

#[tokio::test]
async fn test_configure_failure_is_fatal() {
    let mock = MockBackend::simulated_instrument();
    mock.fail_next(MockOp::SetAttribute, TransportError::Simulated("rejected".into()));
    let script = script("*IDN?\n");

    let err = run_script(
        &PlayerConfig::default(),
        script.path(),
        Box::new(mock.clone()),
        Vec::new(),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, PlayerError::Configure { .. }));
    assert_eq!(err.exit_code(), 6);
    assert!(mock.writes().is_empty());
    assert_eq!(mock.open_handles(), (0, 0));
}

#[tokio::test]
async fn test_resource_manager_failure() {
    let mock = MockBackend::new();
    mock.fail_next(MockOp::OpenRm, TransportError::Simulated("no VISA library".into()));
    let script = script("*IDN?\n");

    let err = run_script(
        &PlayerConfig::default(),
        script.path(),
        Box::new(mock.clone()),
        Vec::new(),
    )
    .await
    .unwrap_err();

    assert_eq!(err.exit_code(), 5);
    assert_eq!(mock.call_log(), vec![MockCall::OpenRm]);
}

#[tokio::test]
async fn test_whitespace_and_cr_only_lines_are_numbered() -> anyhow::Result<()> {
    let mock = MockBackend::simulated_instrument();
    let script = script("*RST\r\n   \r\n\r\n\t\n*CLS\r\n");
    let mut transcript = Vec::new();

    let summary = run_script(
        &PlayerConfig::default(),
        script.path(),
        Box::new(mock.clone()),
        &mut transcript,
    )
    .await?;

    assert_eq!(summary.lines, 5);
    assert_eq!(summary.writes, 2);
    assert_eq!(mock.writes(), vec![b"*RST\n".to_vec(), b"*CLS\n".to_vec()]);
    let numbers: Vec<String> = String::from_utf8(transcript)?
        .lines()
        .map(|line| line[..7].to_string())
        .collect();
    assert_eq!(
        numbers,
        vec!["0000001", "0000002", "0000003", "0000004", "0000005"]
    );
    Ok(())
}

#[tokio::test]
async fn test_non_utf8_script_plays_every_line() -> anyhow::Result<()> {
    let mock = MockBackend::new().with_reply("*IDN?", MockReply::text("Acme,Model1,SN123\n"));
    let mut file = tempfile::NamedTempFile::new()?;
    file.write_all(b"*RST\nTEMP 25\xB0C\n*IDN?\n")?;
    let mut transcript = Vec::new();

    let summary = run_script(
        &PlayerConfig::default(),
        file.path(),
        Box::new(mock.clone()),
        &mut transcript,
    )
    .await?;

    assert_eq!(summary.writes, 3);
    assert_eq!(mock.writes()[1], b"TEMP 25?C\n".to_vec());
    assert!(String::from_utf8(transcript)?.ends_with("0000003: *IDN?  --> Acme,Model1,SN123\n"));
    Ok(())
}

#[tokio::test]
async fn test_directory_touches_no_transport() {
    let dir = tempfile::tempdir().unwrap();
    let mock = MockBackend::simulated_instrument();

    let err = run_script(
        &PlayerConfig::default(),
        dir.path(),
        Box::new(mock.clone()),
        Vec::new(),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, PlayerError::FileNotFound(_)));
    assert_eq!(err.exit_code(), 3);
    assert!(mock.call_log().is_empty());
}
