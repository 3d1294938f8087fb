//! The pipeline against a Graph server that refuses body updates on received mail.

use std::io::Cursor;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use mockito::{Matcher, Server};
use secrecy::SecretString;

use mailscribe::{
    Backend, Coordinator, EngineError, GraphConfig, GraphMailbox, MarkerPolicy, Opts,
    Transcriber,
};

struct Hallo;

impl Backend for Hallo {
    fn transcribe(
        &mut self,
        _samples: &[f32],
        _language: Option<&str>,
    ) -> Result<String, EngineError> {
        Ok("hallo".to_owned())
    }
}

fn wav() -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 16_000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).expect("wav writer");
        for i in 0..4_000 {
            writer.write_sample((i % 64) as i16 * 100).expect("sample");
        }
        writer.finalize().expect("finalize");
    }
    cursor.into_inner()
}

#[test]
fn rejected_body_patch_leaves_read_flag_alone() -> anyhow::Result<()> {
    let mut server = Server::new();
    let _token = server
        .mock("POST", "/tenant/oauth2/v2.0/token")
        .with_header("content-type", "application/json")
        .with_body(r#"{"access_token":"tok","expires_in":3600}"#)
        .create();
    let _list = server
        .mock("GET", "/users/mbx/mailFolders/inbox/messages")
        .match_query(Matcher::Any)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"value":[{
                "id":"m1",
                "receivedDateTime":"2024-02-01T10:00:00Z",
                "isRead":false,
                "body":{"contentType":"text","content":"Neue Sprachnachricht"},
                "attachments":[{"id":"a1","name":"voice.wav"}]
            }]}"#,
        )
        .create();
    let _bytes = server
        .mock("GET", "/users/mbx/messages/m1/attachments/a1/$value")
        .with_body(wav())
        .create();
    let body_patch = server
        .mock("PATCH", "/users/mbx/messages/m1")
        .match_body(Matcher::Regex(r#""body""#.into()))
        .with_status(400)
        .with_body(r#"{"error":{"code":"ErrorInvalidRequest","message":"not a draft"}}"#)
        .expect(1)
        .create();
    let read_patch = server
        .mock("PATCH", "/users/mbx/messages/m1")
        .match_body(Matcher::Regex(r#""isRead""#.into()))
        .expect(0)
        .create();

    let mut config = GraphConfig::new("tenant", "cid", SecretString::from("secret"), "mbx");
    config.graph_base_url = server.url();
    config.login_base_url = server.url();
    config.http_timeout = Duration::from_secs(5);
    let mailbox = GraphMailbox::new(config)?;

    let coordinator = Coordinator::new(
        mailbox,
        Transcriber::new(Hallo, Opts::default())?,
        MarkerPolicy::default(),
    );
    let summary = coordinator.run(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(), None)?;

    assert_eq!(summary.annotated, 0);
    assert_eq!(summary.failed, 1);
    body_patch.assert();
    read_patch.assert();
    Ok(())
}
