//! Composed requests parsed back by an independent MIME parser.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use mail_parser::MessageParser;
use mailbridge_core::{
    AttachmentSource, ComposeRequest, Composer, Config, LocalAttachmentStore,
    SqliteAttachmentIndex, StorageConfig, UserId,
};
use proptest::prelude::*;
use tempfile::TempDir;

async fn composer(dir: &TempDir) -> Composer {
    let config = Config::default();
    Composer::new(
        config.compose,
        Arc::new(LocalAttachmentStore::new(StorageConfig {
            root: dir.path().to_path_buf(),
            ..StorageConfig::default()
        })),
        Arc::new(SqliteAttachmentIndex::in_memory().await.unwrap()),
    )
}

#[tokio::test]
async fn text_only_request() {
    let dir = TempDir::new().unwrap();
    let request = ComposeRequest {
        from: "a@x.com".into(),
        to: vec!["b@y.com".into()],
        subject: "Hi".into(),
        text_body: Some("hello".into()),
        ..Default::default()
    };
    let email = composer(&dir)
        .await
        .compose(&UserId::new("u"), &request)
        .await
        .unwrap();

    let parsed = MessageParser::default().parse(email.mime_bytes()).unwrap();
    assert_eq!(parsed.subject(), Some("Hi"));
    assert_eq!(parsed.body_text(0).as_deref(), Some("hello"));
    assert_eq!(
        parsed.to().and_then(|a| a.first()).and_then(|a| a.address()),
        Some("b@y.com")
    );
}

#[tokio::test]
async fn attachments_survive_encoding() {
    let dir = TempDir::new().unwrap();
    let binary: Vec<u8> = (0..=255).collect();
    let request = ComposeRequest {
        from: "Sender <a@x.com>".into(),
        to: vec!["b@y.com".into()],
        subject: "Files".into(),
        text_body: Some("see attached".into()),
        html_body: Some("<p>see attached</p>".into()),
        attachments: vec![AttachmentSource::Data {
            filename: "data.zip".into(),
            content_type: None,
            data: binary.clone(),
            content_id: None,
        }],
        ..Default::default()
    };
    let email = composer(&dir)
        .await
        .compose(&UserId::new("u"), &request)
        .await
        .unwrap();

    let parsed = MessageParser::default().parse(email.mime_bytes()).unwrap();
    assert_eq!(parsed.attachment_count(), 1);
    assert_eq!(parsed.attachment(0).unwrap().contents(), binary.as_slice());
    assert_eq!(parsed.body_html(0).as_deref(), Some("<p>see attached</p>"));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn any_valid_request_round_trips(
        subject in "[A-Za-z0-9äöüé€]{1,12}( [A-Za-z0-9äöüé€]{1,12}){0,5}",
        body in "[A-Za-z0-9.,!?]{1,20}( [A-Za-z0-9.,!?]{1,20}){0,10}",
        recipients in 1usize..6,
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let dir = TempDir::new().unwrap();
        let request = ComposeRequest {
            from: "a@x.com".into(),
            to: (0..recipients).map(|i| format!("r{i}@example.com")).collect(),
            subject: subject.clone(),
            text_body: Some(body.clone()),
            ..Default::default()
        };

        let email = runtime
            .block_on(async { composer(&dir).await.compose(&UserId::new("u"), &request).await })
            .unwrap();
        let parsed = MessageParser::default().parse(email.mime_bytes()).unwrap();

        prop_assert_eq!(parsed.subject(), Some(subject.as_str()));
        let body_text = parsed.body_text(0);
        prop_assert_eq!(body_text.as_deref(), Some(body.as_str()));
        prop_assert_eq!(
            parsed.to().and_then(|a| a.as_list()).map(<[_]>::len),
            Some(recipients)
        );
    }
}
