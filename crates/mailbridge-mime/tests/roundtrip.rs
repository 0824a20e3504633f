//! Composed messages parsed back by an independent MIME parser.

#![allow(clippy::unwrap_used)]

use mail_parser::{MessageParser, MimeHeaders};
use mailbridge_mime::{Address, Attachment, ContentType, MessageBuilder, Priority};

fn addr(s: &str) -> Address {
    Address::parse(s).unwrap()
}

#[test]
fn plain_and_html_with_attachment() {
    let pdf = b"%PDF-1.4\n%\xE2\xE3\xCF\xD3\n".to_vec();
    let message = MessageBuilder::new()
        .from(addr("Sender <sender@example.com>"))
        .to(addr("alice@example.org"))
        .cc(addr("bob@example.org"))
        .subject("Quarterly report")
        .text_body("Hello Alice,\nsee attached.")
        .html_body("<p>Hello Alice,</p><p>see attached.</p>")
        .attach(Attachment::new(
            "report.pdf",
            ContentType::new("application", "pdf"),
            pdf.clone(),
        ))
        .build()
        .unwrap();

    let bytes = message.to_bytes().unwrap();
    let parsed = MessageParser::default().parse(&bytes).unwrap();

    assert_eq!(parsed.subject(), Some("Quarterly report"));
    assert_eq!(
        parsed
            .from()
            .and_then(|a| a.first())
            .and_then(|a| a.address()),
        Some("sender@example.com")
    );
    assert_eq!(
        parsed.to().and_then(|a| a.first()).and_then(|a| a.address()),
        Some("alice@example.org")
    );
    assert_eq!(
        parsed.body_text(0).as_deref(),
        Some("Hello Alice,\r\nsee attached.")
    );
    assert_eq!(
        parsed.body_html(0).as_deref(),
        Some("<p>Hello Alice,</p><p>see attached.</p>")
    );

    assert_eq!(parsed.attachment_count(), 1);
    let attachment = parsed.attachment(0).unwrap();
    assert_eq!(attachment.attachment_name(), Some("report.pdf"));
    assert_eq!(attachment.contents(), pdf.as_slice());
}

#[test]
fn unicode_subject_names_and_filenames() {
    let message = MessageBuilder::new()
        .from(addr("张三 <zhang@163.com>"))
        .to(addr("李四 <li@qq.com>"))
        .subject("季度报告 – Q3")
        .text_body("你好")
        .attach(Attachment::new(
            "报告.txt",
            ContentType::text_plain(),
            "第一行\r\n第二行".as_bytes().to_vec(),
        ))
        .priority(Priority::High)
        .build()
        .unwrap();

    let bytes = message.to_bytes().unwrap();
    let parsed = MessageParser::default().parse(&bytes).unwrap();

    assert_eq!(parsed.subject(), Some("季度报告 – Q3"));
    assert_eq!(
        parsed.from().and_then(|a| a.first()).and_then(|a| a.name()),
        Some("张三")
    );
    assert_eq!(parsed.body_text(0).as_deref(), Some("你好"));

    let attachment = parsed.attachment(0).unwrap();
    assert_eq!(attachment.attachment_name(), Some("报告.txt"));
    assert_eq!(attachment.contents(), "第一行\r\n第二行".as_bytes());
}

#[test]
fn inline_image_is_related_to_html() {
    let png = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
    let message = MessageBuilder::new()
        .from(addr("sender@example.com"))
        .to(addr("rcpt@example.com"))
        .subject("Logo")
        .html_body("<img src=\"cid:logo@mailbridge\">")
        .attach(
            Attachment::new("logo.png", ContentType::new("image", "png"), png.clone())
                .inline("logo@mailbridge"),
        )
        .build()
        .unwrap();

    let bytes = message.to_bytes().unwrap();
    let text = String::from_utf8_lossy(&bytes);
    assert!(text.contains("multipart/related"));
    assert!(text.contains("Content-ID: <logo@mailbridge>"));

    let parsed = MessageParser::default().parse(&bytes).unwrap();
    let image = parsed
        .parts
        .iter()
        .find(|p| p.content_id() == Some("logo@mailbridge"))
        .unwrap();
    assert_eq!(image.contents(), png.as_slice());
}

#[test]
fn own_parser_agrees_with_builder() {
    let message = MessageBuilder::new()
        .from(addr("sender@example.com"))
        .to(addr("rcpt@example.com"))
        .subject("Ünïcödé")
        .text_body("body")
        .attach(Attachment::new(
            "data.bin",
            ContentType::octet_stream(),
            (0..=255).collect(),
        ))
        .build()
        .unwrap();

    let reparsed = mailbridge_mime::Message::parse(&message.to_bytes().unwrap()).unwrap();
    assert_eq!(reparsed.subject().as_deref(), Some("Ünïcödé"));
    assert_eq!(reparsed.text_body().as_deref(), Some("body"));
    let attachment = reparsed.attachments()[0];
    assert_eq!(attachment.filename().as_deref(), Some("data.bin"));
    assert_eq!(
        attachment.decode_body().unwrap(),
        (0..=255).collect::<Vec<u8>>()
    );
}
