//! Token refresh against a local stub token endpoint.

#![allow(clippy::unwrap_used)]

use mailbridge_oauth::{Error, OAuthClient, Provider, Token};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

/// Serves one HTTP response and hands back the request body it received.
async fn serve_once(status: &'static str, body: &'static str) -> (String, oneshot::Receiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}/token", listener.local_addr().unwrap());
    let (tx, rx) = oneshot::channel();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = socket.read(&mut buf).await.unwrap();
            request.extend_from_slice(&buf[..n]);
            let text = String::from_utf8_lossy(&request).to_string();
            if let Some((head, rest)) = text.split_once("\r\n\r\n") {
                let length = head
                    .lines()
                    .find_map(|l| {
                        l.to_ascii_lowercase()
                            .strip_prefix("content-length:")
                            .map(|v| v.trim().parse::<usize>().unwrap())
                    })
                    .unwrap_or(0);
                if rest.len() >= length {
                    let _ = tx.send(rest.to_string());
                    break;
                }
            }
            if n == 0 {
                break;
            }
        }
        let response = format!(
            "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        socket.write_all(response.as_bytes()).await.unwrap();
        socket.shutdown().await.unwrap();
    });

    (url, rx)
}

#[tokio::test]
async fn refresh_keeps_old_refresh_token_when_omitted() {
    let (url, request) = serve_once(
        "200 OK",
        r#"{"access_token":"new-access","token_type":"Bearer","expires_in":3600}"#,
    )
    .await;

    let provider = Provider::new("Stub", &url).unwrap();
    let client = OAuthClient::new("client-1", provider)
        .unwrap()
        .with_client_secret("s3cret");
    let stored = Token::bearer("old-access")
        .with_refresh_token("refresh-1")
        .with_scope("mail");

    let fresh = client.refresh_token(&stored).await.unwrap();
    assert_eq!(fresh.access_token, "new-access");
    assert_eq!(fresh.refresh_token.as_deref(), Some("refresh-1"));
    assert_eq!(fresh.scope.as_deref(), Some("mail"));
    assert!(fresh.expires_at.is_some());

    let form = request.await.unwrap();
    assert!(form.contains("grant_type=refresh_token"));
    assert!(form.contains("refresh_token=refresh-1"));
    assert!(form.contains("client_id=client-1"));
    assert!(form.contains("client_secret=s3cret"));
    assert!(form.contains("scope=mail"));
}

#[tokio::test]
async fn refresh_replaces_rotated_refresh_token() {
    let (url, _request) = serve_once(
        "200 OK",
        r#"{"access_token":"a2","token_type":"Bearer","refresh_token":"refresh-2"}"#,
    )
    .await;

    let client = OAuthClient::new("c", Provider::new("Stub", &url).unwrap()).unwrap();
    let fresh = client
        .refresh_token(&Token::bearer("a1").with_refresh_token("refresh-1"))
        .await
        .unwrap();
    assert_eq!(fresh.refresh_token.as_deref(), Some("refresh-2"));
}

#[tokio::test]
async fn rejected_grant_is_oauth_error() {
    let (url, _request) = serve_once(
        "400 Bad Request",
        r#"{"error":"invalid_grant","error_description":"Token has been revoked"}"#,
    )
    .await;

    let client = OAuthClient::new("c", Provider::new("Stub", &url).unwrap()).unwrap();
    let err = client
        .refresh_token(&Token::bearer("a").with_refresh_token("r"))
        .await
        .unwrap_err();

    assert!(matches!(&err, Error::OAuth { error, .. } if error == "invalid_grant"));
    assert!(err.requires_reauthorization());
}
