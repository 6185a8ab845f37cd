use std::io::{Read, Write};
use std::net::TcpListener;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use reqpipe::prelude::{
    CallContext, Client, ClientConfig, Error, ErrorCode, ErrorKind, RetryPolicy,
};

struct OneShotServer {
    base_url: String,
    join: Option<JoinHandle<()>>,
}

impl OneShotServer {
    fn start(status: u16, body: Vec<u8>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind one-shot server");
        listener
            .set_nonblocking(true)
            .expect("set one-shot listener nonblocking");
        let address = listener
            .local_addr()
            .expect("read one-shot listener address");

        let join = thread::spawn(move || {
            let deadline = std::time::Instant::now() + Duration::from_secs(5);
            while std::time::Instant::now() < deadline {
                match listener.accept() {
                    Ok((mut stream, _)) => {
                        let _ = read_request_headers(&mut stream);

                        let response_head = format!(
                            "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                            status,
                            status_text(status),
                            body.len()
                        );
                        let _ = stream.write_all(response_head.as_bytes());
                        let _ = stream.write_all(&body);
                        let _ = stream.flush();
                        break;
                    }
                    Err(error) if error.kind() == std::io::ErrorKind::WouldBlock => {
                        thread::sleep(Duration::from_millis(5));
                    }
                    Err(_) => break,
                }
            }
        });

        Self {
            base_url: format!("http://{address}"),
            join: Some(join),
        }
    }
}

impl Drop for OneShotServer {
    fn drop(&mut self) {
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

fn status_text(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        408 => "Request Timeout",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

fn find_header_end(raw: &[u8]) -> Option<usize> {
    raw.windows(4).position(|window| window == b"\r\n\r\n")
}

fn read_request_headers(stream: &mut std::net::TcpStream) -> std::io::Result<()> {
    stream.set_read_timeout(Some(Duration::from_secs(1)))?;
    let mut raw = Vec::new();
    loop {
        let mut chunk = [0_u8; 1024];
        let read = stream.read(&mut chunk)?;
        if read == 0 {
            break;
        }
        raw.extend_from_slice(&chunk[..read]);
        if find_header_end(&raw).is_some() {
            break;
        }
    }
    Ok(())
}

fn assert_error_contract(error: &Error, expected: ErrorCode, expected_code: &str) {
    assert_eq!(error.code(), expected);
    assert_eq!(error.code().as_str(), expected_code);
}

async fn get_error(status: u16, body: &[u8], max_response_body_bytes: usize) -> Error {
    let server = OneShotServer::start(status, body.to_vec());
    let client = Client::builder(
        ClientConfig::new(server.base_url.clone())
            .with_request_timeout(Duration::from_secs(1))
            .with_max_response_body_bytes(max_response_body_bytes)
            .with_retry_policy(RetryPolicy::disabled()),
    )
    .build();
    let error = client
        .get::<serde_json::Value>(&CallContext::new(), "/case")
        .await
        .expect_err("request should return an error for this scenario");
    drop(server);
    error
}

#[tokio::test(flavor = "current_thread")]
async fn error_code_contract_status_and_body_limit() {
    let server_error = get_error(503, b"unavailable", 1024).await;
    assert_error_contract(&server_error, ErrorCode::ServerStatus, "server_status");
    assert_eq!(server_error.kind(), ErrorKind::ServerError);
    assert!(server_error.is_retryable());

    let client_error = get_error(400, br#"{"error":"bad amount"}"#, 1024).await;
    assert_error_contract(&client_error, ErrorCode::ClientStatus, "client_status");
    assert!(!client_error.is_retryable());

    let too_large_error = get_error(200, &[b'x'; 32], 4).await;
    assert_error_contract(
        &too_large_error,
        ErrorCode::ResponseBodyTooLarge,
        "response_body_too_large",
    );
    assert_eq!(too_large_error.kind(), ErrorKind::Internal);

    let decode_error = get_error(200, b"not json", 1024).await;
    assert_error_contract(&decode_error, ErrorCode::Deserialize, "deserialize");
    assert_eq!(decode_error.kind(), ErrorKind::Internal);
}

#[tokio::test(flavor = "current_thread")]
async fn transient_client_statuses_stay_client_errors() {
    for status in [408, 429] {
        let error = get_error(status, b"", 1024).await;
        assert_eq!(error.kind(), ErrorKind::ClientError);
        assert_eq!(error.status(), Some(status));
        assert!(error.is_retryable());
    }
}

#[tokio::test(flavor = "current_thread")]
async fn error_messages_follow_body_shape() {
    let message = get_error(
        404,
        br#"{"error":"not_found","message":"account 7 does not exist","code":"account_missing"}"#,
        1024,
    )
    .await;
    assert_eq!(message.api_message(), Some("account 7 does not exist"));
    assert_eq!(message.api_code(), Some("account_missing"));

    let error_field = get_error(400, br#"{"error":"currency mismatch"}"#, 1024).await;
    assert_eq!(error_field.api_message(), Some("currency mismatch"));
    assert_eq!(error_field.api_code(), None);

    let raw = get_error(500, b"upstream exploded", 1024).await;
    assert_eq!(raw.api_message(), Some("upstream exploded"));

    let empty = get_error(404, b"", 1024).await;
    assert_eq!(empty.api_message(), Some("API error with status code 404"));
}
