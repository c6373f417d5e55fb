use std::sync::{Arc, Mutex};
use std::time::Duration;

use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::header::CONTENT_TYPE;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use payjoin_client::bitcoin::Psbt;
use payjoin_client::{
    EndpointError, ErrorCode, HttpRequester, NegotiationParameters, RequestError, Requester, Url,
    MAX_CONTENT_LENGTH,
};
use payjoin_test_utils::{
    init_tracing, BoxError, PARSED_ORIGINAL_PSBT, PARSED_PAYJOIN_PROPOSAL, PAYJOIN_PROPOSAL,
};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

type ServiceError = Box<dyn std::error::Error + Send + Sync>;
type Capture = Arc<Mutex<Option<oneshot::Sender<Received>>>>;

/// The request as the endpoint saw it.
#[derive(Debug)]
struct Received {
    method: Method,
    path_and_query: String,
    content_type: Option<String>,
    body: String,
}

async fn respond(
    req: Request<Incoming>,
    status: StatusCode,
    body: Bytes,
    capture: Capture,
) -> Result<Response<Full<Bytes>>, ServiceError> {
    let (parts, incoming) = req.into_parts();
    let received = incoming.collect().await?.to_bytes();
    let content_type =
        parts.headers.get(CONTENT_TYPE).and_then(|value| value.to_str().ok()).map(str::to_owned);
    let path_and_query = parts.uri.path_and_query().map(|pq| pq.to_string()).unwrap_or_default();
    if let Some(sender) = capture.lock().expect("lock").take() {
        let _ = sender.send(Received {
            method: parts.method,
            path_and_query,
            content_type,
            body: String::from_utf8_lossy(&received).into_owned(),
        });
    }
    Ok(Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "text/plain")
        .body(Full::new(body))?)
}

/// Serve one connection answering every request with `status` and `body`.
async fn serve_once(
    status: StatusCode,
    body: impl Into<Bytes>,
) -> Result<(Url, oneshot::Receiver<Received>), BoxError> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let url = Url::parse(&format!("http://{}/pj", listener.local_addr()?))?;
    let body = body.into();
    let (sender, receiver) = oneshot::channel();
    let capture: Capture = Arc::new(Mutex::new(Some(sender)));
    tokio::spawn(async move {
        let Ok((stream, _)) = listener.accept().await else { return };
        let _ = http1::Builder::new()
            .serve_connection(
                TokioIo::new(stream),
                service_fn(move |req| respond(req, status, body.clone(), capture.clone())),
            )
            .await;
    });
    Ok((url, receiver))
}

fn requester(url: Url) -> Result<HttpRequester, BoxError> {
    let params = NegotiationParameters { protocol_version: Some(1), ..Default::default() };
    Ok(HttpRequester::new(url, params, Duration::from_secs(5))?)
}

fn endpoint_error(result: Result<Psbt, RequestError>) -> EndpointError {
    match result {
        Err(RequestError::Endpoint(e)) => e,
        other => panic!("expected an endpoint error, got {other:?}"),
    }
}

#[tokio::test]
async fn posts_original_and_decodes_proposal() -> Result<(), BoxError> {
    init_tracing();
    let (url, received) = serve_once(StatusCode::OK, PAYJOIN_PROPOSAL).await?;
    let proposal = requester(url)?.request_payjoin(&PARSED_ORIGINAL_PSBT).await?;
    assert_eq!(proposal, *PARSED_PAYJOIN_PROPOSAL);

    let received = received.await?;
    assert_eq!(received.method, Method::POST);
    assert_eq!(received.path_and_query, "/pj?v=1");
    assert_eq!(received.content_type.as_deref(), Some("text/plain"));
    assert_eq!(received.body, PARSED_ORIGINAL_PSBT.to_string());
    Ok(())
}

#[tokio::test]
async fn well_known_error_code() -> Result<(), BoxError> {
    init_tracing();
    let body = r#"{"errorCode": "unavailable", "message": "visit evil.example"}"#;
    let (url, _) = serve_once(StatusCode::BAD_REQUEST, body).await?;
    let error = endpoint_error(requester(url)?.request_payjoin(&PARSED_ORIGINAL_PSBT).await);
    assert_eq!(error.code(), Some(ErrorCode::Unavailable));
    assert_eq!(error.to_string(), "The payjoin endpoint is not available for now.");
    Ok(())
}

#[tokio::test]
async fn malformed_error_body() -> Result<(), BoxError> {
    init_tracing();
    let (url, _) = serve_once(StatusCode::SERVICE_UNAVAILABLE, "<h1>down</h1>").await?;
    let error = endpoint_error(requester(url)?.request_payjoin(&PARSED_ORIGINAL_PSBT).await);
    assert_eq!(error.code(), None);
    assert_eq!(error.to_string(), "Something went wrong when requesting the payjoin endpoint.");
    Ok(())
}

#[tokio::test]
async fn oversized_error_body_is_an_endpoint_error() -> Result<(), BoxError> {
    init_tracing();
    let padding = "x".repeat(MAX_CONTENT_LENGTH);
    let body = format!(r#"{{"errorCode": "unavailable", "padding": "{padding}"}}"#);
    let (url, _) = serve_once(StatusCode::SERVICE_UNAVAILABLE, body).await?;
    let error = endpoint_error(requester(url)?.request_payjoin(&PARSED_ORIGINAL_PSBT).await);
    assert_eq!(error.code(), None);
    Ok(())
}

#[tokio::test]
async fn oversized_proposal_is_rejected() -> Result<(), BoxError> {
    init_tracing();
    let (url, _) = serve_once(StatusCode::OK, vec![b'A'; MAX_CONTENT_LENGTH + 1]).await?;
    let result = requester(url)?.request_payjoin(&PARSED_ORIGINAL_PSBT).await;
    assert!(matches!(result, Err(RequestError::ContentTooLarge)));
    Ok(())
}

#[tokio::test]
async fn undecodable_proposal() -> Result<(), BoxError> {
    init_tracing();
    let (url, _) = serve_once(StatusCode::OK, "not a psbt").await?;
    let result = requester(url)?.request_payjoin(&PARSED_ORIGINAL_PSBT).await;
    assert!(matches!(result, Err(RequestError::Parse)));
    Ok(())
}

#[tokio::test]
async fn empty_proposal() -> Result<(), BoxError> {
    init_tracing();
    let (url, _) = serve_once(StatusCode::OK, "").await?;
    let result = requester(url)?.request_payjoin(&PARSED_ORIGINAL_PSBT).await;
    assert!(matches!(result, Err(RequestError::NoProposal)));
    Ok(())
}

#[tokio::test]
async fn unreachable_endpoint() -> Result<(), BoxError> {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let url = Url::parse(&format!("http://{}/pj", listener.local_addr()?))?;
    drop(listener);
    let error = endpoint_error(requester(url)?.request_payjoin(&PARSED_ORIGINAL_PSBT).await);
    assert_eq!(error.code(), None);
    Ok(())
}

#[tokio::test]
async fn stalled_endpoint_times_out() -> Result<(), BoxError> {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let url = Url::parse(&format!("http://{}/pj", listener.local_addr()?))?;
    tokio::spawn(async move {
        let Ok((stream, _)) = listener.accept().await else { return };
        tokio::time::sleep(Duration::from_secs(10)).await;
        drop(stream);
    });
    let requester =
        HttpRequester::new(url, NegotiationParameters::default(), Duration::from_millis(200))?;
    let error = endpoint_error(requester.request_payjoin(&PARSED_ORIGINAL_PSBT).await);
    assert_eq!(error.code(), None);
    Ok(())
}
