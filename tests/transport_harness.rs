use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::stream::{self, BoxStream, StreamExt};
use geyser_subscribe::config::{ENDPOINT_ENV, TOKEN_ENV};
use geyser_subscribe::stream::client::{
    ConnectSettings, Connector, GrpcConnector, SubscribeError, TOKEN_METADATA_KEY,
};
use geyser_subscribe::stream::filter::{
    AddressFilters, ACCOUNT_FILTER_NAME, TRANSACTION_FILTER_NAME,
};
use geyser_subscribe::stream::proto::subscribe_update::UpdateOneof;
use geyser_subscribe::stream::proto::{
    SubscribeRequest, SubscribeUpdate, SubscribeUpdateAccount, SubscribeUpdateAccountInfo,
};
use geyser_subscribe::{SessionConfig, SessionState, SubscriptionSession};
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::codegen::{http, Body, BoxFuture, Service, StdError};
use tonic::server::{NamedService, StreamingService};
use tonic::transport::Server;
use tonic::{Status, Streaming};

const TEST_TOKEN: &str = "secret";
const SUBSCRIBE_PATH: &str = "/geyser.Geyser/Subscribe";
const WAIT: Duration = Duration::from_secs(5);

/// What the in-process server saw on the subscribe call.
#[derive(Debug, Default)]
struct Received {
    calls: usize,
    token: Option<String>,
    first_message: Option<SubscribeRequest>,
}

/// Minimal `geyser.Geyser` server replaying a fixed set of updates.
#[derive(Clone)]
struct GeyserStub {
    received: Arc<Mutex<Received>>,
    updates: Arc<Vec<SubscribeUpdate>>,
}

impl NamedService for GeyserStub {
    const NAME: &'static str = "geyser.Geyser";
}

impl<B> Service<http::Request<B>> for GeyserStub
where
    B: Body + Send + 'static,
    B::Error: Into<StdError> + Send + 'static,
{
    type Response = http::Response<tonic::body::BoxBody>;
    type Error = Infallible;
    type Future = BoxFuture<Self::Response, Self::Error>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: http::Request<B>) -> Self::Future {
        if req.uri().path() != SUBSCRIBE_PATH {
            let status = Status::unimplemented("unknown method");
            return Box::pin(async move { Ok(status.into_http()) });
        }

        let method = SubscribeSvc(self.clone());
        Box::pin(async move {
            let mut grpc = tonic::server::Grpc::new(tonic::codec::ProstCodec::default());
            Ok(grpc.streaming(method, req).await)
        })
    }
}

struct SubscribeSvc(GeyserStub);

impl StreamingService<SubscribeRequest> for SubscribeSvc {
    type Response = SubscribeUpdate;
    type ResponseStream = BoxStream<'static, Result<SubscribeUpdate, Status>>;
    type Future = BoxFuture<tonic::Response<Self::ResponseStream>, Status>;

    fn call(&mut self, request: tonic::Request<Streaming<SubscribeRequest>>) -> Self::Future {
        let received = Arc::clone(&self.0.received);
        let updates = self.0.updates.as_ref().clone();
        Box::pin(async move {
            let token = request
                .metadata()
                .get(TOKEN_METADATA_KEY)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string);
            let mut inbound = request.into_inner();
            let first_message = inbound.message().await?;
            {
                let mut received = received.lock().expect("received lock");
                received.calls += 1;
                received.token = token;
                received.first_message = first_message;
            }

            let outbound = stream::iter(updates.into_iter().map(Ok)).boxed();
            Ok(tonic::Response::new(outbound))
        })
    }
}

async fn spawn_geyser(updates: Vec<SubscribeUpdate>) -> (String, Arc<Mutex<Received>>) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind geyser listener");
    let addr = listener.local_addr().expect("listener address");
    let received = Arc::new(Mutex::new(Received::default()));
    let service = GeyserStub {
        received: Arc::clone(&received),
        updates: Arc::new(updates),
    };

    tokio::spawn(async move {
        Server::builder()
            .add_service(service)
            .serve_with_incoming(TcpListenerStream::new(listener))
            .await
            .expect("geyser server");
    });

    (format!("http://{addr}"), received)
}

async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind throwaway listener");
    listener.local_addr().expect("listener address").port()
}

fn config(endpoint: &str, token: &str, filters: AddressFilters) -> SessionConfig {
    let vars: HashMap<&str, String> = [
        (ENDPOINT_ENV, endpoint.to_string()),
        (TOKEN_ENV, token.to_string()),
    ]
    .into_iter()
    .collect();
    SessionConfig::from_lookup(|key| vars.get(key).cloned(), filters)
        .expect("valid session config")
}

fn account_update(slot: u64) -> SubscribeUpdate {
    SubscribeUpdate {
        filters: vec![ACCOUNT_FILTER_NAME.to_string()],
        update_oneof: Some(UpdateOneof::Account(SubscribeUpdateAccount {
            account: Some(SubscribeUpdateAccountInfo {
                pubkey: vec![slot as u8; 32],
                lamports: 1_000 + slot,
                ..Default::default()
            }),
            slot,
            is_startup: false,
        })),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn grpc_session_delivers_updates_and_sends_token_with_filters() {
    let (endpoint, received) = spawn_geyser(vec![
        account_update(1),
        account_update(2),
        account_update(3),
    ])
    .await;
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let filters = AddressFilters::new(
        vec!["A".to_string()],
        vec![],
        vec!["S1".to_string(), "S2".to_string()],
    );
    let session = SubscriptionSession::from_config(
        config(&endpoint, TEST_TOKEN, filters).with_handler(move |update: SubscribeUpdate| {
            sink.lock()
                .expect("seen lock")
                .push(update.account().map(|account| account.slot));
        }),
    );
    let handle = session.handle();

    timeout(WAIT, session.run())
        .await
        .expect("run should finish")
        .expect("server ended the stream cleanly");

    assert_eq!(
        *seen.lock().expect("seen lock"),
        vec![Some(1), Some(2), Some(3)]
    );
    assert_eq!(handle.state(), SessionState::Closed);

    let received = received.lock().expect("received lock");
    assert_eq!(received.calls, 1);
    assert_eq!(received.token.as_deref(), Some(TEST_TOKEN));
    let request = received.first_message.as_ref().expect("filter payload sent");
    assert_eq!(
        request.accounts[ACCOUNT_FILTER_NAME].account,
        vec!["A".to_string()]
    );
    assert_eq!(
        request.transactions[TRANSACTION_FILTER_NAME].account_include,
        vec!["S1".to_string(), "S2".to_string()]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn grpc_session_without_token_sends_no_metadata() {
    let (endpoint, received) = spawn_geyser(vec![account_update(9)]).await;
    let session =
        SubscriptionSession::from_config(config(&endpoint, "", AddressFilters::default()));

    timeout(WAIT, session.run())
        .await
        .expect("run should finish")
        .expect("server ended the stream cleanly");

    let received = received.lock().expect("received lock");
    assert_eq!(received.calls, 1);
    assert_eq!(received.token, None);
    let request = received.first_message.as_ref().expect("filter payload sent");
    assert!(request.accounts.is_empty());
    assert!(request.transactions.is_empty());
}

#[tokio::test]
async fn dial_to_closed_port_is_a_connection_error() {
    let port = closed_port().await;

    for scheme in ["http", "https"] {
        let config = config(
            &format!("{scheme}://127.0.0.1:{port}"),
            TEST_TOKEN,
            AddressFilters::default(),
        );
        let settings = ConnectSettings::from_config(&config);

        let result = timeout(WAIT, GrpcConnector.connect(&settings))
            .await
            .expect("dial should finish");
        match result {
            Err(SubscribeError::Connection { endpoint, .. }) => {
                assert!(endpoint.starts_with(scheme), "{endpoint} uses {scheme}");
            }
            Err(other) => panic!("expected connection error for {scheme}, got {other:?}"),
            Ok(_) => panic!("dial to closed port succeeded for {scheme}"),
        }
    }
}

#[tokio::test]
async fn session_reports_connection_error_without_invoking_handler() {
    let port = closed_port().await;
    let seen = Arc::new(Mutex::new(0usize));
    let sink = Arc::clone(&seen);
    let session = SubscriptionSession::from_config(
        config(
            &format!("http://127.0.0.1:{port}"),
            TEST_TOKEN,
            AddressFilters::default(),
        )
        .with_handler(move |_| *sink.lock().expect("seen lock") += 1),
    );
    let handle = session.handle();

    let result = timeout(WAIT, session.run())
        .await
        .expect("run should finish");

    assert!(matches!(result, Err(SubscribeError::Connection { .. })));
    assert_eq!(*seen.lock().expect("seen lock"), 0);
    assert_eq!(handle.state(), SessionState::Closed);
}
