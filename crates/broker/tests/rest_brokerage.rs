//! REST brokerage against a mock order gateway.

use oi_strangle_broker::{
    BrokerError, BrokerOrderStatus, Brokerage, OrderHandle, OrderRequest, RestBrokerage,
    RestBrokerageConfig,
};
use oi_strangle_core::{OptionType, OrderSide};
use rust_decimal_macros::dec;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer) -> RestBrokerage {
    RestBrokerage::new(RestBrokerageConfig::new(server.uri(), "test-token")).unwrap()
}

fn request() -> OrderRequest {
    OrderRequest {
        client_order_id: "DT-20240110T091900-CE".to_string(),
        symbol: "NIFTY24JAN19600CE".to_string(),
        side: OrderSide::Sell,
        quantity: 50,
        strike: dec!(19600),
        option_type: OptionType::Call,
    }
}

#[tokio::test]
async fn submit_sends_market_order_with_client_tag() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/orders"))
        .and(header("Authorization", "Bearer test-token"))
        .and(body_partial_json(serde_json::json!({
            "client_order_id": "DT-20240110T091900-CE",
            "symbol": "NIFTY24JAN19600CE",
            "side": "SELL",
            "quantity": 50,
            "option_type": "CE",
            "order_type": "MARKET"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "order_id": "240110000123"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let handle = client(&server).submit_order(&request()).await.unwrap();
    assert_eq!(handle.client_order_id, "DT-20240110T091900-CE");
    assert_eq!(handle.broker_order_id.as_deref(), Some("240110000123"));
}

#[tokio::test]
async fn status_is_queried_by_client_tag() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/orders/DT-20240110T091900-CE"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "order_id": "240110000123",
            "status": "filled",
            "average_price": 84.5
        })))
        .mount(&server)
        .await;

    let status = client(&server)
        .query_status(&OrderHandle::by_tag("DT-20240110T091900-CE"))
        .await
        .unwrap();
    assert_eq!(status, BrokerOrderStatus::Filled { avg_price: dec!(84.5) });
}

#[tokio::test]
async fn unknown_tag_maps_to_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/orders/DT-1-PE"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let err = client(&server)
        .query_status(&OrderHandle::by_tag("DT-1-PE"))
        .await
        .unwrap_err();
    assert_eq!(err, BrokerError::not_found("DT-1-PE"));
}

#[tokio::test]
async fn rate_limit_and_server_errors_are_transient() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/orders"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "3"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/orders"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let broker = client(&server);
    let first = broker.submit_order(&request()).await.unwrap_err();
    assert_eq!(first, BrokerError::RateLimited { retry_after_secs: 3 });
    assert!(!first.may_have_reached_broker());

    let second = broker.submit_order(&request()).await.unwrap_err();
    assert!(matches!(second, BrokerError::Network(_)));
    assert!(second.is_transient());
    assert!(second.may_have_reached_broker());
}

#[tokio::test]
async fn typed_rejections_are_permanent() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/orders"))
        .respond_with(ResponseTemplate::new(422).set_body_json(serde_json::json!({
            "error_code": "INSUFFICIENT_MARGIN",
            "message": "required 120000, available 40000"
        })))
        .mount(&server)
        .await;

    let err = client(&server).submit_order(&request()).await.unwrap_err();
    assert_eq!(
        err,
        BrokerError::InsufficientMargin("required 120000, available 40000".to_string())
    );
    assert!(!err.is_transient());
}

#[tokio::test]
async fn last_price_reads_quote() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/quotes/NIFTY24JAN19600CE"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "last_price": "91.25"
        })))
        .mount(&server)
        .await;

    let price = client(&server)
        .get_last_price("NIFTY24JAN19600CE")
        .await
        .unwrap();
    assert_eq!(price, dec!(91.25));
}

#[tokio::test]
async fn path_unsafe_symbols_never_reach_the_gateway() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let err = client(&server).get_last_price("../admin").await.unwrap_err();
    assert!(matches!(err, BrokerError::InvalidSymbol(_)));
}
