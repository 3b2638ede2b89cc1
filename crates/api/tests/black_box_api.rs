use chrono::{Datelike, Duration as ChronoDuration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::StatusCode;
use serde_json::{Value, json};

use verdant_auth::{JwtClaims, PrincipalId, Role};
use verdant_core::TenantId;
use verdant_infra::config::AppConfig;

const JWT_SECRET: &str = "test-secret";

struct TestServer {
    base_url: String,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        // Same router as prod (in-memory store), bound to an ephemeral port.
        let config = AppConfig::from_lookup(|name| match name {
            "JWT_SECRET" => Some(JWT_SECRET.to_string()),
            "BIND_ADDR" => Some("127.0.0.1:0".to_string()),
            _ => None,
        })
        .expect("test config");
        let app = verdant_api::app::build_app(&config)
            .await
            .expect("failed to build app");

        let listener = tokio::net::TcpListener::bind(config.bind_addr)
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { base_url, handle }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn mint_jwt(tenant_id: TenantId, roles: Vec<Role>) -> String {
    let now = Utc::now();
    let claims = JwtClaims {
        sub: PrincipalId::new(),
        tenant_id,
        roles,
        issued_at: now - ChronoDuration::seconds(5),
        expires_at: now + ChronoDuration::minutes(10),
    };

    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .expect("failed to encode jwt")
}

async fn post(client: &reqwest::Client, url: String, token: &str, body: Value) -> (StatusCode, Value) {
    let res = client.post(url).bearer_auth(token).json(&body).send().await.unwrap();
    let status = res.status();
    let body = res.json().await.unwrap_or(Value::Null);
    (status, body)
}

async fn get(client: &reqwest::Client, url: String, token: &str) -> (StatusCode, Value) {
    let res = client.get(url).bearer_auth(token).send().await.unwrap();
    let status = res.status();
    let body = res.json().await.unwrap_or(Value::Null);
    (status, body)
}

/// The read side is eventually consistent; poll until `accept` holds.
async fn get_eventually(
    client: &reqwest::Client,
    url: String,
    token: &str,
    accept: impl Fn(&Value) -> bool,
) -> Value {
    for _ in 0..100 {
        let (status, body) = get(client, url.clone(), token).await;
        if status == StatusCode::OK && accept(&body) {
            return body;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("{url} did not reach the expected state in time");
}

/// Registered tenant with one product; returns (token, product id).
async fn onboard(srv: &TestServer, client: &reqwest::Client, tenant_id: TenantId) -> (String, String) {
    let token = mint_jwt(tenant_id, vec![Role::ADMIN]);

    let (status, _) = post(client, srv.url("/tenant"), &token, json!({ "name": "Green Grocer" })).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = post(
        client,
        srv.url("/products"),
        &token,
        json!({ "sku": "TEMPEH-200", "name": "Tempeh 200g", "category": "chilled" }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    (token, body["id"].as_str().unwrap().to_string())
}

fn consignment_body(product_id: &str, quantity: i64) -> Value {
    json!({
        "owner_percentage": 70.0,
        "store_percentage": 30.0,
        "terms": "net 30",
        "items": [
            { "product_id": product_id, "quantity": quantity, "cost_price": 500, "retail_price": 1000 }
        ]
    })
}

#[tokio::test]
async fn health_is_public_and_carries_security_headers() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client.get(srv.url("/health")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()["x-content-type-options"], "nosniff");
    assert_eq!(res.headers()["x-frame-options"], "DENY");

    let res = client.get(srv.url("/health/ready")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn auth_required_for_protected_endpoints() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client.get(srv.url("/whoami")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "unauthenticated");

    let res = client
        .get(srv.url("/whoami"))
        .bearer_auth("not-a-token")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn tenant_context_is_derived_from_token() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let tenant_id = TenantId::new();
    let token = mint_jwt(tenant_id, vec![Role::new("admin")]);

    let (status, body) = get(&client, srv.url("/whoami"), &token).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["tenant_id"].as_str().unwrap(), tenant_id.to_string());
    assert!(body["roles"].as_array().unwrap().iter().any(|r| r == "admin"));
}

#[tokio::test]
async fn consignment_lifecycle_create_sell_settle() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let (token, product_id) = onboard(&srv, &client, TenantId::new()).await;

    let (status, created) = post(&client, srv.url("/consignments"), &token, consignment_body(&product_id, 10)).await;
    assert_eq!(status, StatusCode::CREATED, "body={created}");
    assert_eq!(created["number"], format!("CONS-{}-0001", Utc::now().year()));
    let id = created["id"].as_str().unwrap().to_string();
    let item_id = created["item_ids"][0].as_str().unwrap().to_string();

    let (status, sale) = post(
        &client,
        srv.url(&format!("/consignments/{id}/sales")),
        &token,
        json!({ "item_id": item_id, "quantity": 4, "unit_price": 1000 }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "body={sale}");
    assert_eq!(sale["sale"]["total"], 4000);
    assert_eq!(sale["sale"]["owner_amount"], 2800);
    assert_eq!(sale["sale"]["store_amount"], 1200);

    let detail = get_eventually(&client, srv.url(&format!("/consignments/{id}")), &token, |b| {
        b["total_sold"] == 4000
    })
    .await;
    assert_eq!(detail["items"][0]["quantity_available"], 6);
    assert_eq!(detail["owner_amount"], 2800);
    assert_eq!(detail["sales"].as_array().unwrap().len(), 1);

    let (status, settled) = post(
        &client,
        srv.url(&format!("/consignments/{id}/settle")),
        &token,
        json!({ "notes": "paid by transfer" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(settled["status"], "settled");
    assert_eq!(settled["store_amount"], 1200);

    let (status, body) = post(&client, srv.url(&format!("/consignments/{id}/settle")), &token, json!({})).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "invariant_violation");

    let summary = get_eventually(&client, srv.url("/consignments/summary"), &token, |b| {
        b["by_status"]["settled"] == 1
    })
    .await;
    assert_eq!(summary["total"], 1);
    assert_eq!(summary["total_sold"], 4000);

    let (status, list) = get(&client, srv.url("/consignments?status=settled"), &token).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list["items"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn invalid_requests_map_to_error_statuses() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let (token, product_id) = onboard(&srv, &client, TenantId::new()).await;

    let mut bad_split = consignment_body(&product_id, 5);
    bad_split["store_percentage"] = json!(40.0);
    let (status, body) = post(&client, srv.url("/consignments"), &token, bad_split).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");

    let (status, _) = post(
        &client,
        srv.url("/consignments"),
        &token,
        consignment_body(&verdant_core::AggregateId::new().to_string(), 5),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, created) = post(&client, srv.url("/consignments"), &token, consignment_body(&product_id, 2)).await;
    let id = created["id"].as_str().unwrap().to_string();
    let item_id = created["item_ids"][0].as_str().unwrap().to_string();

    let (status, _) = post(
        &client,
        srv.url(&format!("/consignments/{id}/sales")),
        &token,
        json!({ "item_id": item_id, "quantity": 3, "unit_price": 1000 }),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, _) = get(&client, srv.url("/consignments/not-a-uuid"), &token).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = get(&client, srv.url("/consignments?status=lost"), &token).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn non_positive_prices_and_malformed_bodies_are_json_validation_errors() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let (token, product_id) = onboard(&srv, &client, TenantId::new()).await;

    let mut negative_cost = consignment_body(&product_id, 5);
    negative_cost["items"][0]["cost_price"] = json!(-500);
    let (status, body) = post(&client, srv.url("/consignments"), &token, negative_cost).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");

    let mut sub_basis_point = consignment_body(&product_id, 5);
    sub_basis_point["owner_percentage"] = json!(70.014);
    let (status, body) = post(&client, srv.url("/consignments"), &token, sub_basis_point).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");

    let (_, created) = post(&client, srv.url("/consignments"), &token, consignment_body(&product_id, 5)).await;
    let id = created["id"].as_str().unwrap().to_string();
    let item_id = created["item_ids"][0].as_str().unwrap().to_string();

    for unit_price in [json!(-1), json!(0), json!("ten")] {
        let (status, body) = post(
            &client,
            srv.url(&format!("/consignments/{id}/sales")),
            &token,
            json!({ "item_id": item_id, "quantity": 1, "unit_price": unit_price }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "unit_price {unit_price}");
        assert_eq!(body["error"], "validation_error");
    }

    let res = client
        .post(srv.url("/consignments"))
        .bearer_auth(&token)
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "validation_error");
}

#[tokio::test]
async fn clerk_can_sell_but_not_create_or_settle() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let tenant_id = TenantId::new();
    let (admin, product_id) = onboard(&srv, &client, tenant_id).await;
    let clerk = mint_jwt(tenant_id, vec![Role::CLERK]);

    let (status, _) = post(&client, srv.url("/consignments"), &clerk, consignment_body(&product_id, 3)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (_, created) = post(&client, srv.url("/consignments"), &admin, consignment_body(&product_id, 3)).await;
    let id = created["id"].as_str().unwrap().to_string();
    let item_id = created["item_ids"][0].as_str().unwrap().to_string();

    let (status, _) = post(
        &client,
        srv.url(&format!("/consignments/{id}/sales")),
        &clerk,
        json!({ "item_id": item_id, "quantity": 1, "unit_price": 1000 }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = post(&client, srv.url(&format!("/consignments/{id}/settle")), &clerk, json!({})).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn tenant_isolation_blocks_cross_tenant_reads_and_writes() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let (token1, product_id) = onboard(&srv, &client, TenantId::new()).await;
    let (token2, _) = onboard(&srv, &client, TenantId::new()).await;

    let (_, created) = post(&client, srv.url("/consignments"), &token1, consignment_body(&product_id, 3)).await;
    let id = created["id"].as_str().unwrap().to_string();
    let item_id = created["item_ids"][0].as_str().unwrap().to_string();
    get_eventually(&client, srv.url(&format!("/consignments/{id}")), &token1, |_| true).await;

    // Tenant2 cannot read it (read models are tenant-scoped)
    let (status, _) = get(&client, srv.url(&format!("/consignments/{id}")), &token2).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Nor sell from it (dispatch happens under tenant2's context)
    let (status, _) = post(
        &client,
        srv.url(&format!("/consignments/{id}/sales")),
        &token2,
        json!({ "item_id": item_id, "quantity": 1, "unit_price": 1000 }),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Nor consign tenant1's product
    let (status, _) = post(&client, srv.url("/consignments"), &token2, consignment_body(&product_id, 1)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
