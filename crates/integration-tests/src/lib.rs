//! Integration tests for the cart sync engine.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p cart-sync-integration-tests
//! ```
//!
//! # Test Categories
//!
//! - `guest_cart` - Guest cart persisted in a directory
//! - `cart_merge` - Sign-in merge scenarios
//! - `reconciliation` - Optimistic edits racing authoritative fetches
//! - `coupons` - Coupon capping, apply and checkout
//! - `http_gateway` - Wire format against a mock cart API
//!
//! Scenario tests run against `InMemoryCartGateway`; the wire tests run
//! `HttpCartGateway` against [`MockCartApi`], an axum server on a random
//! local port.

#![allow(clippy::expect_used, clippy::missing_panics_doc)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::header::COOKIE;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, patch, post};
use axum::{Json, Router};
use cart_sync_core::{Decimal, DiscountType};
use cart_sync_storefront::config::{CartApiConfig, SyncSettings};
use cart_sync_storefront::gateway::HttpCartGateway;
use cart_sync_storefront::gateway::types::{
    AddItemRequest, ApiResponse, ApplyCouponRequest, CartItemPayload, CartPayload,
    CouponVerification, UpdateItemRequest, VerifyCouponPayload, VerifyCouponRequest,
};
use cart_sync_storefront::models::AuthState;
use cart_sync_storefront::storage::{LocalCartStore, MemoryStorage};
use cart_sync_storefront::testing::InMemoryCartGateway;
use cart_sync_storefront::CartService;
use secrecy::SecretString;
use tokio::task::JoinHandle;
use url::Url;

/// Session cookie the mock server expects.
pub const TEST_SESSION_COOKIE: &str = "sid=Qm9x7LpZ2vT8kR4w";

// =============================================================================
// Service builders
// =============================================================================

/// A cart service over `gateway` with an in-memory guest cart.
pub fn cart_service(gateway: &InMemoryCartGateway, auth: AuthState) -> (CartService, LocalCartStore) {
    let local = LocalCartStore::new(Arc::new(MemoryStorage::new()));
    let service = CartService::new(
        Arc::new(gateway.clone()),
        local.clone(),
        SyncSettings::default(),
        auth,
    );
    (service, local)
}

/// Shorthand for whole-unit prices.
#[must_use]
pub fn price(amount: i64) -> Decimal {
    Decimal::from(amount)
}

// =============================================================================
// Mock cart API
// =============================================================================

/// A request as the mock server saw it.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    /// Raw (still percent-encoded) path.
    pub path: String,
    pub cookie: Option<String>,
    pub body: Option<serde_json::Value>,
}

#[derive(Default)]
struct MockState {
    items: Vec<CartItemPayload>,
    next_line: u64,
    prices: HashMap<String, Decimal>,
    coupons: HashMap<String, (DiscountType, Decimal)>,
    applied_coupon: Option<String>,
    forced_status: Option<StatusCode>,
    requests: Vec<RecordedRequest>,
}

impl MockState {
    fn cart_payload(&self) -> CartPayload {
        CartPayload {
            items: self.items.clone(),
            subtotal: Some(
                self.items
                    .iter()
                    .map(|item| item.price * Decimal::from(item.quantity))
                    .sum(),
            ),
            item_count: Some(self.items.len()),
            total_quantity: Some(self.items.iter().map(|item| item.quantity).sum()),
        }
    }
}

type Shared = Arc<Mutex<MockState>>;

fn lock(state: &Shared) -> MutexGuard<'_, MockState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// An axum server implementing the cart API on `127.0.0.1`.
pub struct MockCartApi {
    base_url: Url,
    state: Shared,
    server: JoinHandle<()>,
}

impl MockCartApi {
    pub async fn start() -> Self {
        let state = Shared::default();
        let app = Router::new()
            .route("/api/cart", get(get_cart))
            .route("/api/cart/add", post(add_item))
            .route("/api/cart/update/{item_id}", patch(update_item))
            .route("/api/cart/remove/{item_id}", delete(remove_item))
            .route("/api/cart/clear", delete(clear_cart))
            .route("/api/coupons/verify", post(verify_coupon))
            .route("/api/coupons/apply", post(apply_coupon))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock cart API");
        let addr = listener.local_addr().expect("mock cart API address");
        let server = tokio::spawn(async move {
            axum::serve(listener, app).await.expect("mock cart API");
        });

        Self {
            base_url: Url::parse(&format!("http://{addr}/api/")).expect("mock base URL"),
            state,
            server,
        }
    }

    #[must_use]
    pub fn config(&self) -> CartApiConfig {
        CartApiConfig {
            base_url: self.base_url.clone(),
            session_cookie: Some(SecretString::from(TEST_SESSION_COOKIE)),
        }
    }

    #[must_use]
    pub fn gateway(&self) -> HttpCartGateway {
        HttpCartGateway::new(&self.config(), Duration::from_secs(5)).expect("HTTP gateway")
    }

    pub fn set_price(&self, variant_id: &str, price: Decimal) {
        lock(&self.state).prices.insert(variant_id.to_string(), price);
    }

    /// Put a line directly into the server cart, returning its ID.
    pub fn seed_item(&self, variant_id: &str, price: Decimal, quantity: u32) -> String {
        let mut state = lock(&self.state);
        state.prices.insert(variant_id.to_string(), price);
        state.next_line += 1;
        let id = format!("srv-{}", state.next_line);
        state.items.push(CartItemPayload {
            id: id.clone(),
            product_variant_id: variant_id.to_string(),
            price,
            quantity,
            subtotal: Some(price * Decimal::from(quantity)),
        });
        id
    }

    pub fn add_coupon(&self, code: &str, discount_type: DiscountType, value: Decimal) {
        lock(&self.state)
            .coupons
            .insert(code.to_string(), (discount_type, value));
    }

    /// Answer every request with `status` and no envelope.
    pub fn force_status(&self, status: Option<StatusCode>) {
        lock(&self.state).forced_status = status;
    }

    #[must_use]
    pub fn requests(&self) -> Vec<RecordedRequest> {
        lock(&self.state).requests.clone()
    }

    #[must_use]
    pub fn applied_coupon(&self) -> Option<String> {
        lock(&self.state).applied_coupon.clone()
    }

    #[must_use]
    pub fn server_quantity(&self, variant_id: &str) -> u32 {
        lock(&self.state)
            .items
            .iter()
            .filter(|item| item.product_variant_id == variant_id)
            .map(|item| item.quantity)
            .sum()
    }
}

impl Drop for MockCartApi {
    fn drop(&mut self) {
        self.server.abort();
    }
}

/// Record the request; answer with the forced status if one is set.
fn record(
    state: &Shared,
    method: &Method,
    uri: &Uri,
    headers: &HeaderMap,
    body: Option<serde_json::Value>,
) -> Option<Response> {
    let mut state = lock(state);
    state.requests.push(RecordedRequest {
        method: method.to_string(),
        path: uri.path().to_string(),
        cookie: headers
            .get(COOKIE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        body,
    });
    state.forced_status.map(|status| {
        if status == StatusCode::TOO_MANY_REQUESTS {
            (status, [("Retry-After", "7")], "slow down").into_response()
        } else {
            (status, "<html>upstream error</html>").into_response()
        }
    })
}

fn rejected(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(ApiResponse::<serde_json::Value>::rejected(message)),
    )
        .into_response()
}

fn acknowledged() -> Response {
    Json(ApiResponse::ok(serde_json::json!({}))).into_response()
}

async fn get_cart(
    State(state): State<Shared>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    if let Some(response) = record(&state, &method, &uri, &headers, None) {
        return response;
    }
    Json(ApiResponse::ok(lock(&state).cart_payload())).into_response()
}

async fn add_item(
    State(state): State<Shared>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    Json(body): Json<AddItemRequest>,
) -> Response {
    if let Some(response) = record(&state, &method, &uri, &headers, serde_json::to_value(&body).ok()) {
        return response;
    }

    let mut state = lock(&state);
    let Some(price) = state.prices.get(&body.product_variant_id).copied() else {
        return rejected(StatusCode::NOT_FOUND, "Product variant not found");
    };
    if let Some(line) = state
        .items
        .iter_mut()
        .find(|line| line.product_variant_id == body.product_variant_id)
    {
        line.quantity += body.quantity;
        line.subtotal = Some(line.price * Decimal::from(line.quantity));
    } else {
        state.next_line += 1;
        let id = format!("srv-{}", state.next_line);
        state.items.push(CartItemPayload {
            id,
            product_variant_id: body.product_variant_id.clone(),
            price,
            quantity: body.quantity,
            subtotal: Some(price * Decimal::from(body.quantity)),
        });
    }
    Json(ApiResponse::ok(state.cart_payload())).into_response()
}

async fn update_item(
    State(state): State<Shared>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    Path(item_id): Path<String>,
    Json(body): Json<UpdateItemRequest>,
) -> Response {
    if let Some(response) = record(&state, &method, &uri, &headers, serde_json::to_value(&body).ok()) {
        return response;
    }

    let mut state = lock(&state);
    let Some(line) = state.items.iter_mut().find(|line| line.id == item_id) else {
        return rejected(StatusCode::NOT_FOUND, "Cart item not found");
    };
    line.quantity = body.quantity;
    line.subtotal = Some(line.price * Decimal::from(body.quantity));
    let line = line.clone();
    Json(ApiResponse::ok(line)).into_response()
}

async fn remove_item(
    State(state): State<Shared>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    Path(item_id): Path<String>,
) -> Response {
    if let Some(response) = record(&state, &method, &uri, &headers, None) {
        return response;
    }

    let mut state = lock(&state);
    let before = state.items.len();
    state.items.retain(|line| line.id != item_id);
    if state.items.len() == before {
        return rejected(StatusCode::NOT_FOUND, "Cart item not found");
    }
    acknowledged()
}

async fn clear_cart(
    State(state): State<Shared>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    if let Some(response) = record(&state, &method, &uri, &headers, None) {
        return response;
    }
    let mut state = lock(&state);
    state.items.clear();
    state.applied_coupon = None;
    acknowledged()
}

async fn verify_coupon(
    State(state): State<Shared>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    Json(body): Json<VerifyCouponRequest>,
) -> Response {
    if let Some(response) = record(&state, &method, &uri, &headers, serde_json::to_value(&body).ok()) {
        return response;
    }

    let state = lock(&state);
    let Some((discount_type, discount_value)) = state.coupons.get(&body.code).copied() else {
        return rejected(StatusCode::BAD_REQUEST, "Invalid coupon code");
    };
    let discount_amount = match discount_type {
        DiscountType::Percentage => {
            (body.cart_total * discount_value / Decimal::ONE_HUNDRED).round_dp(2)
        }
        DiscountType::FixedAmount => discount_value,
    };
    Json(ApiResponse::ok(VerifyCouponPayload {
        coupon: CouponVerification {
            id: format!("cpn-{}", body.code.to_lowercase()).into(),
            code: body.code.clone(),
            discount_type,
            discount_value,
            discount_amount,
            final_amount: body.cart_total - discount_amount,
        },
    }))
    .into_response()
}

async fn apply_coupon(
    State(state): State<Shared>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    Json(body): Json<ApplyCouponRequest>,
) -> Response {
    if let Some(response) = record(&state, &method, &uri, &headers, serde_json::to_value(&body).ok()) {
        return response;
    }

    let mut state = lock(&state);
    if !state.coupons.contains_key(&body.code) {
        return rejected(StatusCode::BAD_REQUEST, "Invalid coupon code");
    }
    state.applied_coupon = Some(body.code);
    acknowledged()
}
