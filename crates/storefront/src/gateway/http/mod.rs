//! Cart API client over HTTP.
//!
//! Uses `reqwest` with a cookie header carrying the shopper's session.

mod conversions;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cart_sync_core::{Cart, CartItemId, Decimal, VariantId};
use reqwest::header::{ACCEPT, CONTENT_TYPE, COOKIE, HeaderMap, HeaderValue};
use reqwest::{Method, RequestBuilder, StatusCode};
use secrecy::ExposeSecret;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};
use url::Url;

use super::types::{
    AddItemRequest, ApiResponse, ApplyCouponRequest, CartPayload, CouponVerification,
    UpdateItemRequest, VerifyCouponPayload, VerifyCouponRequest,
};
use super::{CartGateway, GatewayError};
use crate::config::CartApiConfig;

use conversions::convert_cart;

/// Maximum number of body characters kept in error messages.
const ERROR_BODY_LIMIT: usize = 200;

// =============================================================================
// HttpCartGateway
// =============================================================================

/// Client for the cart API.
///
/// Cheap to clone; clones share the connection pool.
#[derive(Clone)]
pub struct HttpCartGateway {
    inner: Arc<HttpCartGatewayInner>,
}

struct HttpCartGatewayInner {
    client: reqwest::Client,
    base_url: Url,
    timeout: Duration,
}

impl HttpCartGateway {
    /// Create a new cart API client.
    ///
    /// # Errors
    ///
    /// Returns an error if the session cookie is not a valid header value or
    /// the HTTP client fails to build.
    pub fn new(config: &CartApiConfig, timeout: Duration) -> Result<Self, GatewayError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        if let Some(cookie) = &config.session_cookie {
            let mut value = HeaderValue::from_str(cookie.expose_secret())
                .map_err(|e| GatewayError::Parse(format!("Invalid session cookie: {e}")))?;
            value.set_sensitive(true);
            headers.insert(COOKIE, value);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            inner: Arc::new(HttpCartGatewayInner {
                client,
                base_url: config.base_url.clone(),
                timeout,
            }),
        })
    }

    /// Build an endpoint URL from path segments, percent-encoding each one.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, GatewayError> {
        let mut url = self.inner.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| {
                GatewayError::Parse(format!(
                    "base URL cannot take a path: {}",
                    self.inner.base_url
                ))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, segments: &[&str]) -> Result<RequestBuilder, GatewayError> {
        Ok(self.inner.client.request(method, self.endpoint(segments)?))
    }

    fn request_json<B: Serialize + ?Sized>(
        &self,
        method: Method,
        segments: &[&str],
        body: &B,
    ) -> Result<RequestBuilder, GatewayError> {
        Ok(self.request(method, segments)?.json(body))
    }

    /// Send a request and unwrap the response envelope.
    async fn execute<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<Option<T>, GatewayError> {
        let response = request.send().await.map_err(|e| self.map_send_error(e))?;
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(1);
            return Err(GatewayError::RateLimited(retry_after));
        }

        if status == StatusCode::UNAUTHORIZED {
            return Err(GatewayError::Unauthorized);
        }

        // Get response body as text first for better error diagnostics
        let body = response.text().await.map_err(|e| self.map_send_error(e))?;

        let envelope: ApiResponse<T> = match serde_json::from_str(&body) {
            Ok(envelope) => envelope,
            Err(_) if !status.is_success() => {
                tracing::error!(
                    status = %status,
                    body = %truncate(&body),
                    "Cart API returned non-success status"
                );
                return Err(GatewayError::Status {
                    status: status.as_u16(),
                    body: truncate(&body),
                });
            }
            Err(e) => {
                tracing::error!(
                    error = %e,
                    body = %truncate(&body),
                    "Failed to parse cart API response"
                );
                return Err(GatewayError::Parse(e.to_string()));
            }
        };

        if !envelope.success || !status.is_success() {
            let message = envelope
                .message
                .unwrap_or_else(|| format!("request failed with status {status}"));
            debug!(status = %status, message = %message, "Cart API rejected request");
            return Err(GatewayError::Rejected(message));
        }

        Ok(envelope.data)
    }

    /// Send a request whose response carries no data worth keeping.
    async fn execute_ack(&self, request: RequestBuilder) -> Result<(), GatewayError> {
        self.execute::<serde_json::Value>(request).await.map(|_| ())
    }

    fn map_send_error(&self, error: reqwest::Error) -> GatewayError {
        if error.is_timeout() {
            GatewayError::Timeout(self.inner.timeout)
        } else {
            GatewayError::Http(error)
        }
    }
}

#[async_trait]
impl CartGateway for HttpCartGateway {
    #[instrument(skip(self))]
    async fn get_cart(&self) -> Result<Cart, GatewayError> {
        let request = self.request(Method::GET, &["cart"])?;
        let payload: CartPayload = self
            .execute(request)
            .await?
            .ok_or_else(|| GatewayError::Parse("cart response has no data".to_string()))?;
        convert_cart(payload)
    }

    #[instrument(skip(self), fields(variant_id = %variant_id))]
    async fn add_item(&self, variant_id: &VariantId, quantity: u32) -> Result<(), GatewayError> {
        let body = AddItemRequest {
            product_variant_id: variant_id.to_string(),
            quantity,
        };
        let request = self.request_json(Method::POST, &["cart", "add"], &body)?;
        self.execute_ack(request).await
    }

    #[instrument(skip(self), fields(item_id = %item_id))]
    async fn update_item(
        &self,
        item_id: &CartItemId,
        quantity: u32,
    ) -> Result<(), GatewayError> {
        let body = UpdateItemRequest { quantity };
        let request = self.request_json(
            Method::PATCH,
            &["cart", "update", item_id.as_str()],
            &body,
        )?;
        self.execute_ack(request).await
    }

    #[instrument(skip(self), fields(item_id = %item_id))]
    async fn remove_item(&self, item_id: &CartItemId) -> Result<(), GatewayError> {
        let request = self.request(Method::DELETE, &["cart", "remove", item_id.as_str()])?;
        self.execute_ack(request).await
    }

    #[instrument(skip(self))]
    async fn clear_cart(&self) -> Result<(), GatewayError> {
        let request = self.request(Method::DELETE, &["cart", "clear"])?;
        self.execute_ack(request).await
    }

    #[instrument(skip(self), fields(code = %code))]
    async fn verify_coupon(
        &self,
        code: &str,
        cart_total: Decimal,
    ) -> Result<CouponVerification, GatewayError> {
        let body = VerifyCouponRequest {
            code: code.to_string(),
            cart_total,
        };
        let request = self.request_json(Method::POST, &["coupons", "verify"], &body)?;
        let payload: VerifyCouponPayload = self
            .execute(request)
            .await?
            .ok_or_else(|| GatewayError::Parse("verify response has no coupon".to_string()))?;
        Ok(payload.coupon)
    }

    #[instrument(skip(self), fields(code = %code))]
    async fn apply_coupon(&self, code: &str) -> Result<(), GatewayError> {
        let body = ApplyCouponRequest {
            code: code.to_string(),
        };
        let request = self.request_json(Method::POST, &["coupons", "apply"], &body)?;
        self.execute_ack(request).await
    }
}

fn truncate(body: &str) -> String {
    body.chars().take(ERROR_BODY_LIMIT).collect()
}
