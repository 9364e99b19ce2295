//! Remote cart client.
//!
//! Thin HTTP wrapper over the backend cart resource, used for authenticated
//! sessions. Performs no retries and no fallback to local persistence; every
//! failure surfaces to the reconciler, which decides how to degrade.

use std::time::Duration;

use async_trait::async_trait;
use jiff::Timestamp;
use mockall::automock;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};

use crate::{
    cart::{
        errors::CartError,
        models::{CartLine, LineDisplay},
    },
    ids::{CustomerId, LineId, ProductId, VariationId},
    session::Credentials,
};

/// Default per-request deadline. A call that never resolves would otherwise
/// leave the cart in a perpetual in-flight state.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for the backend cart API.
#[derive(Debug, Clone)]
pub struct CartApiConfig {
    /// API base address, e.g. `"https://api.example.com"`.
    pub base_url: String,

    /// Per-request deadline; timeouts surface as transient network errors.
    pub timeout: Duration,
}

impl CartApiConfig {
    /// Configuration with the default request timeout.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

/// One cart line as the backend represents it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RemoteCartLine {
    /// Server-assigned line identifier.
    pub id: LineId,

    /// The product.
    pub product_id: ProductId,

    /// The purchased variation.
    pub product_variation_id: VariationId,

    /// Units of the variation.
    pub quantity: u32,

    /// Effective unit price in minor units, as priced by the backend.
    pub unit_price: u64,

    /// Product name, for rendering.
    #[serde(default)]
    pub product_name: String,

    /// Product image URL, for rendering.
    #[serde(default)]
    pub image_url: Option<String>,
}

impl RemoteCartLine {
    /// Convert the backend representation into a snapshot line with the
    /// given local revision. Display details beyond what the wire carries
    /// are the caller's to overlay.
    #[must_use]
    pub fn into_line(self, revision: u64) -> CartLine {
        CartLine {
            line_id: Some(self.id),
            product_id: self.product_id,
            variation_id: self.product_variation_id,
            quantity: self.quantity,
            unit_price: self.unit_price,
            display: LineDisplay {
                name: self.product_name,
                image_url: self.image_url,
                options: Vec::new(),
            },
            revision,
            added_at: Timestamp::now(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct MutateLineRequest {
    customer_id: CustomerId,
    product_id: ProductId,
    product_variation_id: VariationId,
    quantity: u32,
}

/// Operations against the backend cart resource.
///
/// Every call requires valid credentials; falling back to guest behavior on
/// credential failure is the caller's decision, never this component's.
#[automock]
#[async_trait]
pub trait RemoteCart: Send + Sync {
    /// List the customer's cart lines.
    async fn list(&self, auth: &Credentials) -> Result<Vec<RemoteCartLine>, CartError>;

    /// Add a variation to the customer's cart. The backend folds the add
    /// into an existing line for the same pair and returns the resulting
    /// line.
    async fn add(
        &self,
        auth: &Credentials,
        product: ProductId,
        variation: VariationId,
        quantity: u32,
    ) -> Result<RemoteCartLine, CartError>;

    /// Update the line for a pair: quantity, or a variation switch. A
    /// variation switch updates the existing line in place, preserving its
    /// server identity and ordering.
    async fn update(
        &self,
        auth: &Credentials,
        product: ProductId,
        variation: VariationId,
        quantity: u32,
    ) -> Result<RemoteCartLine, CartError>;

    /// Remove a line by its server identifier.
    async fn remove(&self, auth: &Credentials, line: LineId) -> Result<(), CartError>;
}

/// `RemoteCart` implementation over the backend REST API.
#[derive(Debug, Clone)]
pub struct HttpCartClient {
    config: CartApiConfig,
    http: Client,
}

impl HttpCartClient {
    /// Create a client from the given configuration.
    #[must_use]
    pub fn new(config: CartApiConfig) -> Self {
        Self {
            config,
            http: Client::new(),
        }
    }

    fn authorized(&self, builder: RequestBuilder, auth: &Credentials) -> RequestBuilder {
        builder
            .bearer_auth(auth.token.as_str())
            .timeout(self.config.timeout)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.config.base_url)
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, CartError> {
    let status = response.status();

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(CartError::AuthExpired),
        StatusCode::NOT_FOUND => Err(CartError::NotFound),
        status if !status.is_success() => {
            let text = response.text().await.unwrap_or_default();

            Err(CartError::UnexpectedResponse(format!(
                "request failed with status {status}: {text}"
            )))
        }
        _ => Ok(response),
    }
}

#[async_trait]
impl RemoteCart for HttpCartClient {
    async fn list(&self, auth: &Credentials) -> Result<Vec<RemoteCartLine>, CartError> {
        let url = self.url(&format!("/Cart/customer/{}", auth.customer));

        let response = self.authorized(self.http.get(url), auth).send().await?;
        let lines = check_status(response).await?.json().await?;

        Ok(lines)
    }

    async fn add(
        &self,
        auth: &Credentials,
        product: ProductId,
        variation: VariationId,
        quantity: u32,
    ) -> Result<RemoteCartLine, CartError> {
        let body = MutateLineRequest {
            customer_id: auth.customer,
            product_id: product,
            product_variation_id: variation,
            quantity,
        };

        let response = self
            .authorized(self.http.post(self.url("/Cart/add")), auth)
            .json(&body)
            .send()
            .await?;

        let line = check_status(response).await?.json().await?;

        Ok(line)
    }

    async fn update(
        &self,
        auth: &Credentials,
        product: ProductId,
        variation: VariationId,
        quantity: u32,
    ) -> Result<RemoteCartLine, CartError> {
        let body = MutateLineRequest {
            customer_id: auth.customer,
            product_id: product,
            product_variation_id: variation,
            quantity,
        };

        let response = self
            .authorized(self.http.put(self.url("/Cart/update")), auth)
            .json(&body)
            .send()
            .await?;

        let line = check_status(response).await?.json().await?;

        Ok(line)
    }

    async fn remove(&self, auth: &Credentials, line: LineId) -> Result<(), CartError> {
        let url = self.url(&format!("/Cart/remove/{line}"));

        let response = self.authorized(self.http.delete(url), auth).send().await?;

        check_status(response).await?;

        Ok(())
    }
}
