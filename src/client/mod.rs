use std::time::Duration;

use async_trait::async_trait;
use hyper::header::{AUTHORIZATION, CONTENT_TYPE};
use hyper::{Body as HyperBody, Client, Method, Request, StatusCode, Uri};
use hyper_tls::HttpsConnector;
use serde::Serialize;
use tokio::time::timeout;
use url::Url;

use crate::error::{BenchResult, TransportError};
use crate::models::scenario::{ConfirmUnit, RequestUnit};

pub type HttpsClient = Client<HttpsConnector<hyper::client::HttpConnector>>;

const INVENTORY_PATH: &str = "api/v1/stores/inventory/";
const ADMIN_PATH: &str = "api/v1/stores/admin/hotpath/";

/// The inventory service as seen by the harness.
///
/// Every call returns the raw status or a [`TransportError`]; interpretation
/// is left to the classifier.
#[async_trait]
pub trait InventoryApi: Send + Sync + 'static {
    async fn reserve(&self, unit: &RequestUnit) -> Result<StatusCode, TransportError>;

    async fn confirm(&self, unit: &ConfirmUnit) -> Result<StatusCode, TransportError>;

    async fn seed(
        &self,
        menu_id: &str,
        available: u64,
        reserved: u64,
    ) -> Result<StatusCode, TransportError>;

    async fn toggle_hot_path(&self, menu_id: &str, on: bool)
        -> Result<StatusCode, TransportError>;

    async fn ping(&self) -> Result<StatusCode, TransportError>;
}

#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub base_url: String,
    pub auth_token: Option<String>,
    pub timeout: Duration,
}

pub struct InventoryClient {
    client: HttpsClient,
    inventory: Url,
    admin: Url,
    auth_token: Option<String>,
    timeout: Duration,
}

impl InventoryClient {
    pub fn new(options: ClientOptions) -> BenchResult<Self> {
        let https = HttpsConnector::new();
        let client: HttpsClient = Client::builder().build::<_, HyperBody>(https);

        let mut base = Url::parse(&options.base_url)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        Ok(Self {
            client,
            inventory: base.join(INVENTORY_PATH)?,
            admin: base.join(ADMIN_PATH)?,
            auth_token: options.auth_token.filter(|t| !t.is_empty()),
            timeout: options.timeout,
        })
    }

    fn endpoint(base: &Url, path: &str) -> Result<Uri, TransportError> {
        let url = base
            .join(path)
            .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;
        url.as_str()
            .parse::<Uri>()
            .map_err(|e| TransportError::InvalidRequest(e.to_string()))
    }

    async fn post<T: Serialize + ?Sized>(
        &self,
        uri: Uri,
        body: Option<&T>,
    ) -> Result<StatusCode, TransportError> {
        let body = match body {
            Some(payload) => {
                let json = serde_json::to_string(payload)
                    .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;
                HyperBody::from(json)
            }
            None => HyperBody::empty(),
        };
        self.send(Method::POST, uri, body).await
    }

    async fn send(
        &self,
        method: Method,
        uri: Uri,
        body: HyperBody,
    ) -> Result<StatusCode, TransportError> {
        let mut req_builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(CONTENT_TYPE, "application/json");

        if let Some(token) = &self.auth_token {
            req_builder = req_builder.header(AUTHORIZATION, format!("Bearer {}", token));
        }

        let request = req_builder
            .body(body)
            .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;

        match timeout(self.timeout, self.client.request(request)).await {
            Ok(Ok(resp)) => Ok(resp.status()),
            Ok(Err(e)) => Err(if e.is_connect() {
                TransportError::Connect
            } else if e.is_timeout() {
                TransportError::Timeout
            } else if e.is_closed() {
                TransportError::Closed
            } else {
                TransportError::Other(e.to_string())
            }),
            Err(_) => Err(TransportError::Timeout),
        }
    }
}

#[async_trait]
impl InventoryApi for InventoryClient {
    async fn reserve(&self, unit: &RequestUnit) -> Result<StatusCode, TransportError> {
        let uri = Self::endpoint(&self.inventory, "reserve")?;
        self.post(uri, Some(unit)).await
    }

    async fn confirm(&self, unit: &ConfirmUnit) -> Result<StatusCode, TransportError> {
        let uri = Self::endpoint(&self.inventory, "confirm")?;
        self.post(uri, Some(unit)).await
    }

    async fn seed(
        &self,
        menu_id: &str,
        available: u64,
        reserved: u64,
    ) -> Result<StatusCode, TransportError> {
        let path = format!("seed-direct/{menu_id}?available={available}&reserved={reserved}");
        let uri = Self::endpoint(&self.admin, &path)?;
        self.post::<()>(uri, None).await
    }

    async fn toggle_hot_path(
        &self,
        menu_id: &str,
        on: bool,
    ) -> Result<StatusCode, TransportError> {
        let state = if on { "on" } else { "off" };
        let uri = Self::endpoint(&self.admin, &format!("toggle/{menu_id}/{state}"))?;
        self.post::<()>(uri, None).await
    }

    async fn ping(&self) -> Result<StatusCode, TransportError> {
        let uri = Self::endpoint(&self.admin, "diag/ping")?;
        self.send(Method::GET, uri, HyperBody::empty()).await
    }
}
