//! Typed bindings for the transactions resource and the derived-view
//! endpoints. Nothing here keeps state besides the shared [`Session`].

use std::{
    future::Future,
    sync::{Arc, PoisonError, RwLock},
};

use api_types::{
    analytics::DerivedView,
    transaction::{
        Transaction, TransactionId, TransactionList, TransactionNew, TransactionPage,
        TransactionPatch,
    },
};
use reqwest::{Method, RequestBuilder, Response, Url};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::ClientError;

/// The backend as seen by the cache and the mutation coordinator.
pub trait LedgerApi: Clone + Send + Sync + 'static {
    fn list_transactions(
        &self,
        params: &TransactionList,
    ) -> impl Future<Output = Result<TransactionPage, ClientError>> + Send;

    fn get_transaction(
        &self,
        id: TransactionId,
    ) -> impl Future<Output = Result<Transaction, ClientError>> + Send;

    fn create_transaction(
        &self,
        payload: &TransactionNew,
    ) -> impl Future<Output = Result<Transaction, ClientError>> + Send;

    fn update_transaction(
        &self,
        id: TransactionId,
        patch: &TransactionPatch,
    ) -> impl Future<Output = Result<Transaction, ClientError>> + Send;

    fn delete_transaction(
        &self,
        id: TransactionId,
    ) -> impl Future<Output = Result<(), ClientError>> + Send;

    fn derived_view(
        &self,
        view: DerivedView,
    ) -> impl Future<Output = Result<Value, ClientError>> + Send;
}

/// Bearer credential shared by every clone of the client.
///
/// A `401` from any endpoint resets it: the whole session is considered gone.
#[derive(Debug, Clone, Default)]
pub struct Session {
    token: Arc<RwLock<Option<String>>>,
}

impl Session {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Arc::new(RwLock::new(Some(token.into()))),
        }
    }

    pub fn token(&self) -> Option<String> {
        self.token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_active(&self) -> bool {
        self.token().is_some()
    }

    pub fn sign_in(&self, token: impl Into<String>) {
        *self.token.write().unwrap_or_else(PoisonError::into_inner) = Some(token.into());
    }

    pub fn reset(&self) {
        *self.token.write().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

#[derive(Debug, Clone)]
pub struct HttpClient {
    base_url: String,
    http: reqwest::Client,
    session: Session,
}

impl HttpClient {
    pub fn new(base_url: &str, session: Session) -> Result<Self, ClientError> {
        Url::parse(base_url)
            .map_err(|err| ClientError::Config(format!("invalid base_url: {err}")))?;
        Ok(Self {
            base_url: base_url.to_string(),
            http: reqwest::Client::new(),
            session,
        })
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let req = self.http.request(method, self.url(path));
        match self.session.token() {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn send(&self, req: RequestBuilder) -> Result<Response, ClientError> {
        let res = req.send().await?;
        let status = res.status();
        if status.is_success() {
            return Ok(res);
        }

        if status.as_u16() == 401 {
            tracing::warn!("request rejected as unauthenticated, resetting session");
            self.session.reset();
        }

        let message = res
            .json::<Value>()
            .await
            .ok()
            .and_then(|body| error_message(&body))
            .unwrap_or_else(|| "server error".to_string());
        Err(ClientError::from_status(status.as_u16(), message))
    }

    async fn send_json<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T, ClientError> {
        let res = self.send(req).await?;
        Ok(res.json::<T>().await?)
    }
}

impl LedgerApi for HttpClient {
    async fn list_transactions(
        &self,
        params: &TransactionList,
    ) -> Result<TransactionPage, ClientError> {
        let req = self
            .request(Method::GET, "transactions")
            .query(&params.params());
        self.send_json(req).await
    }

    async fn get_transaction(&self, id: TransactionId) -> Result<Transaction, ClientError> {
        let req = self.request(Method::GET, &format!("transactions/{id}"));
        self.send_json(req).await
    }

    async fn create_transaction(
        &self,
        payload: &TransactionNew,
    ) -> Result<Transaction, ClientError> {
        let req = self.request(Method::POST, "transactions").json(payload);
        self.send_json(req).await
    }

    async fn update_transaction(
        &self,
        id: TransactionId,
        patch: &TransactionPatch,
    ) -> Result<Transaction, ClientError> {
        let req = self
            .request(Method::PATCH, &format!("transactions/{id}"))
            .json(patch);
        self.send_json(req).await
    }

    async fn delete_transaction(&self, id: TransactionId) -> Result<(), ClientError> {
        let req = self.request(Method::DELETE, &format!("transactions/{id}"));
        self.send(req).await?;
        Ok(())
    }

    async fn derived_view(&self, view: DerivedView) -> Result<Value, ClientError> {
        let req = self.request(Method::GET, view.path());
        self.send_json(req).await
    }
}

/// Pulls a human readable message out of an error body. Both `{"error": ..}`
/// and `{"detail": ..}` shapes are accepted, including a list of validation
/// issues where the first `msg` wins.
fn error_message(body: &Value) -> Option<String> {
    ["error", "detail", "message"]
        .into_iter()
        .find_map(|field| match body.get(field)? {
            Value::String(message) => Some(message.clone()),
            Value::Array(issues) => issues
                .first()?
                .get("msg")?
                .as_str()
                .map(str::to_string),
            _ => None,
        })
}
