//! HTTP facade over the collaborator API.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde_json::Value;
use shared::{
    domain::{InvoiceId, TaskId},
    error::ApiError,
    protocol::{
        ActionRequest, ActionResponse, ExplainRequest, ExplainResponse, FeedbackAck,
        FeedbackList, FeedbackRequest, GenerateInvoiceQuery, GeneratedInvoice,
        IncomingInvoiceAck, PendingTask,
    },
};
use tracing::info;
use url::Url;

use crate::{actions::ActionTransport, error::ClientError};

/// Normalized API root, e.g. `http://127.0.0.1:8000/api/v1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiBase(Url);

impl ApiBase {
    pub fn parse(raw: &str) -> Result<Self, ClientError> {
        let trimmed = raw.trim().trim_end_matches('/');
        let url = Url::parse(trimmed)
            .map_err(|err| ClientError::InvalidBaseUrl(format!("{trimmed}: {err}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ClientError::InvalidBaseUrl(format!(
                "{trimmed}: scheme must be http or https"
            )));
        }
        if url.cannot_be_a_base() {
            return Err(ClientError::InvalidBaseUrl(format!(
                "{trimmed}: not a base url"
            )));
        }
        Ok(Self(url))
    }

    /// Appends percent-encoded path segments.
    pub fn join(&self, segments: &[&str]) -> Url {
        let mut url = self.0.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty();
            path.extend(segments);
        }
        url
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

#[derive(Debug, Clone)]
pub struct DashboardClient {
    http: Client,
    base: ApiBase,
}

impl DashboardClient {
    pub fn new(base: ApiBase) -> Self {
        Self::with_http(Client::new(), base)
    }

    pub fn with_http(http: Client, base: ApiBase) -> Self {
        Self { http, base }
    }

    pub fn base(&self) -> &ApiBase {
        &self.base
    }

    pub fn http(&self) -> &Client {
        &self.http
    }

    pub async fn list_tasks(&self, status: Option<&str>) -> Result<Vec<PendingTask>, ClientError> {
        let mut request = self.http.get(self.base.join(&["tasks"]));
        if let Some(status) = status {
            request = request.query(&[("status", status)]);
        }
        send_json(request).await
    }

    pub async fn list_pending_tasks(&self) -> Result<Vec<PendingTask>, ClientError> {
        self.list_tasks(Some("pending")).await
    }

    pub async fn fetch_invoice(&self, invoice_id: &InvoiceId) -> Result<Value, ClientError> {
        send_json(
            self.http
                .get(self.base.join(&["invoices", invoice_id.as_str()])),
        )
        .await
    }

    pub async fn fetch_explanation(
        &self,
        invoice_id: &InvoiceId,
    ) -> Result<ExplainResponse, ClientError> {
        send_json(
            self.http
                .get(self.base.join(&["invoices", invoice_id.as_str(), "explain"])),
        )
        .await
    }

    pub async fn request_explanation(
        &self,
        invoice_id: &InvoiceId,
        triggering_step: Option<Value>,
    ) -> Result<ExplainResponse, ClientError> {
        info!(invoice_id = %invoice_id, "api: requesting explanation");
        send_json(
            self.http
                .post(self.base.join(&["invoices", invoice_id.as_str(), "explain"]))
                .json(&ExplainRequest { triggering_step }),
        )
        .await
    }

    pub async fn list_feedback(&self, invoice_id: &InvoiceId) -> Result<FeedbackList, ClientError> {
        send_json(
            self.http
                .get(self.base.join(&["invoices", invoice_id.as_str(), "feedback"])),
        )
        .await
    }

    pub async fn post_feedback(
        &self,
        feedback: &FeedbackRequest,
    ) -> Result<FeedbackAck, ClientError> {
        info!(
            invoice_id = %feedback.invoice_id,
            step_id = feedback.step_id.as_deref().unwrap_or("-"),
            verdict = ?feedback.verdict,
            "api: posting feedback"
        );
        send_json(self.http.post(self.base.join(&["feedback"])).json(feedback)).await
    }

    pub async fn generate_invoice(
        &self,
        query: &GenerateInvoiceQuery,
    ) -> Result<GeneratedInvoice, ClientError> {
        send_json(
            self.http
                .post(self.base.join(&["dev", "generate-invoice"]))
                .query(query),
        )
        .await
    }

    pub async fn submit_invoice(&self, document: &Value) -> Result<IncomingInvoiceAck, ClientError> {
        let ack: IncomingInvoiceAck =
            send_json(self.http.post(self.base.join(&["incoming"])).json(document)).await?;
        info!(invoice_id = %ack.invoice_id, "api: invoice submitted");
        Ok(ack)
    }
}

#[async_trait]
impl ActionTransport for DashboardClient {
    async fn post_task_action(
        &self,
        task_id: &TaskId,
        request: &ActionRequest,
    ) -> Result<ActionResponse, ClientError> {
        send_json(
            self.http
                .post(self.base.join(&["tasks", task_id.as_str(), "action"]))
                .json(request),
        )
        .await
    }
}

async fn send_json<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, ClientError> {
    let response = ensure_success(request.send().await?).await?;
    Ok(response.json().await?)
}

/// Maps non-2xx responses to `ServerRejection`, reading the collaborator's error body.
pub(crate) async fn ensure_success(response: Response) -> Result<Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ClientError::ServerRejection {
        status: status.as_u16(),
        message: ApiError::from_body(&body),
    })
}

#[cfg(test)]
#[path = "tests/api_tests.rs"]
mod tests;
