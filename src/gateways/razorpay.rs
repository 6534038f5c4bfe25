use crate::config::AppConfig;
use crate::gateways::{
    CreateOrderRequest, CreateRefundRequest, CreateTransferRequest, GatewayError, GatewayOrder, GatewayPayment,
    GatewayRefund, GatewayReversal, GatewayTransfer, PayoutGateway, ReverseTransferRequest,
};
use serde::de::DeserializeOwned;
use serde_json::json;

const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

pub struct RazorpayGateway {
    pub base_url: String,
    pub key_id: String,
    pub key_secret: String,
    pub timeout_ms: u64,
    pub client: reqwest::Client,
}

impl RazorpayGateway {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            base_url: cfg.razorpay_base_url.trim_end_matches('/').to_string(),
            key_id: cfg.razorpay_key_id.clone(),
            key_secret: cfg.razorpay_key_secret.clone(),
            timeout_ms: cfg.gateway_timeout_ms,
            client: reqwest::Client::new(),
        }
    }

    async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        body: serde_json::Value,
        idempotency_key: Option<&str>,
    ) -> Result<T, GatewayError> {
        let mut req = self.client.post(format!("{}{}", self.base_url, path)).json(&body);
        if let Some(key) = idempotency_key {
            req = req.header(IDEMPOTENCY_HEADER, key);
        }
        self.send(req).await
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, GatewayError> {
        let req = self.client.get(format!("{}{}", self.base_url, path));
        self.send(req).await
    }

    async fn send<T: DeserializeOwned>(&self, req: reqwest::RequestBuilder) -> Result<T, GatewayError> {
        let resp = req
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .timeout(std::time::Duration::from_millis(self.timeout_ms))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GatewayError::Timeout
                } else {
                    GatewayError::Network(e.to_string())
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(GatewayError::Http {
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }

        resp.json::<T>()
            .await
            .map_err(|e| GatewayError::Malformed(e.to_string()))
    }
}

#[async_trait::async_trait]
impl PayoutGateway for RazorpayGateway {
    fn name(&self) -> &'static str {
        "razorpay"
    }

    async fn create_order(&self, request: &CreateOrderRequest) -> Result<GatewayOrder, GatewayError> {
        self.post(
            "/v1/orders",
            json!({
                "amount": request.amount,
                "currency": request.currency,
                "receipt": request.receipt,
                "notes": request.notes,
                "payment_capture": 1
            }),
            None,
        )
        .await
    }

    async fn fetch_payment(&self, payment_id: &str) -> Result<GatewayPayment, GatewayError> {
        self.get(&format!("/v1/payments/{payment_id}")).await
    }

    async fn create_transfer(&self, request: &CreateTransferRequest) -> Result<GatewayTransfer, GatewayError> {
        let mut transfer = json!({
            "account": request.linked_account_id,
            "amount": request.amount,
            "currency": request.currency,
            "notes": request.notes,
        });
        if let Some(until) = request.on_hold_until {
            transfer["on_hold"] = json!(1);
            transfer["on_hold_until"] = json!(until);
        }

        // The transfers endpoint answers with a collection even for one item.
        let created: TransferCollection = self
            .post(
                &format!("/v1/payments/{}/transfers", request.payment_id),
                json!({ "transfers": [transfer] }),
                Some(&request.idempotency_key),
            )
            .await?;

        created
            .items
            .into_iter()
            .next()
            .ok_or_else(|| GatewayError::Malformed("transfer response had no items".to_string()))
    }

    async fn reverse_transfer(&self, request: &ReverseTransferRequest) -> Result<GatewayReversal, GatewayError> {
        self.post(
            &format!("/v1/transfers/{}/reversals", request.gateway_transfer_id),
            json!({ "amount": request.amount }),
            Some(&request.idempotency_key),
        )
        .await
    }

    async fn create_refund(&self, request: &CreateRefundRequest) -> Result<GatewayRefund, GatewayError> {
        self.post(
            &format!("/v1/payments/{}/refund", request.payment_id),
            json!({
                "amount": request.amount,
                "notes": request.notes,
            }),
            Some(&request.idempotency_key),
        )
        .await
    }
}

#[derive(serde::Deserialize)]
struct TransferCollection {
    items: Vec<GatewayTransfer>,
}
