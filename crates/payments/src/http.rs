//! JSON POST helper shared by the provider adapters.

use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::GatewayError;

pub(crate) fn client(timeout: Duration) -> Result<reqwest::Client, GatewayError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| GatewayError::Config(e.to_string()))
}

/// POSTs `body` as JSON and decodes the JSON answer.
///
/// 5xx statuses become [`GatewayError::Provider`] so they are retried. Other
/// statuses are decoded when possible, since providers report business
/// failures in the body.
pub(crate) async fn post_json<B, R>(
    client: &reqwest::Client,
    url: &str,
    body: &B,
) -> Result<R, GatewayError>
where
    B: Serialize + ?Sized,
    R: DeserializeOwned,
{
    let response = client.post(url).json(body).send().await?;
    let status = response.status();
    let text = response.text().await?;

    if status.is_server_error() {
        return Err(GatewayError::Provider {
            status: status.as_u16(),
            message: text,
        });
    }

    match serde_json::from_str::<R>(&text) {
        Ok(decoded) => Ok(decoded),
        Err(e) if status.is_success() => Err(GatewayError::Decode(e.to_string())),
        Err(_) => Err(GatewayError::Provider {
            status: status.as_u16(),
            message: text,
        }),
    }
}
