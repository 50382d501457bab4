use async_trait::async_trait;
use thiserror::Error;
use web_push::{
    ContentEncoding, IsahcWebPushClient, SubscriptionInfo, VapidSignature, VapidSignatureBuilder,
    WebPushClient, WebPushError, WebPushMessageBuilder, URL_SAFE_NO_PAD,
};

use crate::config::VapidConfig;
use crate::types::PushSubscriptionPayload;

const PUSH_TTL_SECONDS: u32 = 24 * 60 * 60;

#[derive(Debug, Error)]
pub enum PushError {
    #[error("push notifications are not configured")]
    NotConfigured,

    #[error("push endpoint is gone")]
    Gone,

    #[error("invalid push payload: {0}")]
    Payload(String),

    #[error("push delivery failed: {0}")]
    Delivery(String),
}

#[async_trait]
pub trait PushSender: Send + Sync {
    async fn send(
        &self,
        subscription: &PushSubscriptionPayload,
        payload: &[u8],
    ) -> Result<(), PushError>;
}

/// VAPID-signed aes128gcm web push.
pub struct WebPushSender {
    vapid: VapidConfig,
    client: IsahcWebPushClient,
}

impl WebPushSender {
    pub fn new(vapid: VapidConfig) -> Result<Self, PushError> {
        let client =
            IsahcWebPushClient::new().map_err(|err| PushError::Delivery(err.to_string()))?;
        Ok(Self { vapid, client })
    }
}

fn map_web_push_error(err: WebPushError) -> PushError {
    if matches!(
        err,
        WebPushError::EndpointNotValid { .. } | WebPushError::EndpointNotFound { .. }
    ) {
        PushError::Gone
    } else {
        PushError::Delivery(err.to_string())
    }
}

/// Keys are URL-safe base64 without padding, as VAPID key generators emit them.
fn sign(vapid: &VapidConfig, info: &SubscriptionInfo) -> Result<VapidSignature, PushError> {
    let mut signature = VapidSignatureBuilder::from_base64(&vapid.private_key, URL_SAFE_NO_PAD, info)
        .map_err(|err| PushError::Payload(format!("vapid key: {err}")))?;
    signature.add_claim("sub", vapid.subject.as_str());
    signature
        .build()
        .map_err(|err| PushError::Payload(format!("vapid signature: {err}")))
}

#[async_trait]
impl PushSender for WebPushSender {
    async fn send(
        &self,
        subscription: &PushSubscriptionPayload,
        payload: &[u8],
    ) -> Result<(), PushError> {
        let info = SubscriptionInfo::new(
            subscription.endpoint.clone(),
            subscription.keys.p256dh.clone(),
            subscription.keys.auth.clone(),
        );

        let signature = sign(&self.vapid, &info)?;
        let mut builder = WebPushMessageBuilder::new(&info);
        builder.set_payload(ContentEncoding::Aes128Gcm, payload);
        builder.set_ttl(PUSH_TTL_SECONDS);
        builder.set_vapid_signature(signature);
        let message = builder
            .build()
            .map_err(|err| PushError::Payload(err.to_string()))?;

        self.client.send(message).await.map_err(map_web_push_error)
    }
}
