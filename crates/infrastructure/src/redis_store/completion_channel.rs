use std::pin::Pin;

use async_trait::async_trait;
use cimm_core::models::{CompletionNotice, EndpointKey};
use cimm_core::traits::CompletionChannel;
use cimm_core::{CimmError, CimmResult};
use futures::{FutureExt, Stream, StreamExt};
use tracing::warn;

type MessageStream = Pin<Box<dyn Stream<Item = redis::Msg> + Send>>;

/// 端点完成通道的订阅
pub struct RedisCompletionChannel {
    endpoint: EndpointKey,
    messages: MessageStream,
}

impl RedisCompletionChannel {
    pub async fn subscribe(
        client: &redis::Client,
        endpoint: EndpointKey,
        channel: &str,
    ) -> CimmResult<Self> {
        let mut pubsub = client.get_async_pubsub().await?;
        pubsub.subscribe(channel).await?;
        Ok(Self {
            endpoint,
            messages: Box::pin(pubsub.into_on_message()),
        })
    }
}

#[async_trait]
impl CompletionChannel for RedisCompletionChannel {
    async fn try_next(&mut self) -> CimmResult<Option<CompletionNotice>> {
        loop {
            match self.messages.next().now_or_never() {
                None => return Ok(None),
                Some(None) => {
                    return Err(CimmError::StateStore(format!(
                        "端点 {} 的完成通道已断开",
                        self.endpoint
                    )))
                }
                Some(Some(msg)) => {
                    let payload: Vec<u8> = msg.get_payload()?;
                    match serde_json::from_slice::<CompletionNotice>(&payload) {
                        Ok(notice) => return Ok(Some(notice)),
                        Err(e) => warn!("端点 {} 收到无法解析的完成通知: {}", self.endpoint, e),
                    }
                }
            }
        }
    }
}
