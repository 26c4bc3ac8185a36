use async_trait::async_trait;
use tokio::sync::mpsc;
use tonic::transport::Channel;

use crate::bus::{validate_filter, BusMessage, MessageBus, Subscription};
use crate::error::Result;
use crate::proto::bus_service_client::BusServiceClient;
use crate::proto::{PublishRequest, SubscribeRequest};

const SUBSCRIPTION_BUFFER: usize = 1024;

/// [`MessageBus`] backed by a remote [`BrokerServer`](crate::grpc::BrokerServer).
#[derive(Debug, Clone)]
pub struct RemoteBus {
    client: BusServiceClient<Channel>,
    client_id: String,
}

impl RemoteBus {
    /// Connect to the broker. Fails if the broker is unreachable.
    pub async fn connect(endpoint: impl Into<String>, client_id: impl Into<String>) -> Result<Self> {
        let endpoint = endpoint.into();
        let client_id = client_id.into();
        let client = BusServiceClient::connect(endpoint.clone()).await?;
        tracing::info!(endpoint = %endpoint, client_id = %client_id, "Connected to bus broker");
        Ok(Self { client, client_id })
    }
}

#[async_trait]
impl MessageBus for RemoteBus {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        let mut client = self.client.clone();
        client
            .publish(PublishRequest {
                topic: topic.to_string(),
                payload,
            })
            .await?;
        Ok(())
    }

    async fn subscribe(&self, filters: Vec<String>) -> Result<Subscription> {
        for filter in &filters {
            validate_filter(filter)?;
        }

        let mut client = self.client.clone();
        let mut stream = client
            .subscribe(SubscribeRequest {
                filters,
                client_id: self.client_id.clone(),
            })
            .await?
            .into_inner();

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let client_id = self.client_id.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    next = stream.message() => match next {
                        Ok(Some(msg)) => {
                            if tx.send(BusMessage::new(msg.topic, msg.payload)).await.is_err() {
                                break;
                            }
                        }
                        Ok(None) => {
                            tracing::warn!(client_id = %client_id, "Broker closed subscription");
                            break;
                        }
                        Err(status) => {
                            tracing::error!(
                                client_id = %client_id,
                                error = %status,
                                "Subscription stream failed"
                            );
                            break;
                        }
                    },
                    _ = tx.closed() => break,
                }
            }
        });

        Ok(Subscription::new(rx))
    }
}
