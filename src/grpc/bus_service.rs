use std::pin::Pin;

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status};

use crate::bus::{MemoryBus, MessageBus};
use crate::proto::bus_service_server::BusService;
use crate::proto::{
    BusMessage as ProtoBusMessage, PublishRequest, PublishResponse, SubscribeRequest,
};

const STREAM_BUFFER: usize = 256;

type MessageStream =
    Pin<Box<dyn tokio_stream::Stream<Item = Result<ProtoBusMessage, Status>> + Send>>;

/// gRPC front end of the broker. Routing is delegated to a [`MemoryBus`].
pub struct BrokerService {
    bus: MemoryBus,
}

impl BrokerService {
    pub fn new(bus: MemoryBus) -> Self {
        Self { bus }
    }
}

#[tonic::async_trait]
impl BusService for BrokerService {
    type SubscribeStream = MessageStream;

    async fn publish(
        &self,
        request: Request<PublishRequest>,
    ) -> Result<Response<PublishResponse>, Status> {
        let req = request.into_inner();
        let delivered = self
            .bus
            .deliver(&req.topic, req.payload)
            .await
            .map_err(|e| Status::invalid_argument(e.to_string()))?;

        Ok(Response::new(PublishResponse {
            delivered: delivered as u32,
        }))
    }

    async fn subscribe(
        &self,
        request: Request<SubscribeRequest>,
    ) -> Result<Response<Self::SubscribeStream>, Status> {
        let req = request.into_inner();
        let client_id = req.client_id;
        let mut subscription = self
            .bus
            .subscribe(req.filters.clone())
            .await
            .map_err(|e| Status::invalid_argument(e.to_string()))?;

        tracing::info!(client_id = %client_id, filters = ?req.filters, "Client subscribed");

        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    msg = subscription.recv() => {
                        let Some(msg) = msg else { break };
                        let item = ProtoBusMessage {
                            topic: msg.topic,
                            payload: msg.payload,
                        };
                        if tx.send(Ok(item)).await.is_err() {
                            break;
                        }
                    }
                    _ = tx.closed() => break,
                }
            }
            tracing::info!(client_id = %client_id, "Client subscription closed");
        });

        let stream = ReceiverStream::new(rx);
        Ok(Response::new(Box::pin(stream) as Self::SubscribeStream))
    }
}
