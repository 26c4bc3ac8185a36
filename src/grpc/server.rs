use std::net::SocketAddr;

use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;

use crate::bus::MemoryBus;
use crate::grpc::bus_service::BrokerService;
use crate::proto::bus_service_server::BusServiceServer;

/// Message bus broker reachable over gRPC.
pub struct BrokerServer {
    bus: MemoryBus,
}

impl Default for BrokerServer {
    fn default() -> Self {
        Self::new()
    }
}

impl BrokerServer {
    pub fn new() -> Self {
        Self {
            bus: MemoryBus::new(),
        }
    }

    /// Handle to the routing core, for in-process publishers and observers.
    pub fn bus(&self) -> MemoryBus {
        self.bus.clone()
    }

    pub async fn run(
        self,
        addr: SocketAddr,
        shutdown: CancellationToken,
    ) -> Result<(), tonic::transport::Error> {
        tracing::info!(addr = %addr, "Starting bus broker");

        Server::builder()
            .add_service(BusServiceServer::new(BrokerService::new(self.bus)))
            .serve_with_shutdown(addr, async move { shutdown.cancelled().await })
            .await
    }

    /// Serve on an already bound listener (port 0 binds in tests).
    pub async fn run_with_listener(
        self,
        listener: TcpListener,
        shutdown: CancellationToken,
    ) -> Result<(), tonic::transport::Error> {
        if let Ok(addr) = listener.local_addr() {
            tracing::info!(addr = %addr, "Starting bus broker");
        }

        Server::builder()
            .add_service(BusServiceServer::new(BrokerService::new(self.bus)))
            .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async move {
                shutdown.cancelled().await
            })
            .await
    }
}
