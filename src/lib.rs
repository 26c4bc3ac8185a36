pub mod bus;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod grpc;
pub mod machine;
pub mod observer;
pub mod protocol;
pub mod shutdown;
pub mod supervisor;

// Re-export generated protobuf types
pub mod proto {
    tonic::include_proto!("bus");
}
