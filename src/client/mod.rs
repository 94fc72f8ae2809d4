mod gateway_client;

pub use gateway_client::{GatewayClient, GatewayClientBuilder};
