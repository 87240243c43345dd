pub mod gateway;
pub mod http;
pub mod local;

pub use gateway::{CommandGateway, GatewayError};
pub use http::HttpGateway;
pub use local::LocalGateway;
