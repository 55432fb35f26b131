pub mod connection;
pub mod l2cap;
pub mod resolver;
pub mod scanner;
pub mod sdp;

pub use connection::RfcommConnection;
pub use resolver::{ServiceDiscovery, ServiceEndpoint, ServiceMatch, ServiceResolver};
pub use scanner::{BluetoothDevice, BluezDirectory, DeviceDirectory};
pub use sdp::SdpDiscovery;
