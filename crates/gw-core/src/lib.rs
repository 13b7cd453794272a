pub mod arbiter;
pub mod bucket;
pub mod config;
pub mod conn;
pub mod error;
pub mod online;
pub mod push;
pub mod room;
pub mod subscription;

pub use arbiter::clients_to_kick;
pub use bucket::{Bucket, BucketManager, UserPlatforms};
pub use config::GatewayConfig;
pub use conn::GatewayConnection;
pub use error::CoreError;
pub use online::{collect_renewal_snapshot, OnlineStatusBatcher, UserStateUpdate};
pub use room::Room;
pub use subscription::Subscription;
