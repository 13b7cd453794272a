pub mod fake_user_service;
pub mod mock_ws_client;

pub use fake_user_service::FakeUserService;
pub use mock_ws_client::{MockWsClient, WireFrame};
