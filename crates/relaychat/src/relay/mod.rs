mod error;
mod identity;
mod server;

pub use error::ApiError;
pub use identity::{ANONYMOUS, CLIENT_ID_HEADER, ClientIdentity};
pub use server::{AppState, ChatRequest, RelayServer, create_router};
