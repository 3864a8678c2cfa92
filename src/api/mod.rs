pub mod handlers;
pub mod request;
pub mod routes;
pub mod session;
pub mod state;

pub use handlers::*;
pub use routes::*;
pub use session::SessionBinder;
pub use state::*;
