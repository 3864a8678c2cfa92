pub mod cookie_session;
pub mod memory;
pub mod postgres;
pub mod traits;

pub use cookie_session::*;
pub use memory::*;
pub use postgres::*;
pub use traits::*;
