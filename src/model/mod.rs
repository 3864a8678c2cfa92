pub mod entity;
pub mod session;
pub mod tally;

pub use entity::*;
pub use session::*;
pub use tally::{Tally, TallyAction, TallyConfig};
