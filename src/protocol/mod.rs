pub mod messages;
pub mod routing_table;
pub mod types;

pub use messages::*;
pub use routing_table::*;
pub use types::*;
