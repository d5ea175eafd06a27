pub mod tournament;
pub mod trade;

pub use tournament::*;
pub use trade::*;
