pub mod decision;
pub mod series;
pub mod state;
pub mod trade;

pub use decision::*;
pub use series::*;
pub use state::*;
pub use trade::*;
