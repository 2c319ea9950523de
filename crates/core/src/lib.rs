pub mod codes;
pub mod events;
pub mod models;
pub mod traits;

pub use codes::*;
pub use events::*;
pub use models::*;
pub use traits::*;
