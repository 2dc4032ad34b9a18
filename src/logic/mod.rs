pub mod assignment;
pub mod error;
pub mod reconcile;
pub mod roster;
pub mod validate;

pub use assignment::*;
pub use error::*;
pub use reconcile::*;
pub use validate::*;
