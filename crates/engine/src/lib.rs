pub mod collateral;
pub mod rate;

pub use collateral::{Collateral, CollateralState};
pub use rate::{PeggedRate, ReferenceRate, ShareAccountingRate, SharedRate};
