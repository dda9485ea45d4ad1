pub mod facility;
pub mod reconcile;
pub mod region;
pub mod zone;
