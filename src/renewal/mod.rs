pub mod coordinator;
pub mod single_flight;

pub use coordinator::RenewalCoordinator;
pub use single_flight::SingleFlight;
