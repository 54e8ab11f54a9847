//! Common utilities and shared interfaces

pub mod singleflight;
pub mod traits;
pub mod utils;

pub use singleflight::SingleFlight;
pub use traits::RegistryProvider;
pub use utils::{FormatUtils, TimeUtils};
