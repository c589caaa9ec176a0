pub mod shadows;
pub mod telemetry;
pub mod topics;

pub use shadows::*;
pub use telemetry::*;
