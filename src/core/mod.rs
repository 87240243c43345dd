/// Connection lifecycle core
///
/// UI-independent logic shared by every frontend:
/// - The connection state machine and request correlation
/// - The event loop that owns it and drives its timers
/// - The command/snapshot message types exchanged with the presentation layer
/// - Settings persistence
pub mod bus;
pub mod controller;
pub mod persistence;
pub mod runtime;
pub mod task_manager;

pub use bus::{ControllerCommand, ControllerSnapshot};
pub use controller::{ConnectionController, ConnectionState, ControllerError, ControllerTimings};
pub use runtime::{spawn_controller, ControllerHandle};
