//! Moonlet virtual machine: register bytecode interpreter with coroutines,
//! metatables, protected calls and a stepped driver.

pub mod arith;
pub mod callinfo;
pub mod coerce;
pub mod compare;
pub mod config;
pub mod dispatch;
pub mod driver;
pub mod error;
pub mod metamethod;
pub mod native;
pub mod varinfo;
pub mod vm;

pub use config::VmConfig;
pub use driver::{Driver, DriverError, DriverState, StepResult};
pub use error::{LuaError, RuntimeError, RuntimeErrorKind};
pub use native::{NativeContext, NativeFn, NativeOutcome};
pub use vm::{ThreadStatus, Vm};
