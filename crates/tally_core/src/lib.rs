//!This is the core library for the tally daemon. All device crates depend on this one.
//!
//!It holds the tally addressing scheme, the filters used to match tallies, the input/output
//!capability traits, the namespace registry, and the engine that binds outputs to inputs and
//!merges their colors.

//error types
pub mod error;

//keys, lamp types and colors
pub mod common;

//live tally state and the events inputs publish
pub mod tally;

//single and multi tally filters
pub mod config;

//input and output traits
pub mod baseio;

//output to input binding
pub mod binding;

//namespace -> factory registry
pub mod registry;

//in-memory io objects for tests
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use baseio::{BaseIo, Input, IoCore, IoRecord, Output};
pub use binding::{OutputBindings, TallyRef};
pub use common::{TallyColor, TallyKey, TallyType, BROADCAST};
pub use config::{MatchTarget, MultiTallyConfig, SingleTallyConfig, TallyConfig};
pub use error::{OptionError, TallyError};
pub use registry::{IoKind, IoRegistry};
pub use tally::{ChangedProps, InputEvent, Screen, Tally, TallyProp, TallyTable};
