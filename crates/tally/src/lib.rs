//!The tally daemon: loads configured inputs and outputs, binds every output to every input and
//!keeps the config file in sync.

//settings and the config store
pub mod config;

//io containers and the manager
pub mod manager;

//io types compiled into this build
pub mod registry;
