pub mod case;
pub mod compare;
pub mod config;
pub mod dump;
pub mod logscan;
pub mod naming;
pub mod orchestrator;
pub mod reference;
pub mod sink;
pub mod state;
pub mod toolchain;
