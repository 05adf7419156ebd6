//! CLI command implementations.
//!
//! | Module   | Commands handled |
//! |----------|------------------|
//! | `serve`  | `Serve`          |
//! | `run`    | `Run`            |
//! | `config` | `Config`         |

pub mod config;
pub mod run;
pub mod serve;

pub use config::cmd_config;
pub use run::{RunArgs, cmd_run};
pub use serve::cmd_serve;
