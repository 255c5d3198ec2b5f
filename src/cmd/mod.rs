//! CLI command handlers, one module per subcommand group.
//!
//! | Module   | Commands          |
//! |----------|-------------------|
//! | `serve`  | `Serve`, `Init`   |
//! | `filter` | `Filter`          |
//! | `config` | `Config`          |

pub mod config;
pub mod filter;
pub mod serve;

pub use config::cmd_config;
pub use filter::cmd_filter;
pub use serve::{cmd_init, cmd_serve};
