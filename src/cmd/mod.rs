//! CLI command implementations.
//!
//! | Module  | Commands handled  |
//! |---------|-------------------|
//! | `serve` | `Serve`, `Init`   |

pub mod serve;

pub use serve::{ServeOverrides, cmd_init, cmd_serve};
