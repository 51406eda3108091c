//! CLI command implementations.
//!
//! | Module      | Commands handled |
//! |-------------|------------------|
//! | `project`   | `Init`           |
//! | `serve`     | `Serve`          |
//! | `templates` | `Templates`      |
//! | `config`    | `Config`         |

pub mod config;
pub mod project;
pub mod serve;
pub mod templates;

pub use config::cmd_config;
pub use project::cmd_init;
pub use serve::{ServeOverrides, cmd_serve};
pub use templates::cmd_templates;
