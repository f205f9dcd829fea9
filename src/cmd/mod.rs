//! CLI command implementations.
//!
//! | Module   | Commands handled               |
//! |----------|--------------------------------|
//! | `serve`  | `Serve`                        |
//! | `init`   | `Init`                         |
//! | `seed`   | `Seed`                         |
//! | `users`  | `CreateUser`, `HashPassword`   |

pub mod init;
pub mod seed;
pub mod serve;
pub mod users;

pub use init::cmd_init;
pub use seed::cmd_seed;
pub use serve::cmd_serve;
pub use users::{cmd_create_user, cmd_hash_password};
