mod binding;
mod customer;
mod license;
mod lifecycle;
mod magic_token;
mod webhook_log;

pub use binding::*;
pub use customer::*;
pub use license::*;
pub use lifecycle::*;
pub use magic_token::*;
pub use webhook_log::*;
