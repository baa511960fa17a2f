mod paddle;

pub use paddle::*;
