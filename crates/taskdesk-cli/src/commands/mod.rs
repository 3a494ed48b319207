pub mod common;
pub mod login;
pub mod sync;
pub mod tasks;
pub mod users;
