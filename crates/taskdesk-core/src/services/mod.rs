//! Client-facing services built on the sync engine.

mod task_desk;

pub use task_desk::{NewTask, NewUser, TaskDesk, TaskFilter};
