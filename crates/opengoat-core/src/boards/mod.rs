//! Shared task board: sqlite-backed boards and tasks with manager/owner
//! enforcement on creation, assignment, and status transitions.

mod model;
mod store;

pub use model::{
    Board, CreateTaskOptions, ListBoardsOptions, ListTasksOptions, Task, TaskNote, TaskStatus,
    DEFAULT_PROJECT,
};
pub use store::BoardStore;
