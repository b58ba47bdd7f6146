//! # Dynamic-Memory
//!
//! A compacting arena with reference-counted, retargetable handles.
//!
//! Values are stored contiguously in a [`Repository`]. Clients hold
//! [`Handle`]s, which point at slots in a separate handle table; a slot points
//! at (at most) one value. The extra level of indirection lets a whole group
//! of handles be redirected to a new value at once, which is what structural
//! rewrites of trees and graphs need.
//!
//! ## Features
//!
//! - **Deterministic reclamation**: slots and values are disposed as soon as
//!   their last handle drops, without relying on `Rc` for the values
//! - **Always compact**: the arena and the handle table never have holes
//! - **Retargeting**: [`Handle::retarget`] rebinds every copy of a slot
//! - **Value-based equality**: equal values compare equal across slots
//!
//! ## Quick Start
//!
//! ```rust
//! use dynamic_memory::Repository;
//!
//! let repo: Repository<String> = Repository::new();
//! let handle = repo.create("hello".to_string());
//! println!("{}", *handle.get().unwrap());
//! drop(handle); // Freed when the last handle goes away
//! assert!(repo.is_empty());
//! ```
//!
//! ## Borrowing
//!
//! A value returned by [`Handle::get`] borrows the whole repository. While it
//! is alive, [`Repository::create`] and [`Repository::create_null`] panic and
//! [`Handle::retarget`] returns [`RepositoryError::Borrowed`]. Clone the child
//! handles you need out of a node and drop the borrow before allocating.
//!
//! ## Threading
//!
//! Repositories and handles are single-threaded (`!Send`, `!Sync`). Use one
//! repository per thread, or wrap every operation in an external lock.

mod config;
mod error;
mod handle;
mod index;
mod repository;
mod store;

pub use config::RepositoryConfig;
pub use error::RepositoryError;
pub use handle::Handle;
pub use index::{SlotIndex, ValueIndex};
pub use repository::{Repository, Resolved};
