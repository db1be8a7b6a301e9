//! Collaborative whiteboard window manager: shared window registry, per-window
//! synchronized storage, and view/camera arbitration over a replicated
//! attribute tree.
//!
//! The replicated tree itself (transport, conflict resolution) and the
//! rendering surfaces belong to the host; this crate reaches them through
//! the [`tree::AttributeTree`] and [`view::Displayer`] traits. Every
//! participant runs its own [`session::Session`] against the same tree.
//!
//! ## Module layout
//!
//! | Module | Role |
//! |--------|------|
//! | [`session`] | One participant: opens/closes windows, resyncs views |
//! | [`context`] | Per-window facade handed to application code |
//! | [`storage`] | Diffable key-value store under a window's namespace |
//! | [`view_manager`] | Writable/freedom arbitration and camera replication |
//! | [`delegate`] | Typed accessors over the tree's fixed fields |
//! | [`room`] | Participant identity, write gate, safe writes |
//! | [`tree`] | Attribute tree contract and path helpers |
//! | [`memory`] | In-process attribute tree with deferred acknowledgments |
//! | [`view`] | Host view contract and a headless implementation |
//! | [`camera`] | Camera/size types and the local camera cache |
//! | [`schedule`] | Last-request-wins deferred tasks |
//! | [`event`] | Listener registry for diff and mode events |
//! | [`config`] | Timing knobs from the environment |
//! | [`consts`] | Tree field names, namespaces, default timings |

pub mod camera;
pub mod config;
pub mod consts;
pub mod context;
pub mod delegate;
pub mod event;
pub mod memory;
pub mod room;
pub mod schedule;
pub mod session;
pub mod storage;
pub mod tree;
pub mod view;
pub mod view_manager;

#[cfg(test)]
mod test_support;
