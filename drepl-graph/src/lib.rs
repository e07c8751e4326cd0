//! The block graph: one dataset exposed through several byte layouts.
//!
//! Each [`View`] describes the dataset's variables as a run of top-level [`Block`] trees. A
//! [`GraphBuilder`] connects the trees of one variable across views, and the resulting
//! [`BlockGraph`] moves bytes between them: writes through any view are replicated to every
//! materialized view, and views without storage of their own are synthesized on read from
//! their default view.
//!
//! Differences in array shape and element order between views are reconciled by per-dimension
//! [`AffineMap`]s, derived from each view's declared index correspondence.

pub use affine::*;
pub use block::*;
pub use builder::*;
pub use engine::*;
pub use expr::*;
pub use graph::*;
pub use layout::*;
pub use options::*;
pub use order::*;
pub use view::*;

mod affine;
mod block;
mod builder;
mod engine;
pub mod export;
mod expr;
mod graph;
mod layout;
mod options;
mod order;
mod view;
