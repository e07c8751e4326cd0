//! Dataset description documents and byte-range access to replicated views.
//!
//! A [`Description`] names a dataset's variables, the views that lay them out and the replicas
//! that store the materialized views. [`DreplOpenOptions`] validates a description, resolves
//! every view's layouts and builds the block graph connecting them; the resulting
//! [`DreplFile`] hands out one [`ViewFile`] per view.
//!
//! ```no_run
//! use drepl_file::DreplOpenOptions;
//!
//! let file = DreplOpenOptions::new().open_path("dataset.json")?;
//! let aos = file.view("aos")?;
//! aos.write(0, &7i32.to_le_bytes())?;
//! file.flush()?;
//! # Ok::<(), drepl_error::DreplError>(())
//! ```

pub use description::*;
pub use open::*;
pub use view_file::*;

mod description;
mod open;
mod resolve;
mod view_file;
