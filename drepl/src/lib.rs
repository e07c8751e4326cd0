pub use drepl_graph::*;
#[cfg(feature = "files")]
pub use drepl_file as file;
pub use {
    drepl_dtype as dtype, drepl_error as error, drepl_io as io, drepl_metrics as metrics,
};
