//! Per-folder background loops: the upload-inactivity debounce and the
//! processing-convergence watch.

pub(crate) mod processing;
pub(crate) mod upload;
