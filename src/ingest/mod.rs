//! Reading raw trip files into typed row batches and mapping their columns
//! onto the canonical schema.

pub mod format_detection;
pub mod normalizer;
pub mod reader;
pub mod schema;

pub use format_detection::{SourceFormat, detect_format};
pub use normalizer::{Normalizer, with_lineage};
pub use reader::{BatchStream, ReaderOptions, open_batches};
