pub mod applier;
pub mod codec;
pub mod computer;
pub mod log_builder;
pub mod oplog;

pub use applier::apply_diff;
pub use codec::{Diff, DiffReader, DiffWriter};
pub use computer::compute_diff;
pub use log_builder::V2LogBuilder;

// Documents are caller-controlled and may be nested arbitrarily deep;
// recursion past this bound is refused instead of overflowing the stack.
pub(crate) const MAX_DIFF_DEPTH: usize = 200;
