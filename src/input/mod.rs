//! Byte sources, and the readers used to parse them.
//!
//! Every container parser in this crate reads from a [`SeekableStream`]: a
//! [`Read`] source which knows its own position, and which may (or may not)
//! support seeking. Any [`MediaSource`] can be adapted into one using
//! [`SourceStream`], which covers files, memory buffers, and user-defined
//! network bodies alike.
//!
//! ## Seeking over the network
//! Hard seeks on a remote source will often require a fresh connection.
//! To avoid this, [`SeekableStream::seek`] covers short forward distances by
//! reading and discarding data, up to [`Config::max_skip_distance`] bytes.
//!
//! [`Read`]: std::io::Read
//! [`MediaSource`]: symphonia_core::io::MediaSource
//! [`Config::max_skip_distance`]: crate::Config::max_skip_distance

pub mod bits;
mod head;
mod interrupt;
pub mod metadata;
mod stream;

pub use self::{head::*, interrupt::*, stream::*};

/// Re-export of the symphonia I/O traits used to construct a [`SourceStream`].
pub use symphonia_core::io as core;
