//! Table-driven traversal of tagged, length-prefixed element trees.
//!
//! Both MP4 boxes and Matroska (EBML) elements follow the same pattern: a
//! parent section contains a run of children, each with a tag and a length.
//! Readers for these formats describe how to read the next child header and
//! how to jump past a child; a [`TreeWalk`] then dispatches each child to a
//! handler chosen by its tag, optionally bailing out early.
//!
//! Nodes are small [`Copy`] cursors describing a byte range in the stream.
//! Nested walks hold their parent only by reference, for the duration of the
//! handler call.

use crate::error::Result;
use std::fmt::Debug;

/// A header describing one element in the tree.
pub trait TreeNode: Copy + Debug {
    /// Tag type used to select handlers.
    type Tag: Copy + Debug + Eq;

    /// Identifier of this node.
    fn tag(&self) -> Self::Tag;
}

/// A stream positioned within a tree of [`TreeNode`]s.
pub trait TreeReader {
    /// Cursor type for elements in this tree.
    type Node: TreeNode;

    /// Read the header of the next child of `parent`.
    ///
    /// Returns `None` once `parent` (or the stream) is exhausted.
    fn next_child(&mut self, parent: &Self::Node) -> Result<Option<Self::Node>>;

    /// Move the stream to the end of `node`.
    ///
    /// This must be valid whether or not any of the node's payload has been read.
    fn skip(&mut self, node: &Self::Node) -> Result<()>;
}

/// Callback run for a child with a matching tag.
///
/// The stream is positioned at the start of the child's payload.
pub type Handler<R, T> = fn(&mut R, &<R as TreeReader>::Node, &mut T) -> Result<()>;

/// Predicate checked against each child (before its handler): `true` ends the walk.
pub type StopCheck<R, T> = fn(&<R as TreeReader>::Node, &T) -> bool;

/// Tag-to-handler dispatch over the children of one node.
pub struct TreeWalk<R: TreeReader, T> {
    handlers: Vec<(<R::Node as TreeNode>::Tag, Handler<R, T>)>,
    stop: Option<StopCheck<R, T>>,
}

impl<R: TreeReader, T> TreeWalk<R, T> {
    /// A walk with no handlers, which skips every child.
    #[must_use]
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
            stop: None,
        }
    }

    /// Run `handler` on every child tagged `tag`.
    #[must_use]
    pub fn on(mut self, tag: <R::Node as TreeNode>::Tag, handler: Handler<R, T>) -> Self {
        self.handlers.push((tag, handler));
        self
    }

    /// End the walk at the first child for which `check` returns `true`.
    ///
    /// The stream is left positioned after that child's header.
    #[must_use]
    pub fn stop_when(mut self, check: StopCheck<R, T>) -> Self {
        self.stop = Some(check);
        self
    }

    /// Visit every child of `parent`, in order.
    ///
    /// Returns the child which triggered the stop check, if any.
    pub fn run(
        &self,
        reader: &mut R,
        parent: &R::Node,
        state: &mut T,
    ) -> Result<Option<R::Node>> {
        while let Some(child) = reader.next_child(parent)? {
            if let Some(check) = self.stop {
                if check(&child, state) {
                    return Ok(Some(child));
                }
            }

            let tag = child.tag();
            if let Some((_, handler)) = self.handlers.iter().find(|(t, _)| *t == tag) {
                handler(reader, &child, state)?;
            }

            reader.skip(&child)?;
        }

        Ok(None)
    }
}

impl<R: TreeReader, T> Default for TreeWalk<R, T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Read, Seek, SeekFrom};

    // One-byte tag, one-byte payload length.
    #[derive(Clone, Copy, Debug)]
    struct Tlv {
        tag: u8,
        start: u64,
        end: u64,
    }

    impl TreeNode for Tlv {
        type Tag = u8;

        fn tag(&self) -> u8 {
            self.tag
        }
    }

    struct TlvReader(Cursor<Vec<u8>>);

    impl TreeReader for TlvReader {
        type Node = Tlv;

        fn next_child(&mut self, parent: &Tlv) -> Result<Option<Tlv>> {
            if self.0.position() + 2 > parent.end {
                return Ok(None);
            }

            let mut header = [0u8; 2];
            self.0.read_exact(&mut header)?;
            let start = self.0.position();

            Ok(Some(Tlv {
                tag: header[0],
                start,
                end: start + u64::from(header[1]),
            }))
        }

        fn skip(&mut self, node: &Tlv) -> Result<()> {
            self.0.seek(SeekFrom::Start(node.end))?;
            Ok(())
        }
    }

    #[derive(Default)]
    struct Seen {
        leaves: Vec<u8>,
        stopped_at: Option<u64>,
    }

    fn leaf(reader: &mut TlvReader, node: &Tlv, seen: &mut Seen) -> Result<()> {
        let mut b = [0u8; 1];
        reader.0.read_exact(&mut b)?;
        assert_eq!(reader.0.position(), node.start + 1);
        seen.leaves.push(b[0]);
        Ok(())
    }

    fn container(reader: &mut TlvReader, node: &Tlv, seen: &mut Seen) -> Result<()> {
        TreeWalk::<TlvReader, Seen>::new().on(b'L', leaf).run(reader, node, seen)?;
        Ok(())
    }

    fn tree() -> TlvReader {
        TlvReader(Cursor::new(vec![
            b'L', 2, 1, 0xFF, // leaf, only first byte read
            b'X', 1, 0xEE, // unknown, skipped
            b'C', 6, b'L', 1, 2, b'L', 1, 3, // nested leaves
            b'S', 0, // stop marker
            b'L', 1, 9,
        ]))
    }

    fn root(len: u64) -> Tlv {
        Tlv {
            tag: 0,
            start: 0,
            end: len,
        }
    }

    #[test]
    fn dispatches_by_tag_and_skips_rest() {
        let mut reader = tree();
        let len = reader.0.get_ref().len() as u64;
        let mut seen = Seen::default();

        let stopped = TreeWalk::<TlvReader, Seen>::new()
            .on(b'L', leaf)
            .on(b'C', container)
            .run(&mut reader, &root(len), &mut seen)
            .unwrap();

        assert!(stopped.is_none());
        assert_eq!(seen.leaves, vec![1, 2, 3, 9]);
    }

    #[test]
    fn stop_check_ends_walk() {
        let mut reader = tree();
        let len = reader.0.get_ref().len() as u64;
        let mut seen = Seen::default();

        let stopped = TreeWalk::<TlvReader, Seen>::new()
            .on(b'L', leaf)
            .on(b'C', container)
            .stop_when(|node, _| node.tag == b'S')
            .run(&mut reader, &root(len), &mut seen)
            .unwrap();

        seen.stopped_at = stopped.map(|node| node.start);
        assert_eq!(seen.leaves, vec![1, 2, 3]);
        assert_eq!(seen.stopped_at, Some(17));
    }
}
