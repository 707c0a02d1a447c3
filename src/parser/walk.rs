//! Depth-first traversal of a nested entity tree.
//!
//! Nesting is driven by an explicit stack of splitter frames rather than
//! call recursion. Each frame's splitter is shared between the stack and the
//! [`PartBody`] handles of the parts it produced, so a leaf can be handed to
//! the caller by value while the walker keeps the cursor.

use std::cell::RefCell;
use std::io::{self, BufReader, Read};
use std::rc::Rc;

use tracing::{debug, warn};

use crate::error::{MimeError, Result};
use crate::model::header::Header;

use super::entity::{BodyReader, Entity};
use super::header::Recovery;
use super::media_type::MediaType;
use super::multipart::MultipartReader;
use super::{ParseOptions, MAX_DEPTH_CEILING};

type Splitter<'a> = Rc<RefCell<MultipartReader<BodyReader<'a>>>>;

/// Zero-based child indices from the root down to a node.
pub type PartPath = Vec<usize>;

/// One node of the tree, in depth-first order.
#[derive(Debug)]
pub enum WalkNode<'a> {
    /// A multipart container; its children follow.
    Multipart {
        path: PartPath,
        header: Header,
        media_type: MediaType,
        recoveries: Vec<Recovery>,
    },
    /// A leaf whose body can be read until the walker advances.
    Leaf { path: PartPath, entity: Entity<'a> },
}

impl WalkNode<'_> {
    pub fn path(&self) -> &[usize] {
        match self {
            Self::Multipart { path, .. } | Self::Leaf { path, .. } => path,
        }
    }

    pub fn header(&self) -> &Header {
        match self {
            Self::Multipart { header, .. } => header,
            Self::Leaf { entity, .. } => &entity.header,
        }
    }

    /// Nesting depth; the root is 0.
    pub fn depth(&self) -> usize {
        self.path().len()
    }
}

/// Owned handle on one part's body.
///
/// Reads return end-of-stream once the splitter has moved on to a later part.
pub struct PartBody<'a> {
    splitter: Splitter<'a>,
    index: usize,
}

impl PartBody<'_> {
    /// False once the splitter has advanced past this part.
    pub fn is_current(&self) -> bool {
        self.splitter.borrow().current_part() == Some(self.index)
    }
}

impl Read for PartBody<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut splitter = self.splitter.borrow_mut();
        if splitter.current_part() != Some(self.index) {
            return Ok(0);
        }
        splitter.read_body(buf).map_err(MimeError::into_io)
    }
}

struct Frame<'a> {
    splitter: Splitter<'a>,
    path: PartPath,
}

/// Pull-based depth-first walker.
pub struct Walker<'a> {
    root: Option<Entity<'a>>,
    stack: Vec<Frame<'a>>,
    options: ParseOptions,
    truncated: Vec<PartPath>,
}

impl<'a> Walker<'a> {
    /// `options.max_depth` is clamped to [`MAX_DEPTH_CEILING`].
    pub fn new(root: Entity<'a>, mut options: ParseOptions) -> Self {
        if options.max_depth > MAX_DEPTH_CEILING {
            warn!(
                requested = options.max_depth,
                ceiling = MAX_DEPTH_CEILING,
                "Clamping multipart depth limit"
            );
            options.max_depth = MAX_DEPTH_CEILING;
        }
        Self {
            root: Some(root),
            stack: Vec::new(),
            options,
            truncated: Vec::new(),
        }
    }

    /// Read the root entity from `r` and walk it.
    pub fn read(r: impl Read + 'a, options: ParseOptions) -> Result<Self> {
        Ok(Self::new(Entity::read(r, options)?, options))
    }

    pub fn options(&self) -> ParseOptions {
        self.options
    }

    /// Paths of multipart containers that ended without a closing delimiter.
    pub fn truncated(&self) -> &[PartPath] {
        &self.truncated
    }

    /// The next node, or `Ok(None)` once the whole tree has been visited.
    ///
    /// Fetching a node makes every previously returned leaf unreadable.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Result<Option<WalkNode<'a>>> {
        if let Some(root) = self.root.take() {
            return self.visit(root, PartPath::new()).map(Some);
        }

        loop {
            let Some(frame) = self.stack.last() else {
                return Ok(None);
            };
            let splitter = Rc::clone(&frame.splitter);
            let parent_path = frame.path.clone();

            let scanned = splitter.borrow_mut().advance()?;
            let Some(scanned) = scanned else {
                if splitter.borrow().is_truncated() {
                    self.truncated.push(parent_path);
                }
                self.stack.pop();
                continue;
            };

            let index = splitter.borrow().current_part().unwrap_or_default();
            let mut path = parent_path;
            path.push(index);

            let body = PartBody { splitter, index };
            let entity = Entity::new(scanned.header, BufReader::new(body), self.options.mode)?
                .with_recoveries(scanned.recoveries);
            return self.visit(entity, path).map(Some);
        }
    }

    fn visit(&mut self, entity: Entity<'a>, path: PartPath) -> Result<WalkNode<'a>> {
        if !entity.is_multipart() {
            return Ok(WalkNode::Leaf { path, entity });
        }

        if self.stack.len() >= self.options.max_depth {
            let max_depth = self.options.max_depth;
            if !self.options.mode.is_tolerant() {
                return Err(MimeError::TooDeep { max_depth });
            }
            warn!(?path, max_depth, "Multipart nested too deep, treating as leaf");
            return Ok(WalkNode::Leaf { path, entity });
        }

        let header = entity.header.clone();
        let media_type = entity.media_type().clone();
        let recoveries = entity.recoveries().to_vec();
        match entity.into_multipart() {
            Ok(splitter) => {
                let splitter = splitter.with_header_limit(self.options.max_header_bytes);
                debug!(?path, boundary = splitter.boundary(), "Descending into multipart");
                self.stack.push(Frame {
                    splitter: Rc::new(RefCell::new(splitter)),
                    path: path.clone(),
                });
                Ok(WalkNode::Multipart {
                    path,
                    header,
                    media_type,
                    recoveries,
                })
            }
            Err(entity) => Ok(WalkNode::Leaf { path, entity }),
        }
    }
}
