//! Folder picker navigation state

use crate::error::AppError;
use app_fs::{DirectoryListing, FilesystemAccessor, FilesystemEntry};
use serde::{Deserialize, Serialize};

/// Where a browse session currently is
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "view", rename_all = "snake_case")]
pub enum BrowseView {
    /// Top level: the discovered roots
    Roots { roots: Vec<FilesystemEntry> },
    /// Inside a directory
    Directory { listing: DirectoryListing },
}

/// One user's walk through the filesystem
///
/// `history` holds previously visited paths. Forward navigation appends to
/// it; going back truncates it from the tail. A `None` location is the roots
/// view.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BrowseSession {
    current: Option<String>,
    history: Vec<Option<String>>,
}

impl BrowseSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current directory, `None` at the roots view
    pub fn current(&self) -> Option<&str> {
        self.current.as_deref()
    }

    pub fn can_go_back(&self) -> bool {
        !self.history.is_empty()
    }

    /// Visited paths, oldest first; roots views are omitted
    pub fn history(&self) -> Vec<&str> {
        self.history.iter().filter_map(|p| p.as_deref()).collect()
    }

    /// Open a directory. On failure the session is unchanged.
    pub fn open(
        &mut self,
        accessor: &FilesystemAccessor,
        path: &str,
    ) -> Result<BrowseView, AppError> {
        let listing = accessor.browse(path)?;
        if self.current.as_deref() != Some(listing.path.as_str()) {
            let previous = self.current.replace(listing.path.clone());
            self.history.push(previous);
        }
        Ok(BrowseView::Directory { listing })
    }

    /// Show the roots view
    pub fn open_roots(&mut self, accessor: &FilesystemAccessor) -> BrowseView {
        if self.current.is_some() {
            let previous = self.current.take();
            self.history.push(previous);
        }
        BrowseView::Roots {
            roots: accessor.list_roots(),
        }
    }

    /// Open the parent directory; a root's parent is the roots view
    pub fn go_up(&mut self, accessor: &FilesystemAccessor) -> Result<BrowseView, AppError> {
        let parent = match self.current.as_deref() {
            Some(current) => app_fs::path::parent_of(current),
            None => String::new(),
        };

        if parent.is_empty() {
            Ok(self.open_roots(accessor))
        } else {
            self.open(accessor, &parent)
        }
    }

    /// Return to the previous location
    ///
    /// `Ok(None)` when there is no history. A previous directory that can no
    /// longer be listed is dropped from history and the error returned.
    pub fn go_back(
        &mut self,
        accessor: &FilesystemAccessor,
    ) -> Result<Option<BrowseView>, AppError> {
        let Some(previous) = self.history.pop() else {
            return Ok(None);
        };

        let view = match &previous {
            Some(path) => BrowseView::Directory {
                listing: accessor.browse(path)?,
            },
            None => BrowseView::Roots {
                roots: accessor.list_roots(),
            },
        };
        self.current = previous;
        Ok(Some(view))
    }

    /// Back to the roots view with an empty history
    pub fn reset(&mut self) {
        self.current = None;
        self.history.clear();
    }
}
