//! Pruned depth-first search for the history file
//!
//! Only directories that can lead to a profile's PSReadLine folder are
//! opened. Unreadable directories and entries are logged and skipped.

use std::collections::HashSet;
use std::vec::IntoIter;
use tracing::{debug, trace, warn};

use crate::codec::decode_name;
use crate::config::ScanConfig;
use crate::error::ExtractResult;
use crate::fs::{DirEntry, EntryKind, FileSystem, NodeRef};

/// What to look for and where to look, all lowercased
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetSpec {
    pub filename: String,
    pub fragments: Vec<String>,
    pub profile_roots: Vec<String>,
    pub max_depth: usize,
}

impl TargetSpec {
    pub fn from_config(config: &ScanConfig) -> Self {
        let lower = |items: &[String]| items.iter().map(|s| s.to_lowercase()).collect::<Vec<_>>();
        Self {
            filename: config.target_filename.to_lowercase(),
            fragments: lower(&config.path_fragments),
            profile_roots: lower(&config.profile_roots),
            max_depth: config.max_depth,
        }
    }

    /// Name matches and every fragment occurs somewhere in the path
    pub fn matches_file(&self, name_lower: &str, path_lower: &str) -> bool {
        name_lower == self.filename && self.fragments.iter().all(|f| path_lower.contains(f.as_str()))
    }

    /// Pruning rule for a child directory of `parent_lower`
    pub fn should_descend(&self, name_lower: &str, child_path_lower: &str, parent_lower: &str) -> bool {
        if self.profile_roots.iter().any(|r| r == name_lower) {
            return true;
        }
        if self.fragments.iter().any(|f| f == name_lower) {
            return true;
        }
        // Inside a profile's AppData tree everything is fair game
        if let Some(anchor) = self.fragments.first() {
            if child_path_lower.contains(anchor.as_str()) {
                return true;
            }
        }
        // Per-user directory names are arbitrary
        self.profile_roots
            .iter()
            .any(|r| parent_lower.strip_prefix('/') == Some(r.as_str()))
    }
}

impl Default for TargetSpec {
    fn default() -> Self {
        Self::from_config(&ScanConfig::default())
    }
}

/// A located history file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMatch {
    /// '/'-separated, original case, leading '/'
    pub full_path: String,
    pub size: u64,
    pub partition_description: Option<String>,
    pub partition_index: Option<usize>,
    pub node: NodeRef,
}

struct Frame {
    path: String,
    depth: usize,
    pending: IntoIter<ExtractResult<DirEntry>>,
}

fn open_frame(fs: &mut dyn FileSystem, dir: NodeRef, path: String, depth: usize) -> Option<Frame> {
    match fs.read_dir(dir) {
        Ok(entries) => Some(Frame {
            path,
            depth,
            pending: entries.into_iter(),
        }),
        Err(e) => {
            debug!(path = %display_path(&path), error = %e, "Directory could not be opened, skipping subtree");
            None
        }
    }
}

fn display_path(path: &str) -> &str {
    if path.is_empty() {
        "/"
    } else {
        path
    }
}

/// Walk `fs` from its root and return every match in depth-first order
pub fn find_target(fs: &mut dyn FileSystem, target: &TargetSpec) -> Vec<FileMatch> {
    let mut matches = Vec::new();
    let mut visited = HashSet::new();
    let root = fs.root();
    visited.insert(root);

    let mut stack: Vec<Frame> = open_frame(fs, root, String::new(), 0).into_iter().collect();

    while let Some(frame) = stack.last_mut() {
        let Some(entry) = frame.pending.next() else {
            stack.pop();
            continue;
        };
        let parent_path = frame.path.clone();
        let depth = frame.depth;

        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                debug!(path = %display_path(&parent_path), error = %e, "Skipping unreadable entry");
                continue;
            }
        };

        let name = decode_name(&entry.name);
        if name.is_empty() || name == "." || name == ".." {
            continue;
        }

        let full_path = format!("{}/{}", parent_path, name);
        let name_lower = name.to_lowercase();
        let path_lower = full_path.to_lowercase();

        match entry.kind {
            EntryKind::File => {
                if target.matches_file(&name_lower, &path_lower) {
                    debug!(path = %full_path, size = entry.size, "Found target file");
                    matches.push(FileMatch {
                        full_path,
                        size: entry.size,
                        partition_description: None,
                        partition_index: None,
                        node: entry.node,
                    });
                }
            }
            EntryKind::Directory => {
                if !target.should_descend(&name_lower, &path_lower, &parent_path.to_lowercase()) {
                    trace!(path = %full_path, "Pruned");
                    continue;
                }
                if depth + 1 > target.max_depth {
                    debug!(path = %full_path, max_depth = target.max_depth, "Depth limit reached");
                    continue;
                }
                if !visited.insert(entry.node) {
                    warn!(path = %full_path, "Directory already visited, possible loop in metadata");
                    continue;
                }
                if let Some(child) = open_frame(fs, entry.node, full_path, depth + 1) {
                    stack.push(child);
                }
            }
            EntryKind::Other => {}
        }
    }

    matches
}
