//! Path resolution: walking `/`-separated components from the root (or the
//! current directory) down to a single resolved entry.

use super::{Fat32Volume, MAX_PATH_LEN};
use super::dir::{Attribute, AttributeSet, DirHandle, Entry};
use super::name::LongName;
use crate::error::{Error, Result};
use crate::storage::BlockDevice;

/// Splits a path into `(parent, leaf)`.
///
/// The parent of a root-level path is `"/"`; the parent of a bare name is
/// `""`, i.e. the current directory.
pub(crate) fn split_path(path: &str) -> Result<(&str, &str)> {
    let (parent, leaf) = match path.rfind('/') {
        None => ("", path),
        Some(0) => ("/", &path[1..]),
        Some(i) => (&path[..i], &path[i + 1..]),
    };

    if leaf.is_empty() {
        return Err(Error::InvalidPath);
    }

    Ok((parent, leaf))
}

impl<D: BlockDevice> Fat32Volume<D> {
    /// A pseudo-entry standing for a directory reached without reading its
    /// 8.3 slot: the root, or the current-directory shortcuts. Its on-disk
    /// location is zeroed, which downstream code treats as "not rewritable".
    fn synthetic_dir_entry(&self, cluster: u32) -> Entry {
        Entry {
            name: LongName::empty(),
            attr: AttributeSet::from_bits(Attribute::Directory as u8),
            start_cluster: cluster,
            size: 0,
            write_date: 0,
            write_time: 0,
            short_name: [b' '; 11],
            sector: 0,
            offset: 0,
        }
    }

    /// Resolves `path` to its directory entry.
    ///
    /// Leading `/` restarts from the root; otherwise resolution begins at the
    /// current directory. Component matching is ASCII case-insensitive. A
    /// missing intermediate component (or a file in an intermediate
    /// position) is `InvalidPath`; a missing final component is
    /// `FileNotFound`.
    pub(crate) fn find_entry(&mut self, path: &str) -> Result<Entry> {
        if path.len() > MAX_PATH_LEN {
            return Err(Error::InvalidPath);
        }

        if path == "/" {
            return Ok(self.synthetic_dir_entry(self.bpb.root_cluster));
        }

        // "" resolves to the current directory. "." and ".." do too when the
        // current directory is the root, which has no dot entries on disk.
        if path.is_empty()
            || ((path == "." || path == "..")
                && self.current_dir_cluster == self.bpb.root_cluster)
        {
            return Ok(self.synthetic_dir_entry(self.current_dir_cluster));
        }

        let mut cluster = if path.starts_with('/') {
            self.bpb.root_cluster
        } else {
            self.current_dir_cluster
        };

        let mut components = path.split('/').filter(|c| !c.is_empty()).peekable();

        while let Some(component) = components.next() {
            let last = components.peek().is_none();

            let mut dir = DirHandle::at_cluster(cluster);
            let mut descended = false;

            while let Some(entry) = self.next_dir_entry(&mut dir)? {
                if !entry.name().eq_ignore_ascii_case(component) {
                    continue;
                }

                if last {
                    return Ok(entry);
                }

                if entry.attr.is_dir() {
                    // `..` of a root child is stored as cluster 0.
                    cluster = if entry.start_cluster != 0 {
                        entry.start_cluster
                    } else {
                        self.bpb.root_cluster
                    };
                    descended = true;
                    break;
                }
            }

            if last {
                break;
            }
            if !descended {
                return Err(Error::InvalidPath);
            }
        }

        Err(Error::FileNotFound)
    }
}

#[cfg(test)]
mod path_tests {
    use super::*;

    #[test]
    fn split_parent_and_leaf() {
        assert_eq!(split_path("a/b/c").unwrap(), ("a/b", "c"));
        assert_eq!(split_path("/top.txt").unwrap(), ("/", "top.txt"));
        assert_eq!(split_path("bare").unwrap(), ("", "bare"));
        assert_eq!(split_path("/a/b").unwrap(), ("/a", "b"));
    }

    #[test]
    fn split_rejects_empty_leaf() {
        assert_eq!(split_path("a/"), Err(Error::InvalidPath));
        assert_eq!(split_path("/"), Err(Error::InvalidPath));
        assert_eq!(split_path(""), Err(Error::InvalidPath));
    }
}
