//! The tag hierarchy declared by the file control field.
//!
//! The file control field (`0000`) lists its field tags as concatenated
//! parent/child pairs, e.g. `0001DSIDDSIDDSSI` says that `DSID` is nested in
//! `0001` and `DSSI` in `DSID`.
use super::*;
use itertools::Itertools;
use std::fmt;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FieldTree<E> {
    Empty,
    Node {
        tag: String,
        extra: E,
        children: Vec<FieldTree<E>>,
    },
}

impl FieldTree<()> {
    /// Build the tree from `tag_length` wide parent/child tag pairs.
    pub fn parse_from_str(input: &str, tag_length: usize) -> Result<Self> {
        ensure!(
            tag_length > 0 && input.len() % (2 * tag_length) == 0,
            InvalidFieldTreeSnafu {
                description: format!(
                    "{} bytes of tag pairs do not split into pairs of {tag_length} byte tags",
                    input.len()
                ),
            }
        );
        let mut tree = Self::Empty;
        for start in (0..input.len()).step_by(2 * tag_length) {
            let parent = Self::tag_at(input, start, tag_length)?;
            let child = Self::tag_at(input, start + tag_length, tag_length)?;
            ensure!(
                tree.insert(parent, child),
                InvalidFieldTreeSnafu {
                    description: format!("parent '{parent}' of '{child}' is not in the tree"),
                }
            );
        }
        Ok(tree)
    }

    fn tag_at(input: &str, start: usize, tag_length: usize) -> Result<&str> {
        input
            .get(start..start + tag_length)
            .with_context(|| InvalidFieldTreeSnafu {
                description: format!("no tag at byte {start}"),
            })
    }

    fn insert(&mut self, parent: &str, child: &str) -> bool {
        let leaf = || Self::Node {
            tag: child.to_string(),
            extra: (),
            children: Vec::new(),
        };
        match self {
            Self::Empty => {
                *self = Self::Node {
                    tag: parent.to_string(),
                    extra: (),
                    children: vec![leaf()],
                };
                true
            }
            Self::Node { tag, children, .. } if *tag == parent => {
                children.push(leaf());
                true
            }
            Self::Node { children, .. } => children.iter_mut().any(|c| c.insert(parent, child)),
        }
    }
}

impl<E> FieldTree<E> {
    pub fn tag(&self) -> Option<&str> {
        match self {
            Self::Empty => None,
            Self::Node { tag, .. } => Some(tag.as_str()),
        }
    }

    pub fn children(&self) -> &[FieldTree<E>] {
        match self {
            Self::Empty => &[],
            Self::Node { children, .. } => children,
        }
    }

    /// The subtree rooted at `tag`.
    pub fn find(&self, tag: &str) -> Option<&Self> {
        match self {
            Self::Empty => None,
            Self::Node { tag: own, .. } if own.as_str() == tag => Some(self),
            Self::Node { children, .. } => children.iter().find_map(|c| c.find(tag)),
        }
    }

    /// All tags, parents before their children.
    pub fn tags(&self) -> Vec<&str> {
        let mut tags = Vec::new();
        self.collect_tags(&mut tags);
        tags
    }

    fn collect_tags<'a>(&'a self, tags: &mut Vec<&'a str>) {
        if let Self::Node { tag, children, .. } = self {
            tags.push(tag);
            for child in children {
                child.collect_tags(tags);
            }
        }
    }

    /// Replace every node's extra with `mapper(tag)`.
    pub fn map_extra<O, F>(self, mapper: F) -> FieldTree<O>
    where
        F: Fn(&str) -> O + Copy,
    {
        match self {
            Self::Empty => FieldTree::Empty,
            Self::Node { tag, children, .. } => FieldTree::Node {
                extra: mapper(&tag),
                children: children
                    .into_iter()
                    .map(|child| child.map_extra(mapper))
                    .collect(),
                tag,
            },
        }
    }
}

impl<E> FieldTree<E>
where
    E: fmt::Display,
{
    pub fn tree_string(&self) -> String {
        self.tree_string_prefixed("")
    }

    fn tree_string_prefixed(&self, prefix: &str) -> String {
        match self {
            Self::Empty => "|".to_string(),
            Self::Node {
                tag,
                extra,
                children,
            } => {
                let child_prefix = format!("{prefix}   ");
                std::iter::once(format!("{prefix}|-{tag}: {extra}"))
                    .chain(
                        children
                            .iter()
                            .map(|child| child.tree_string_prefixed(&child_prefix)),
                    )
                    .join("\n")
            }
        }
    }
}

impl<E> fmt::Display for FieldTree<E>
where
    E: fmt::Display,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.tree_string())
    }
}
