use std::collections::BTreeMap;

use crate::error::EntireError;
use crate::git::object_store::{Mode, ObjectStore, TreeEntry};

enum Node {
    Blob(Mode, String),
    Tree(BTreeMap<String, Node>),
}

/// Build a nested Git tree from a flat `path -> (mode, blob id)` map and return the root
/// tree's id. Pure with respect to the object store except for the tree-writing calls
/// themselves: no reads, no ref access.
pub fn build(store: &ObjectStore, flat: &BTreeMap<String, (Mode, String)>) -> Result<String, EntireError> {
    let mut root: BTreeMap<String, Node> = BTreeMap::new();
    for (path, (mode, id)) in flat {
        insert(&mut root, path, *mode, id.clone());
    }
    write_node(store, &Node::Tree(root))
}

fn insert(dir: &mut BTreeMap<String, Node>, path: &str, mode: Mode, id: String) {
    let (first, rest) = match path.split_once('/') {
        Some((first, rest)) => (first, Some(rest)),
        None => (path, None),
    };
    match rest {
        None => {
            dir.insert(first.to_string(), Node::Blob(mode, id));
        }
        Some(rest) => {
            let entry = dir
                .entry(first.to_string())
                .or_insert_with(|| Node::Tree(BTreeMap::new()));
            if let Node::Tree(sub) = entry {
                insert(sub, rest, mode, id);
            }
        }
    }
}

fn write_node(store: &ObjectStore, node: &Node) -> Result<String, EntireError> {
    match node {
        Node::Blob(_, id) => Ok(id.clone()),
        Node::Tree(children) => {
            let mut entries = Vec::with_capacity(children.len());
            for (name, child) in children {
                let mode = match child {
                    Node::Blob(mode, _) => *mode,
                    Node::Tree(_) => Mode::Tree,
                };
                let id = write_node(store, child)?;
                entries.push(TreeEntry {
                    mode,
                    name: name.clone(),
                    id,
                });
            }
            sort_entries(&mut entries);
            store.put_tree(&entries)
        }
    }
}

/// Git's tree sort order: byte-wise by name, with directory entries compared as though a
/// trailing `/` were appended. `mktree` rejects input that isn't already in this order.
fn sort_entries(entries: &mut [TreeEntry]) {
    entries.sort_by(|a, b| sort_key(a).cmp(&sort_key(b)));
}

fn sort_key(entry: &TreeEntry) -> String {
    if entry.mode == Mode::Tree {
        format!("{}/", entry.name)
    } else {
        entry.name.clone()
    }
}

/// Walk a tree recursively, writing every blob's full path into `out`. Inverse of [`build`].
pub fn flatten(
    store: &ObjectStore,
    tree_id: &str,
    prefix: &str,
    out: &mut BTreeMap<String, (Mode, String)>,
) -> Result<(), EntireError> {
    let entries = store.read_tree(tree_id)?;
    for entry in entries {
        let path = if prefix.is_empty() {
            entry.name.clone()
        } else {
            format!("{prefix}/{}", entry.name)
        };
        match entry.mode {
            Mode::Tree => flatten(store, &entry.id, &path, out)?,
            _ => {
                out.insert(path, (entry.mode, entry.id));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(mode: Mode, name: &str) -> TreeEntry {
        TreeEntry {
            mode,
            name: name.to_string(),
            id: "0".repeat(40),
        }
    }

    #[test]
    fn directories_sort_as_though_trailing_slash_appended() {
        // "lib" (file) must sort before "lib-utils" (file), but a tree named "lib" sorts
        // after a file named "lib-utils" because "lib/" > "lib-utils".
        let mut entries = vec![
            entry(Mode::Regular, "lib-utils"),
            entry(Mode::Tree, "lib"),
            entry(Mode::Regular, "a"),
        ];
        sort_entries(&mut entries);
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["a", "lib-utils", "lib"]);
    }

    #[test]
    fn insert_builds_nested_structure() {
        let mut root: BTreeMap<String, Node> = BTreeMap::new();
        insert(&mut root, "a/b/c.txt", Mode::Regular, "blob1".to_string());
        insert(&mut root, "a/d.txt", Mode::Regular, "blob2".to_string());
        insert(&mut root, "e.txt", Mode::Regular, "blob3".to_string());

        assert!(matches!(root.get("e.txt"), Some(Node::Blob(_, id)) if id == "blob3"));
        match root.get("a") {
            Some(Node::Tree(a)) => {
                assert!(matches!(a.get("d.txt"), Some(Node::Blob(_, id)) if id == "blob2"));
                match a.get("b") {
                    Some(Node::Tree(b)) => {
                        assert!(matches!(b.get("c.txt"), Some(Node::Blob(_, id)) if id == "blob1"));
                    }
                    _ => panic!("expected nested tree at a/b"),
                }
            }
            _ => panic!("expected tree at a"),
        }
    }
}
