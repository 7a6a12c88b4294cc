//! Property-based test generators using proptest.

use proptest::prelude::*;
use std::collections::BTreeMap;

/// Strategy for file contents, from empty up to a few dozen chunks.
pub fn file_content_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop_oneof![
        1 => Just(Vec::new()),
        4 => prop::collection::vec(any::<u8>(), 1..512),
        2 => prop::collection::vec(any::<u8>(), 512..8 * 1024),
    ]
}

/// Strategy for contents with long repeated runs, which chunk into many
/// identical chunks.
pub fn repetitive_content_strategy() -> impl Strategy<Value = Vec<u8>> {
    (prop::collection::vec(any::<u8>(), 1..64), 1usize..128)
        .prop_map(|(pattern, repeats)| pattern.repeat(repeats))
}

/// Strategy for relative file paths up to three levels deep.
///
/// Folder names never contain a dot and file names always do, so no
/// generated file path is a prefix folder of another.
pub fn relative_path_strategy() -> impl Strategy<Value = String> {
    (
        prop::collection::vec("[a-d]{1,3}", 0..3),
        "[a-z]{1,6}\\.(txt|bin)",
    )
        .prop_map(|(folders, file)| {
            let mut path = folders.join("/");
            if !path.is_empty() {
                path.push('/');
            }
            path.push_str(&file);
            path
        })
}

/// Strategy for a folder tree with up to `max_files` files.
pub fn file_tree_strategy(max_files: usize) -> impl Strategy<Value = BTreeMap<String, Vec<u8>>> {
    prop::collection::btree_map(relative_path_strategy(), file_content_strategy(), 0..=max_files)
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn paths_are_relative(path in relative_path_strategy()) {
            prop_assert!(!path.starts_with('/'));
            prop_assert!(!path.split('/').any(|c| c.is_empty() || c == ".."));
        }

        #[test]
        fn trees_have_no_file_folder_clash(tree in file_tree_strategy(8)) {
            for path in tree.keys() {
                let folder = format!("{path}/");
                prop_assert!(!tree.keys().any(|other| other.starts_with(&folder)));
            }
        }
    }
}
