//! Object path syntax.
//!
//! A root object's path is its name. Its direct children are joined with [`ROOT_SEPARATOR`],
//! deeper levels with [`OBJECT_SEPARATOR`]:
//!
//! ```text
//! Level:Props.Chair.Cushion
//! ```

/// Separates the root object from the rest of the path.
pub const ROOT_SEPARATOR: char = ':';
/// Separates nested object names.
pub const OBJECT_SEPARATOR: char = '.';

/// Checks whether `name` can name an object.
#[must_use]
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty() && !name.contains([ROOT_SEPARATOR, OBJECT_SEPARATOR])
}

/// Appends a name or a relative path to an object path.
#[must_use]
pub fn join_path(outer_path: &str, relative: &str) -> String {
    if relative.is_empty() {
        return outer_path.to_owned();
    }
    let separator = if outer_path.contains(ROOT_SEPARATOR) {
        OBJECT_SEPARATOR
    } else {
        ROOT_SEPARATOR
    };
    format!("{outer_path}{separator}{relative}")
}

/// Joins names into a relative path.
#[must_use]
pub fn join_relative<'a>(names: impl IntoIterator<Item = &'a str>) -> String {
    let mut path = String::new();
    for name in names {
        if !path.is_empty() {
            path.push(OBJECT_SEPARATOR);
        }
        path.push_str(name);
    }
    path
}

/// Splits a relative path into its outer part and the last name.
#[must_use]
pub fn split_last(relative: &str) -> (Option<&str>, &str) {
    match relative.rsplit_once(OBJECT_SEPARATOR) {
        Some((outer, name)) => (Some(outer), name),
        None => (None, relative),
    }
}

/// Splits a full path into the root name and the names below it.
#[must_use]
pub fn split_path(path: &str) -> (&str, Vec<&str>) {
    match path.split_once(ROOT_SEPARATOR) {
        Some((root, rest)) => (root, rest.split(OBJECT_SEPARATOR).collect()),
        None => (path, Vec::new()),
    }
}
