//! Path canonicalization.

/// Lexically canonicalize a path, removing redundant components.
/// Does not access the disk, but only simplifies things like
/// "foo/./bar" => "foo/bar", so that two spellings of one target name the
/// same job.
pub fn canon_path<T: AsRef<str>>(inpath: T) -> String {
    let path = inpath.as_ref();
    if path.is_empty() {
        return String::new();
    }
    let absolute = path.starts_with('/');

    // Stack of kept components; ".." entries only ever sit at the bottom.
    let mut components: Vec<&str> = Vec::new();
    for component in path.split('/') {
        match component {
            "" | "." => {}
            ".." => match components.last() {
                Some(&last) if last != ".." => {
                    components.pop();
                }
                // "/.." is "/".
                _ if absolute => {}
                _ => components.push(".."),
            },
            c => components.push(c),
        }
    }

    let mut out = String::with_capacity(path.len());
    if absolute {
        out.push('/');
    }
    out.push_str(&components.join("/"));
    if out.is_empty() {
        out.push('.');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop() {
        assert_eq!(canon_path("foo"), "foo");
        assert_eq!(canon_path("foo/bar"), "foo/bar");
        assert_eq!(canon_path(""), "");
    }

    #[test]
    fn dot() {
        assert_eq!(canon_path("./foo"), "foo");
        assert_eq!(canon_path("foo/."), "foo");
        assert_eq!(canon_path("foo/./bar"), "foo/bar");
        assert_eq!(canon_path("."), ".");
        assert_eq!(canon_path("./"), ".");
    }

    #[test]
    fn slash() {
        assert_eq!(canon_path("/foo"), "/foo");
        assert_eq!(canon_path("foo//bar"), "foo/bar");
        assert_eq!(canon_path("foo/"), "foo");
        assert_eq!(canon_path("/"), "/");
    }

    #[test]
    fn parent() {
        assert_eq!(canon_path("foo/../bar"), "bar");
        assert_eq!(canon_path("/foo/../bar"), "/bar");
        assert_eq!(canon_path("/../bar"), "/bar");
        assert_eq!(canon_path("../foo"), "../foo");
        assert_eq!(canon_path("../foo/../bar"), "../bar");
        assert_eq!(canon_path("../../bar"), "../../bar");
        assert_eq!(canon_path("foo/.."), ".");
        assert_eq!(canon_path("foo/..bar"), "foo/..bar");
    }
}
