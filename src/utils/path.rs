use std::path::{Component, Path, PathBuf};

/// Prefix of request paths served from the ACME challenge directory.
pub const ACME_PREFIX: &str = "/.well-known/";

/// Map a request path onto a file below `root`.
/// Returns `None` for paths outside the ACME prefix or paths that try to climb out of `root`.
pub fn resolve_challenge_path(root: impl AsRef<Path>, request_path: &str) -> Option<PathBuf> {
    if !request_path.starts_with(ACME_PREFIX) {
        return None;
    }
    let relative = Path::new(request_path.trim_start_matches('/'));
    let mut resolved = root.as_ref().to_path_buf();
    for component in relative.components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    Some(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_challenge_path() {
        let resolved = resolve_challenge_path("/srv/acme", "/.well-known/acme-challenge/token123");
        assert_eq!(resolved, Some(PathBuf::from("/srv/acme/.well-known/acme-challenge/token123")));
    }

    #[test]
    fn test_resolve_challenge_path_rejects_traversal() {
        assert_eq!(resolve_challenge_path("/srv/acme", "/.well-known/../../etc/passwd"), None);
    }

    #[test]
    fn test_resolve_challenge_path_outside_prefix() {
        assert_eq!(resolve_challenge_path("/srv/acme", "/index.html"), None);
        assert_eq!(resolve_challenge_path("/srv/acme", "/.well-known"), None);
    }
}
