use crate::http::request::{Disposition, classify_mime};
use crate::http::response::HttpResponse;
use std::fs;
use std::path::{Path, PathBuf};

/// Resolves `target` under `document_root`; a bare `/` maps to
/// `index.html`.
pub fn resolve_path(document_root: &Path, target: &str) -> PathBuf {
    if target == "/" {
        return document_root.join("index.html");
    }
    document_root.join(target.trim_start_matches('/'))
}

/// Serves a static GET/HEAD request: stats the path, reads the whole body
/// for GET, omits it for HEAD while keeping identical headers. A missing
/// or non-regular-file path produces `404`; a read failure after a
/// successful stat produces `500`.
pub fn serve_static(
    document_root: &Path,
    target: &str,
    include_body: bool,
    disposition: Disposition,
) -> HttpResponse {
    let path = resolve_path(document_root, target);

    let metadata = match fs::metadata(&path) {
        Ok(m) if m.is_file() => m,
        _ => return HttpResponse::build_error(404),
    };

    let content_type = classify_mime(target);
    let content_length = metadata.len() as usize;
    let last_modified = metadata
        .modified()
        .unwrap_or_else(|_| std::time::SystemTime::now());

    let body = if include_body {
        match fs::read(&path) {
            Ok(bytes) => Some(bytes),
            Err(_) => return HttpResponse::build_error(500),
        }
    } else {
        None
    };

    HttpResponse::build_static(disposition, content_type, content_length, last_modified, body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(dir: &Path, name: &str, contents: &[u8]) {
        let mut f = fs::File::create(dir.join(name)).unwrap();
        f.write_all(contents).unwrap();
    }

    #[test]
    fn bare_slash_resolves_to_index_html() {
        let root = Path::new("/var/www");
        assert_eq!(resolve_path(root, "/"), root.join("index.html"));
    }

    #[test]
    fn target_resolves_relative_to_root() {
        let root = Path::new("/var/www");
        assert_eq!(resolve_path(root, "/a/b.html"), root.join("a/b.html"));
    }

    #[test]
    fn serves_existing_file() {
        let dir = std::env::temp_dir().join(format!("liso-test-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        write_temp(&dir, "hi.html", b"hi");

        let res = serve_static(&dir, "/hi.html", true, Disposition::KeepAlive);
        assert_eq!(res.status_code, 200);
        assert_eq!(res.body, b"hi");
        assert!(
            res.headers
                .iter()
                .any(|(k, v)| k == "Content-Type" && v == "text/html")
        );

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn head_omits_body_but_keeps_headers() {
        let dir = std::env::temp_dir().join(format!("liso-test-head-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        write_temp(&dir, "hi.html", b"hi");

        let res = serve_static(&dir, "/hi.html", false, Disposition::KeepAlive);
        assert_eq!(res.status_code, 200);
        assert!(res.body.is_empty());
        assert!(res.headers.iter().any(|(k, _)| k == "Content-Length"));

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn missing_file_is_404() {
        let dir = std::env::temp_dir().join(format!("liso-test-missing-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();

        let res = serve_static(&dir, "/missing.html", true, Disposition::KeepAlive);
        assert_eq!(res.status_code, 404);

        fs::remove_dir_all(&dir).ok();
    }
}
