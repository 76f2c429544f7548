//! Default handler for requests no proxy rule claims.
//!
//! Serves files from the configured project root with a single-page-app
//! fallback to `index.html`.

use crate::proxy::http::{write_response, ParsedRequest};
use http::Method;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWrite;

/// Result of mapping a request path onto the root.
#[derive(Debug, PartialEq, Eq)]
pub enum Lookup {
    File(PathBuf),
    NotFound,
    Forbidden,
}

#[derive(Debug, Clone, Default)]
pub struct StaticFiles {
    root: Option<PathBuf>,
}

impl StaticFiles {
    pub fn new(root: Option<PathBuf>) -> Self {
        Self { root }
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    pub async fn lookup(&self, request_path: &str) -> Lookup {
        let Some(root) = &self.root else {
            return Lookup::NotFound;
        };

        let relative = Path::new(request_path.trim_start_matches('/'));
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Lookup::Forbidden;
        }

        let Ok(canonical_root) = fs::canonicalize(root).await else {
            tracing::warn!("Static root {} is not accessible", root.display());
            return Lookup::NotFound;
        };

        let candidate = match fs::canonicalize(root.join(relative)).await {
            Ok(path) => path,
            Err(_) => {
                // Extension-less paths are client-side routes
                if relative.extension().is_some() {
                    return Lookup::NotFound;
                }
                match fs::canonicalize(root.join("index.html")).await {
                    Ok(path) => path,
                    Err(_) => return Lookup::NotFound,
                }
            }
        };

        // Symlinks may still point outside the root
        if !candidate.starts_with(&canonical_root) {
            tracing::warn!(
                "Path traversal attempt detected: {} -> {}",
                request_path,
                candidate.display()
            );
            return Lookup::Forbidden;
        }

        let file = if candidate.is_dir() {
            candidate.join("index.html")
        } else {
            candidate
        };
        if file.is_file() {
            Lookup::File(file)
        } else {
            Lookup::NotFound
        }
    }

    /// Answer `request`; returns the status code and body size sent.
    pub async fn serve<W>(
        &self,
        writer: &mut W,
        request: &ParsedRequest,
        keep_alive: bool,
    ) -> anyhow::Result<(u16, u64)>
    where
        W: AsyncWrite + Unpin,
    {
        let connection = if keep_alive { "keep-alive" } else { "close" }.to_string();
        let text = "text/plain; charset=utf-8".to_string();

        if request.method != Method::GET && request.method != Method::HEAD {
            write_response(
                writer,
                405,
                "Method Not Allowed",
                &[
                    ("Allow", "GET, HEAD".to_string()),
                    ("Connection", connection),
                    ("Content-Type", text),
                ],
                b"Method Not Allowed",
                true,
            )
            .await?;
            return Ok((405, 18));
        }

        let include_body = request.method == Method::GET;
        match self.lookup(request.path()).await {
            Lookup::File(path) => {
                let body = fs::read(&path).await?;
                let content_type = content_type_for(&path);
                write_response(
                    writer,
                    200,
                    "OK",
                    &[
                        ("Content-Type", content_type),
                        ("Cache-Control", "no-cache".to_string()),
                        ("Connection", connection),
                    ],
                    &body,
                    include_body,
                )
                .await?;
                Ok((200, body.len() as u64))
            }
            Lookup::NotFound => {
                write_response(
                    writer,
                    404,
                    "Not Found",
                    &[("Connection", connection), ("Content-Type", text)],
                    b"Not Found",
                    include_body,
                )
                .await?;
                Ok((404, 9))
            }
            Lookup::Forbidden => {
                write_response(
                    writer,
                    403,
                    "Forbidden",
                    &[("Connection", connection), ("Content-Type", text)],
                    b"Forbidden",
                    include_body,
                )
                .await?;
                Ok((403, 9))
            }
        }
    }
}

fn content_type_for(path: &Path) -> String {
    let mime = mime_guess::from_path(path).first_or_octet_stream();
    if mime.type_() == "text" || mime.subtype() == "javascript" {
        format!("{}; charset=utf-8", mime.essence_str())
    } else {
        mime.essence_str().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::http::RequestBodyKind;

    fn request(method: Method, target: &str) -> ParsedRequest {
        ParsedRequest {
            method,
            target: target.to_string(),
            version: "HTTP/1.1".to_string(),
            headers: vec![("Host".to_string(), "localhost:3000".to_string())],
            body_kind: RequestBodyKind::None,
            buffered: Vec::new(),
        }
    }

    fn site() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), "<div id=\"app\"></div>").unwrap();
        std::fs::create_dir(dir.path().join("assets")).unwrap();
        std::fs::write(dir.path().join("assets/app.js"), "console.log(1)").unwrap();
        dir
    }

    #[tokio::test]
    async fn without_root_everything_is_not_found() {
        let files = StaticFiles::default();
        assert_eq!(files.lookup("/index.html").await, Lookup::NotFound);
    }

    #[tokio::test]
    async fn resolves_files_directories_and_spa_routes() {
        let dir = site();
        let files = StaticFiles::new(Some(dir.path().to_path_buf()));
        let index = fs::canonicalize(dir.path().join("index.html")).await.unwrap();

        assert_eq!(files.lookup("/").await, Lookup::File(index.clone()));
        assert_eq!(files.lookup("/dashboard/settings").await, Lookup::File(index));
        assert!(matches!(files.lookup("/assets/app.js").await, Lookup::File(p) if p.ends_with("app.js")));
        assert_eq!(files.lookup("/assets/missing.css").await, Lookup::NotFound);
    }

    #[tokio::test]
    async fn parent_components_are_forbidden() {
        let dir = site();
        let files = StaticFiles::new(Some(dir.path().to_path_buf()));
        assert_eq!(files.lookup("/../etc/passwd").await, Lookup::Forbidden);
        assert_eq!(files.lookup("/assets/../../secret").await, Lookup::Forbidden);
    }

    #[tokio::test]
    async fn serves_with_guessed_content_type() {
        let dir = site();
        let files = StaticFiles::new(Some(dir.path().to_path_buf()));
        let mut out = Vec::new();
        let (status, size) = files
            .serve(&mut out, &request(Method::GET, "/assets/app.js?v=3"), true)
            .await
            .unwrap();
        assert_eq!(status, 200);
        assert_eq!(size, 14);
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("javascript"));
        assert!(text.contains("Connection: keep-alive\r\n"));
        assert!(text.ends_with("console.log(1)"));
    }

    #[tokio::test]
    async fn head_omits_body_and_other_methods_are_rejected() {
        let dir = site();
        let files = StaticFiles::new(Some(dir.path().to_path_buf()));

        let mut out = Vec::new();
        files
            .serve(&mut out, &request(Method::HEAD, "/"), false)
            .await
            .unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Content-Length: 20\r\n"));
        assert!(text.ends_with("\r\n\r\n"));

        let mut out = Vec::new();
        let (status, _) = files
            .serve(&mut out, &request(Method::POST, "/"), false)
            .await
            .unwrap();
        assert_eq!(status, 405);
        assert!(String::from_utf8(out).unwrap().contains("Allow: GET, HEAD\r\n"));
    }

    #[test]
    fn text_types_carry_charset() {
        assert_eq!(
            content_type_for(Path::new("index.html")),
            "text/html; charset=utf-8"
        );
        assert_eq!(content_type_for(Path::new("logo.png")), "image/png");
        assert_eq!(
            content_type_for(Path::new("blob.unknownext")),
            "application/octet-stream"
        );
    }
}
