//! HTTP-backed download and enrichment backends (ureq, blocking).
//!
//! Files are written to `<name>.part` and renamed into place, so a path is
//! only ever reported for a complete file.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, info};
use ureq::Agent;

use super::{DownloadBackend, EnrichmentProvider};
use crate::error::FetchError;
use crate::model::{Enrichment, Entry};

const CHUNK_SIZE: usize = 64 * 1024;

/// Blocking HTTP agent with a global timeout. The timeout is what bounds the
/// work spent on requests that have gone stale.
pub fn agent(timeout: Duration) -> Agent {
    let config = Agent::config_builder()
        .timeout_global(Some(timeout))
        .build();
    Agent::new_with_config(config)
}

// ---------------------------------------------------------------------------
// Downloads
// ---------------------------------------------------------------------------

pub struct HttpDownloader {
    agent: Agent,
    dir: PathBuf,
}

impl HttpDownloader {
    pub fn new(agent: Agent, dir: PathBuf) -> Self {
        Self { agent, dir }
    }
}

impl DownloadBackend for HttpDownloader {
    fn start(
        &mut self,
        entry: &Entry,
        progress: &mut dyn FnMut(f32),
    ) -> Result<PathBuf, FetchError> {
        let mut resp = self
            .agent
            .get(&entry.download_url)
            .call()
            .map_err(FetchError::download)?;
        let total = resp.body().content_length().filter(|&n| n > 0);
        let name = file_name_for(&entry.download_url, &entry.id.0);
        let target = self.dir.join(&name);
        debug!(
            "download: {} -> {} ({} bytes expected)",
            entry.download_url,
            target.display(),
            total.map_or("?".to_string(), |n| n.to_string())
        );

        fs::create_dir_all(&self.dir).map_err(FetchError::download)?;
        let mut reader = resp.body_mut().as_reader();
        let mut received: u64 = 0;
        write_atomically(&target, |file| {
            let mut buf = vec![0u8; CHUNK_SIZE];
            loop {
                let n = match reader.read(&mut buf) {
                    Ok(0) => return Ok(()),
                    Ok(n) => n,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(e),
                };
                file.write_all(&buf[..n])?;
                received += n as u64;
                if let Some(total) = total {
                    progress((received as f64 / total as f64).min(1.0) as f32);
                }
            }
        })
        .map_err(FetchError::download)?;

        info!("download: {} complete ({received} bytes)", target.display());
        Ok(target)
    }
}

/// File name for a download: last URL path segment, or the entry id.
pub fn file_name_for(url: &str, id: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or("");
    // Skip scheme and host so a bare domain never becomes a file name.
    let path = match path.split_once("://") {
        Some((_, rest)) => rest.split_once('/').map_or("", |(_, p)| p),
        None => path,
    };
    let last = path
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty());
    let raw = last.unwrap_or(id);
    let cleaned: String = raw
        .chars()
        .map(|c| if c.is_alphanumeric() || "._-".contains(c) { c } else { '_' })
        .collect();
    if cleaned.trim_matches('.').is_empty() {
        format!("{id}.bin")
    } else {
        cleaned
    }
}

// ---------------------------------------------------------------------------
// Posters / subtitles
// ---------------------------------------------------------------------------

/// Fetches one enrichment kind from a URL template containing `{id}`.
///
/// With no template configured every fetch is a miss.
pub struct HttpAssetProvider {
    kind: Enrichment,
    agent: Agent,
    template: Option<String>,
    dir: PathBuf,
}

impl HttpAssetProvider {
    pub fn new(kind: Enrichment, agent: Agent, template: Option<String>, dir: PathBuf) -> Self {
        Self {
            kind,
            agent,
            template,
            dir,
        }
    }

    fn url_for(&self, entry: &Entry) -> Option<String> {
        self.template
            .as_deref()
            .map(|t| t.replace("{id}", &entry.id.0))
    }

    fn cache_path(&self, entry: &Entry, url: &str) -> PathBuf {
        let ext = Path::new(url.split(['?', '#']).next().unwrap_or(""))
            .extension()
            .and_then(|e| e.to_str())
            .filter(|e| e.len() <= 5 && e.chars().all(|c| c.is_ascii_alphanumeric()))
            .unwrap_or("bin");
        let stem = file_name_for("", &entry.id.0);
        self.dir
            .join(self.kind.to_string())
            .join(format!("{stem}.{ext}"))
    }
}

impl EnrichmentProvider for HttpAssetProvider {
    fn fetch(&mut self, entry: &Entry) -> Result<Option<PathBuf>, FetchError> {
        let Some(url) = self.url_for(entry) else {
            return Ok(None);
        };
        let path = self.cache_path(entry, &url);
        if path.is_file() {
            debug!("{}: cache hit {}", self.kind, path.display());
            return Ok(Some(path));
        }

        let mut resp = match self.agent.get(&url).call() {
            Ok(resp) => resp,
            Err(ureq::Error::StatusCode(404)) => {
                debug!("{}: none for {} ({url})", self.kind, entry.id);
                return Ok(None);
            }
            Err(e) => return Err(FetchError::unavailable(e)),
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(FetchError::unavailable)?;
        }
        let mut reader = resp.body_mut().as_reader();
        write_atomically(&path, |file| io::copy(&mut reader, file).map(|_| ()))
            .map_err(FetchError::unavailable)?;
        debug!("{}: stored {}", self.kind, path.display());
        Ok(Some(path))
    }
}

/// Write `target` through a sibling `.part` file, renaming on success and
/// removing the partial file on failure.
fn write_atomically(
    target: &Path,
    fill: impl FnOnce(&mut File) -> io::Result<()>,
) -> io::Result<()> {
    let mut part = target.as_os_str().to_owned();
    part.push(".part");
    let part = PathBuf::from(part);

    let result = File::create(&part).and_then(|mut file| {
        fill(&mut file)?;
        file.flush()
    });
    match result {
        Ok(()) => fs::rename(&part, target),
        Err(e) => {
            let _ = fs::remove_file(&part);
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EntryPayload;
    use std::io::{BufRead, BufReader};
    use std::net::TcpListener;
    use std::thread;

    fn entry(id: &str, url: &str) -> Entry {
        Entry::from(EntryPayload {
            id: id.into(),
            title: id.to_string(),
            download_url: url.to_string(),
        })
    }

    /// Serve one canned HTTP response per connection, `count` times.
    fn serve(count: usize, status: &'static str, body: Vec<u8>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        thread::spawn(move || {
            for stream in listener.incoming().take(count) {
                let mut stream = stream.unwrap();
                let mut reader = BufReader::new(stream.try_clone().unwrap());
                let mut line = String::new();
                while reader.read_line(&mut line).unwrap() > 2 {
                    line.clear();
                }
                write!(
                    stream,
                    "HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    body.len()
                )
                .unwrap();
                stream.write_all(&body).unwrap();
            }
        });
        format!("http://{addr}")
    }

    #[test]
    fn file_name_from_url() {
        assert_eq!(
            file_name_for("https://example.invalid/t/Show.S01E02.torrent?x=1", "id"),
            "Show.S01E02.torrent"
        );
        assert_eq!(file_name_for("https://example.invalid/a b/c d.mkv", "id"), "c_d.mkv");
    }

    #[test]
    fn file_name_falls_back_to_id() {
        assert_eq!(file_name_for("https://example.invalid/", "ep-1"), "ep-1");
        assert_eq!(file_name_for("", "ep-2"), "ep-2");
        assert_eq!(file_name_for("", ".."), "...bin");
    }

    #[test]
    fn download_reports_non_decreasing_progress() {
        let body = vec![7u8; 200_000];
        let base = serve(1, "200 OK", body.clone());
        let dir = tempfile::tempdir().unwrap();
        let mut dl = HttpDownloader::new(agent(Duration::from_secs(5)), dir.path().to_path_buf());

        let mut seen = Vec::new();
        let path = dl
            .start(&entry("e1", &format!("{base}/files/e1.mkv")), &mut |p| seen.push(p))
            .unwrap();

        assert_eq!(path, dir.path().join("e1.mkv"));
        assert_eq!(fs::read(&path).unwrap(), body);
        assert!(!seen.is_empty());
        assert!(seen.windows(2).all(|w| w[0] <= w[1]), "{seen:?}");
        assert_eq!(*seen.last().unwrap(), 1.0);
        assert!(!dir.path().join("e1.mkv.part").exists());
    }

    #[test]
    fn download_http_error_is_download_failed() {
        let base = serve(1, "500 Internal Server Error", Vec::new());
        let dir = tempfile::tempdir().unwrap();
        let mut dl = HttpDownloader::new(agent(Duration::from_secs(5)), dir.path().to_path_buf());
        let err = dl
            .start(&entry("e1", &format!("{base}/e1.mkv")), &mut |_| {})
            .unwrap_err();
        assert!(matches!(err, FetchError::DownloadFailed(_)));
    }

    #[test]
    fn asset_without_template_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let mut p = HttpAssetProvider::new(
            Enrichment::Poster,
            agent(Duration::from_secs(1)),
            None,
            dir.path().to_path_buf(),
        );
        assert_eq!(p.fetch(&entry("a", "")).unwrap(), None);
    }

    #[test]
    fn asset_404_is_a_miss() {
        let base = serve(1, "404 Not Found", Vec::new());
        let dir = tempfile::tempdir().unwrap();
        let mut p = HttpAssetProvider::new(
            Enrichment::Subtitle,
            agent(Duration::from_secs(5)),
            Some(format!("{base}/subs/{{id}}.srt")),
            dir.path().to_path_buf(),
        );
        assert_eq!(p.fetch(&entry("a", "")).unwrap(), None);
    }

    #[test]
    fn asset_is_fetched_once_then_cached() {
        let base = serve(1, "200 OK", b"JPEG".to_vec());
        let dir = tempfile::tempdir().unwrap();
        let mut p = HttpAssetProvider::new(
            Enrichment::Poster,
            agent(Duration::from_secs(5)),
            Some(format!("{base}/posters/{{id}}.jpg")),
            dir.path().to_path_buf(),
        );
        let e = entry("show-1", "");
        let first = p.fetch(&e).unwrap().expect("poster");
        assert_eq!(first, dir.path().join("poster").join("show-1.jpg"));
        assert_eq!(fs::read(&first).unwrap(), b"JPEG");
        // The server only answers once; a second fetch must come from disk.
        let second = p.fetch(&e).unwrap().expect("cached poster");
        assert_eq!(first, second);
    }

    #[test]
    fn asset_unreachable_is_source_unavailable() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let dir = tempfile::tempdir().unwrap();
        let mut p = HttpAssetProvider::new(
            Enrichment::Poster,
            agent(Duration::from_secs(2)),
            Some(format!("http://{addr}/{{id}}.jpg")),
            dir.path().to_path_buf(),
        );
        assert!(matches!(
            p.fetch(&entry("a", "")),
            Err(FetchError::SourceUnavailable(_))
        ));
    }
}
