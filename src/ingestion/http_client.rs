//! Shared HTTP agent and bounded download helpers.

use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use tracing::{debug, info, warn};
use url::Url;

use crate::utils::error::{KidneyError, Result};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
const READ_TIMEOUT: Duration = Duration::from_secs(120);
const WRITE_TIMEOUT: Duration = Duration::from_secs(60);

/// Upper bound for any single download (dataset archives, checkpoints)
pub const MAX_DOWNLOAD_BYTES: usize = 3 * 1024 * 1024 * 1024;

/// Largest HTML page read while looking for a Drive confirmation form
const MAX_INTERSTITIAL_BYTES: usize = 2 * 1024 * 1024;

const USER_AGENT: &str = concat!("kidney-ct/", env!("CARGO_PKG_VERSION"));

/// Return a shared HTTP agent with consistent timeouts.
pub fn agent() -> &'static ureq::Agent {
    static AGENT: OnceLock<ureq::Agent> = OnceLock::new();
    AGENT.get_or_init(|| {
        ureq::AgentBuilder::new()
            .timeout_connect(CONNECT_TIMEOUT)
            .timeout_read(READ_TIMEOUT)
            .timeout_write(WRITE_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
    })
}

/// Rewrite a Google Drive share link to its direct-download form.
///
/// `https://drive.google.com/file/d/<id>/view?...` becomes
/// `https://drive.google.com/uc?export=download&id=<id>`. Anything else is
/// returned unchanged.
pub fn direct_download_url(source: &str) -> Result<String> {
    let url = Url::parse(source)
        .map_err(|e| KidneyError::Download(format!("invalid URL '{}': {}", source, e)))?;

    if url.host_str() != Some("drive.google.com") {
        return Ok(source.to_string());
    }
    let segments: Vec<&str> = url.path_segments().map(|s| s.collect()).unwrap_or_default();
    match segments.as_slice() {
        ["file", "d", id, ..] if !id.is_empty() => {
            let mut direct = Url::parse("https://drive.google.com/uc")
                .map_err(|e| KidneyError::Download(e.to_string()))?;
            direct
                .query_pairs_mut()
                .append_pair("export", "download")
                .append_pair("id", id);
            Ok(direct.to_string())
        }
        _ => Ok(source.to_string()),
    }
}

/// Stream a response to the provided writer, enforcing a maximum byte size.
pub fn copy_response_to_writer(
    response: ureq::Response,
    writer: &mut impl Write,
    max_bytes: usize,
) -> std::result::Result<u64, io::Error> {
    check_content_length(&response, max_bytes)?;
    let reader = response.into_reader();
    let mut limited = reader.take(max_bytes as u64 + 1);
    let mut total = 0usize;
    let mut buf = [0u8; 64 * 1024];
    loop {
        let read = limited.read(&mut buf)?;
        if read == 0 {
            break;
        }
        total += read;
        if total > max_bytes {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Response exceeded {max_bytes} bytes"),
            ));
        }
        writer.write_all(&buf[..read])?;
    }
    Ok(total as u64)
}

fn check_content_length(
    response: &ureq::Response,
    max_bytes: usize,
) -> std::result::Result<(), io::Error> {
    let Some(length) = response.header("Content-Length") else {
        return Ok(());
    };
    let Ok(length) = length.parse::<u64>() else {
        return Ok(());
    };
    if length > max_bytes as u64 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Response too large: {length} bytes"),
        ));
    }
    Ok(())
}

/// Follow-up URL hidden in Drive's "cannot scan this file for viruses" page.
///
/// Current pages carry a `download-form` whose hidden inputs (`id`,
/// `export`, `confirm`, `uuid`) become the query string of the form action.
/// Older pages link to `/uc?export=download&confirm=...` instead.
pub fn drive_confirm_url(html: &str, page_url: &str) -> Option<String> {
    let base = Url::parse(page_url).ok()?;
    let form = Regex::new(r#"(?s)<form[^>]*action="([^"]+)"[^>]*>(.*?)</form>"#).ok()?;
    let hidden = Regex::new(r#"<input[^>]*type="hidden"[^>]*name="([^"]+)"[^>]*value="([^"]*)""#).ok()?;

    for caps in form.captures_iter(html) {
        let inputs: Vec<(String, String)> = hidden
            .captures_iter(&caps[2])
            .map(|c| (unescape(&c[1]), unescape(&c[2])))
            .collect();
        if !inputs.iter().any(|(name, _)| name == "confirm") {
            continue;
        }
        let mut action = base.join(&unescape(&caps[1])).ok()?;
        action.set_query(None);
        action.query_pairs_mut().extend_pairs(inputs.iter());
        return Some(action.to_string());
    }

    let link = Regex::new(r#"href="(/uc\?export=download[^"]*confirm=[^"]+)""#).ok()?;
    let href = link.captures(html)?;
    base.join(&unescape(&href[1])).ok().map(|u| u.to_string())
}

fn unescape(text: &str) -> String {
    text.replace("&amp;", "&").replace("&#39;", "'").replace("&quot;", "\"")
}

fn is_html(response: &ureq::Response) -> bool {
    response.content_type().eq_ignore_ascii_case("text/html")
}

fn get(url: &str) -> Result<ureq::Response> {
    agent()
        .get(url)
        .call()
        .map_err(|e| KidneyError::Download(format!("GET {} failed: {}", url, e)))
}

/// `<dest>.part`, the file a download streams into before it is renamed.
pub fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    dest.with_file_name(name)
}

/// Download `url` to `dest`, rejecting HTML bodies and oversized responses.
///
/// A Drive virus-scan interstitial is followed once. The body is streamed
/// into `<dest>.part` and renamed on success, so a failed transfer never
/// leaves a truncated `dest` behind. Returns the number of bytes written.
pub fn download_to_file(url: &str, dest: &Path, max_bytes: usize) -> Result<u64> {
    let mut response = get(url)?;

    if is_html(&response) {
        let mut page = Vec::new();
        copy_response_to_writer(response, &mut page, MAX_INTERSTITIAL_BYTES)
            .map_err(|e| KidneyError::Download(format!("reading {} failed: {}", url, e)))?;
        let page = String::from_utf8_lossy(&page);
        let Some(confirmed) = drive_confirm_url(&page, url) else {
            return Err(KidneyError::Download(format!(
                "{} returned an HTML page instead of a file; is it publicly shared?",
                url
            )));
        };
        info!("Large Drive file, following the download confirmation");
        response = get(&confirmed)?;
        if is_html(&response) {
            return Err(KidneyError::Download(format!(
                "{} still returned an HTML page after confirmation",
                confirmed
            )));
        }
    }

    if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let part = partial_path(dest);
    let written = match write_body(response, &part, max_bytes) {
        Ok(written) => written,
        Err(e) => {
            if let Err(cleanup) = std::fs::remove_file(&part) {
                warn!("Could not remove {}: {}", part.display(), cleanup);
            }
            return Err(KidneyError::Download(format!("reading {} failed: {}", url, e)));
        }
    };
    if dest.exists() {
        std::fs::remove_file(dest)?;
    }
    std::fs::rename(&part, dest)?;
    debug!("Wrote {} bytes to {}", written, dest.display());
    Ok(written)
}

fn write_body(response: ureq::Response, path: &Path, max_bytes: usize) -> io::Result<u64> {
    let mut file = BufWriter::new(File::create(path)?);
    let written = copy_response_to_writer(response, &mut file, max_bytes)?;
    file.flush()?;
    Ok(written)
}
