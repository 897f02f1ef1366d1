//! Query string and form decoding.
//!
//! [`QueryParams`] collects the parameters of one request: the query string,
//! an `application/x-www-form-urlencoded` body, or the fields and files of a
//! `multipart/form-data` body. Multipart bodies are decoded while they stream
//! in by [`MultipartDecoder`]; file parts are written to temporary files that
//! are deleted again when the parameters are cleared or dropped.

use std::collections::HashMap;
use std::path::PathBuf;

use tokio::fs::File;
use tokio::io::AsyncWriteExt;

use crate::config::UploadConfig;
use crate::error::MultipartError;
use crate::http::header::{HeaderName, HeaderSpan};

/// Longest accepted header block of a single multipart part.
const MAX_PART_HEADERS_LENGTH: usize = 4096;

const UNKNOWN_FILE_CONTENT_TYPE: &str = "application/octet-stream";

/// A file received through a multipart upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    /// Temporary file holding the data.
    pub path: PathBuf,
    /// File name the client sent.
    pub file_name: String,
    pub content_type: String,
    pub size: u64,
}

#[derive(Debug, Default)]
pub struct QueryParams {
    params: HashMap<String, String>,
    files: HashMap<String, UploadedFile>,
}

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes `name=value&...` pairs. A repeated name keeps the last value.
    pub fn add_url_encoded(&mut self, data: &[u8]) {
        for (name, value) in url::form_urlencoded::parse(data) {
            self.params.insert(name.into_owned(), value.into_owned());
        }
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.params.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    pub fn get_or<'a>(&'a self, name: &str, default: &'a str) -> &'a str {
        self.get(name).unwrap_or(default)
    }

    pub fn params(&self) -> &HashMap<String, String> {
        &self.params
    }

    pub fn file(&self, name: &str) -> Option<&UploadedFile> {
        self.files.get(name)
    }

    pub fn files(&self) -> &HashMap<String, UploadedFile> {
        &self.files
    }

    /// Removes a file from the parameters. The caller becomes responsible for
    /// its temporary file.
    pub fn take_file(&mut self, name: &str) -> Option<UploadedFile> {
        self.files.remove(name)
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty() && self.files.is_empty()
    }

    /// Deletes the temporary files of every upload.
    pub fn delete_uploaded_files(&mut self) {
        for (_, file) in self.files.drain() {
            if let Err(e) = std::fs::remove_file(&file.path) {
                tracing::debug!(path = %file.path.display(), error = %e, "failed to delete upload");
            }
        }
    }

    /// Drops all parameters and deletes uploaded files.
    pub fn clear(&mut self) {
        self.delete_uploaded_files();
        self.params.clear();
    }

    fn start_file(&mut self, name: &str, file: UploadedFile) {
        if let Some(previous) = self.files.insert(name.to_string(), file) {
            let _ = std::fs::remove_file(previous.path);
        }
    }
}

impl Drop for QueryParams {
    fn drop(&mut self) {
        self.delete_uploaded_files();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    /// Skipping everything before the first delimiter.
    Preamble,
    /// Directly after a delimiter; expecting `\r\n` or the closing `--`.
    AfterDelimiter { first: Option<u8> },
    PartHeaders,
    Body,
    /// Closing delimiter seen; the rest is ignored.
    Epilogue,
}

/// Where the data of the current part goes.
enum PartTarget {
    Param { name: String, value: Vec<u8> },
    File { name: String, file: File, size: u64 },
    Discard,
}

/// Streaming `multipart/form-data` decoder.
///
/// The body may be fed in chunks of any size; delimiters split across chunks
/// are recognized.
pub struct MultipartDecoder {
    /// `\r\n--` followed by the boundary.
    delimiter: Vec<u8>,
    matched: usize,
    state: DecodeState,
    part_headers: Vec<u8>,
    target: PartTarget,
    /// Part data collected during one `feed` call.
    pending: Vec<u8>,
    upload: UploadConfig,
    total_uploaded: u64,
}

impl MultipartDecoder {
    pub fn new(boundary: &str, upload: UploadConfig) -> Self {
        let mut delimiter = Vec::with_capacity(boundary.len() + 4);
        delimiter.extend_from_slice(b"\r\n--");
        delimiter.extend_from_slice(boundary.as_bytes());

        Self {
            delimiter,
            // The first delimiter of the body is not preceded by a line break.
            matched: 2,
            state: DecodeState::Preamble,
            part_headers: Vec::new(),
            target: PartTarget::Discard,
            pending: Vec::new(),
            upload,
            total_uploaded: 0,
        }
    }

    /// Decodes the next chunk of the body into `query`.
    pub async fn feed(&mut self, data: &[u8], query: &mut QueryParams) -> Result<(), MultipartError> {
        for &byte in data {
            match self.state {
                DecodeState::Preamble | DecodeState::Body => {
                    if self.scan_delimiter(byte) {
                        self.flush_pending(query).await?;
                        self.end_part(query).await?;
                        self.state = DecodeState::AfterDelimiter { first: None };
                    }
                }
                DecodeState::AfterDelimiter { first } => match (first, byte) {
                    (None, b'-' | b'\r') => {
                        self.state = DecodeState::AfterDelimiter { first: Some(byte) };
                    }
                    (None, b' ' | b'\t') => {}
                    (Some(b'-'), b'-') => self.state = DecodeState::Epilogue,
                    (Some(b'\r'), b'\n') => {
                        self.part_headers.clear();
                        self.state = DecodeState::PartHeaders;
                    }
                    _ => return Err(MultipartError::MalformedDelimiter),
                },
                DecodeState::PartHeaders => {
                    self.part_headers.push(byte);
                    if self.part_headers == b"\r\n" {
                        return Err(MultipartError::MissingPartName);
                    }
                    if self.part_headers.ends_with(b"\r\n\r\n") {
                        self.start_part(query).await?;
                        self.state = DecodeState::Body;
                    } else if self.part_headers.len() > MAX_PART_HEADERS_LENGTH {
                        return Err(MultipartError::PartHeadersTooLong);
                    }
                }
                DecodeState::Epilogue => break,
            }
        }

        self.flush_pending(query).await
    }

    /// Completes the last part when the body ends without a closing delimiter.
    pub async fn finish(&mut self, query: &mut QueryParams) -> Result<(), MultipartError> {
        if self.state == DecodeState::Body && self.matched > 0 {
            let partial = self.delimiter[..self.matched].to_vec();
            self.pending.extend_from_slice(&partial);
            self.matched = 0;
        }
        self.flush_pending(query).await?;
        self.end_part(query).await?;
        self.state = DecodeState::Epilogue;
        Ok(())
    }

    /// Advances the delimiter match by one byte. Bytes that turn out not to
    /// belong to a delimiter are queued as part data.
    fn scan_delimiter(&mut self, byte: u8) -> bool {
        if byte == self.delimiter[self.matched] {
            self.matched += 1;
            if self.matched == self.delimiter.len() {
                self.matched = 0;
                return true;
            }
            return false;
        }

        if self.matched > 0 {
            if self.state == DecodeState::Body {
                self.pending.extend_from_slice(&self.delimiter[..self.matched]);
            }
            self.matched = 0;
            if byte == self.delimiter[0] {
                self.matched = 1;
                return false;
            }
        }

        if self.state == DecodeState::Body {
            self.pending.push(byte);
        }
        false
    }

    async fn flush_pending(&mut self, query: &mut QueryParams) -> Result<(), MultipartError> {
        if self.pending.is_empty() {
            return Ok(());
        }

        match &mut self.target {
            PartTarget::Param { value, .. } => value.extend_from_slice(&self.pending),
            PartTarget::File { name, file, size } => {
                let len = self.pending.len() as u64;
                *size += len;
                self.total_uploaded += len;
                if *size > self.upload.max_file_size || self.total_uploaded > self.upload.max_total_size {
                    return Err(MultipartError::UploadLimitExceeded);
                }
                file.write_all(&self.pending).await?;
                if let Some(upload) = query.files.get_mut(name.as_str()) {
                    upload.size = *size;
                }
            }
            PartTarget::Discard => {}
        }

        self.pending.clear();
        Ok(())
    }

    async fn end_part(&mut self, query: &mut QueryParams) -> Result<(), MultipartError> {
        match std::mem::replace(&mut self.target, PartTarget::Discard) {
            PartTarget::Param { name, value } => {
                query.insert(name, String::from_utf8_lossy(&value));
            }
            PartTarget::File { mut file, .. } => file.flush().await?,
            PartTarget::Discard => {}
        }
        Ok(())
    }

    async fn start_part(&mut self, query: &mut QueryParams) -> Result<(), MultipartError> {
        let mut name = None;
        let mut file_name = None;
        let mut content_type = None;

        let block = &self.part_headers[..self.part_headers.len() - 4];
        let mut offset = 0;
        for line in block.split(|&b| b == b'\n') {
            let trimmed = line.strip_suffix(b"\r").unwrap_or(line);
            if let Ok(span) = HeaderSpan::parse(trimmed, offset) {
                let header = span.view(block);
                match header.kind {
                    HeaderName::ContentDisposition => {
                        let (part_name, part_file) = header.content_disposition();
                        name = part_name.map(str::to_string);
                        file_name = part_file.map(str::to_string);
                    }
                    HeaderName::ContentType => content_type = Some(header.value.to_string()),
                    _ => {}
                }
            }
            offset += line.len() + 1;
        }

        let name = name.filter(|name| !name.is_empty()).ok_or(MultipartError::MissingPartName)?;

        self.target = match file_name {
            None => PartTarget::Param { name, value: Vec::new() },
            Some(_) if self.upload.max_file_size == 0 || self.upload.max_total_size == 0 => {
                PartTarget::Discard
            }
            Some(file_name) => {
                let path = self.upload.root().join(uuid::Uuid::new_v4().to_string());
                let file = File::create(&path).await?;
                query.start_file(
                    &name,
                    UploadedFile {
                        path,
                        file_name,
                        content_type: content_type.unwrap_or_else(|| UNKNOWN_FILE_CONTENT_TYPE.to_string()),
                        size: 0,
                    },
                );
                PartTarget::File { name, file, size: 0 }
            }
        };
        Ok(())
    }
}
