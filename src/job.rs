// Building upload jobs from a descriptor and input streams.

use crate::descriptor::Descriptor;
use crate::error::{GsharerError, Result};
use crate::interpret::ResponseHandler;
use crate::multipart::MultipartWriter;
use reqwest::{Method, Url};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// A readable input plus the filename it is uploaded under.
pub struct NamedStream {
    name: String,
    reader: Box<dyn Read + Send>,
}

impl NamedStream {
    pub fn new(name: impl Into<String>, reader: impl Read + Send + 'static) -> Self {
        Self {
            name: name.into(),
            reader: Box::new(reader),
        }
    }

    /// Open `path`, naming the stream after its final component.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self::new(name, file))
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for NamedStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NamedStream")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// A fully materialized request plus the handler for its response.
#[derive(Debug)]
pub struct UploadJob {
    pub destination: String,
    pub method: Method,
    pub url: Url,
    pub content_type: String,
    pub body: Vec<u8>,
    pub handler: ResponseHandler,
    /// Stream names in upload order.
    pub files: Vec<String>,
    /// Text fields written ahead of the files.
    pub fields: BTreeMap<String, String>,
}

impl UploadJob {
    pub fn content_length(&self) -> u64 {
        self.body.len() as u64
    }

    /// Short label for logs and progress bars.
    pub fn label(&self) -> String {
        match self.files.as_slice() {
            [single] => single.clone(),
            files => format!("{} files", files.len()),
        }
    }

    pub fn summary(&self) -> JobSummary {
        JobSummary {
            destination: self.destination.clone(),
            method: self.method.to_string(),
            url: self.url.to_string(),
            fields: self.fields.clone(),
            files: self.files.clone(),
            bytes: self.content_length(),
        }
    }
}

/// What a job will send, for confirmation prompts.
#[derive(Debug, Clone, Serialize)]
pub struct JobSummary {
    pub destination: String,
    pub method: String,
    pub url: String,
    pub fields: BTreeMap<String, String>,
    pub files: Vec<String>,
    pub bytes: u64,
}

/// Combine `descriptor` and `streams` into one job.
///
/// Fields from `request.arguments` come first, then one file part per
/// stream under `request.file_form_name`, in input order. Every stream is
/// read to the end exactly once.
pub fn build_job(descriptor: &Descriptor, streams: Vec<NamedStream>) -> Result<UploadJob> {
    if streams.is_empty() {
        return Err(GsharerError::EmptyJob);
    }

    let request = &descriptor.request;
    let method = Method::from_bytes(request.method.to_ascii_uppercase().as_bytes())
        .map_err(|_| GsharerError::InvalidRequest(format!("bad method '{}'", request.method)))?;
    let url = Url::parse(&request.url)
        .map_err(|err| GsharerError::InvalidRequest(format!("bad URL '{}': {err}", request.url)))?;

    let mut writer = MultipartWriter::new();
    for (name, value) in &request.arguments {
        writer.write_field(name, value);
    }

    let mut files = Vec::with_capacity(streams.len());
    for mut stream in streams {
        writer.write_file(&request.file_form_name, &stream.name, &mut stream.reader)?;
        files.push(stream.name);
    }

    let content_type = writer.content_type();
    Ok(UploadJob {
        destination: descriptor.name.clone(),
        method,
        url,
        content_type,
        body: writer.finish(),
        handler: descriptor.response.clone(),
        files,
        fields: request.arguments.clone(),
    })
}
