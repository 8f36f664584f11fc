// In-memory `multipart/form-data` encoder.
//
// The whole body is built up front so the exact content length is known
// before the request is sent; progress bars are sized from it.

use std::io::{self, Read};
use uuid::Uuid;

const FILE_CONTENT_TYPE: &str = "application/octet-stream";

pub struct MultipartWriter {
    boundary: String,
    body: Vec<u8>,
    parts: usize,
}

impl MultipartWriter {
    /// Writer with a fresh random boundary.
    pub fn new() -> Self {
        Self::with_boundary(Uuid::new_v4().simple().to_string())
    }

    pub fn with_boundary(boundary: impl Into<String>) -> Self {
        Self {
            boundary: boundary.into(),
            body: Vec::new(),
            parts: 0,
        }
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// Value for the request's `Content-Type` header.
    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    pub fn write_field(&mut self, name: &str, value: &str) {
        self.open_part(&format!(
            "Content-Disposition: form-data; name=\"{}\"\r\n",
            escape_header_value(name)
        ));
        self.body.extend_from_slice(value.as_bytes());
    }

    /// Copy `reader` to exhaustion as a file part. Returns the bytes copied.
    pub fn write_file<R: Read + ?Sized>(
        &mut self,
        field: &str,
        filename: &str,
        reader: &mut R,
    ) -> io::Result<u64> {
        self.open_part(&format!(
            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n\
             Content-Type: {FILE_CONTENT_TYPE}\r\n",
            escape_header_value(field),
            escape_header_value(filename)
        ));
        io::copy(reader, &mut self.body)
    }

    /// Write the closing boundary and hand back the body.
    pub fn finish(mut self) -> Vec<u8> {
        if self.parts > 0 {
            self.body.extend_from_slice(b"\r\n");
        }
        self.body
            .extend_from_slice(format!("--{}--\r\n", self.boundary).as_bytes());
        self.body
    }

    fn open_part(&mut self, headers: &str) {
        if self.parts > 0 {
            self.body.extend_from_slice(b"\r\n");
        }
        self.body
            .extend_from_slice(format!("--{}\r\n{headers}\r\n", self.boundary).as_bytes());
        self.parts += 1;
    }
}

impl Default for MultipartWriter {
    fn default() -> Self {
        Self::new()
    }
}

/// Quote-escape a header parameter; CR and LF are percent-encoded so a name
/// can never end the header block.
fn escape_header_value(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\r', "%0D")
        .replace('\n', "%0A")
}
