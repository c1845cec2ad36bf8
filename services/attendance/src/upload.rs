//! Inbound multipart extraction.
//!
//! Device uploads arrive as `multipart/form-data`. Parts carrying a non-empty
//! filename are collected as files, the rest as plain text values, both in
//! the order the client sent them. Text values are not validated as UTF-8.

use crate::error::ApiError;
use axum::extract::Multipart;
use bytes::Bytes;
use std::collections::HashMap;
use tracing::debug;

/// One file part of an inbound upload
#[derive(Debug, Clone)]
pub struct UploadedFile {
    /// Form field the file was attached under
    pub field: String,
    /// Original filename supplied by the client
    pub file_name: String,
    /// Declared content type, if any
    pub content_type: Option<String>,
    /// File contents
    pub data: Bytes,
}

impl UploadedFile {
    pub fn new(field: &str, file_name: &str, data: impl Into<Bytes>) -> Self {
        Self {
            field: field.to_string(),
            file_name: file_name.to_string(),
            content_type: None,
            data: data.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Fully read multipart form
#[derive(Debug, Default)]
pub struct UploadForm {
    values: HashMap<String, Vec<String>>,
    files: Vec<UploadedFile>,
}

impl UploadForm {
    /// Drain a multipart body into memory.
    ///
    /// A malformed or truncated body is a client error.
    pub async fn read(mut multipart: Multipart) -> Result<Self, ApiError> {
        let mut form = Self::default();

        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| ApiError::bad_request("Failed to parse multipart form data", e))?
        {
            let name = field.name().unwrap_or_default().to_string();
            let file_name = field
                .file_name()
                .filter(|file_name| !file_name.is_empty())
                .map(str::to_string);
            let content_type = field.content_type().map(str::to_string);

            match file_name {
                Some(file_name) => {
                    let data = field
                        .bytes()
                        .await
                        .map_err(|e| ApiError::bad_request("Failed to read uploaded file", e))?;

                    debug!(field = %name, file_name = %file_name, size = data.len(), "Read file part");

                    form.files.push(UploadedFile {
                        field: name,
                        file_name,
                        content_type,
                        data,
                    });
                }
                None => {
                    let raw = field
                        .bytes()
                        .await
                        .map_err(|e| ApiError::bad_request("Failed to read form value", e))?;
                    let value = String::from_utf8_lossy(&raw).into_owned();
                    form.values.entry(name).or_default().push(value);
                }
            }
        }

        Ok(form)
    }

    /// First text value submitted under `name`
    pub fn text(&self, name: &str) -> Option<&str> {
        self.values
            .get(name)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// Remove and return every file submitted under `name`, in submitted order
    pub fn take_files(&mut self, name: &str) -> Vec<UploadedFile> {
        let (taken, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut self.files)
            .into_iter()
            .partition(|file| file.field == name);
        self.files = rest;
        taken
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::extract::FromRequest;
    use axum::http::{header, Request};

    const BOUNDARY: &str = "attendance-test-boundary";

    fn part(name: &str, file_name: Option<&str>, body: &str) -> String {
        let disposition = match file_name {
            Some(file_name) => format!(
                "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: image/jpeg",
                name, file_name
            ),
            None => format!("Content-Disposition: form-data; name=\"{}\"", name),
        };
        format!("--{}\r\n{}\r\n\r\n{}\r\n", BOUNDARY, disposition, body)
    }

    async fn multipart_from(body: impl Into<Body>) -> Multipart {
        let request = Request::builder()
            .method("POST")
            .uri("/register")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(body.into())
            .unwrap();

        Multipart::from_request(request, &()).await.unwrap()
    }

    #[tokio::test]
    async fn test_read_separates_values_and_files() {
        let body = [
            part("user_id", None, "42"),
            part("images", Some("front.jpg"), "front-bytes"),
            part("images", Some("side.jpg"), "side-bytes"),
            part("notes", Some("ignored.txt"), "n"),
        ]
        .concat()
            + &format!("--{}--\r\n", BOUNDARY);

        let mut form = UploadForm::read(multipart_from(body).await).await.unwrap();

        assert_eq!(form.text("user_id"), Some("42"));
        assert_eq!(form.text("missing"), None);

        let images = form.take_files("images");
        let names: Vec<&str> = images.iter().map(|f| f.file_name.as_str()).collect();
        assert_eq!(names, vec!["front.jpg", "side.jpg"]);
        assert_eq!(images[0].data, Bytes::from_static(b"front-bytes"));
        assert_eq!(images[0].content_type.as_deref(), Some("image/jpeg"));

        // Taken files are gone, others remain
        assert!(form.take_files("images").is_empty());
        assert_eq!(form.take_files("notes").len(), 1);
    }

    #[tokio::test]
    async fn test_read_empty_form() {
        let body = format!("--{}--\r\n", BOUNDARY);
        let mut form = UploadForm::read(multipart_from(body).await).await.unwrap();
        assert!(form.take_files("frames").is_empty());
    }

    #[tokio::test]
    async fn test_read_tolerates_non_utf8_value() {
        let mut body = format!(
            "--{}\r\nContent-Disposition: form-data; name=\"session\"\r\n\r\n",
            BOUNDARY
        )
        .into_bytes();
        body.extend_from_slice(&[0xff, 0xfe, b'a']);
        body.extend_from_slice(b"\r\n");
        body.extend_from_slice(part("frames", Some("a.jpg"), "a-bytes").as_bytes());
        body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());

        let mut form = UploadForm::read(multipart_from(body).await).await.unwrap();

        assert_eq!(form.text("session"), Some("\u{fffd}\u{fffd}a"));
        assert_eq!(form.take_files("frames").len(), 1);
    }

    #[tokio::test]
    async fn test_read_empty_filename_is_a_value() {
        let body = format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"images\"; filename=\"\"\r\n\r\n\r\n--{b}--\r\n",
            b = BOUNDARY
        );

        let mut form = UploadForm::read(multipart_from(body).await).await.unwrap();

        assert!(form.take_files("images").is_empty());
        assert_eq!(form.text("images"), Some(""));
    }

    #[tokio::test]
    async fn test_read_truncated_body_is_client_error() {
        let body = format!(
            "--{}\r\nContent-Disposition: form-data; name=\"frames\"; filename=\"a.jpg\"\r\n\r\npartial",
            BOUNDARY
        );
        let result = UploadForm::read(multipart_from(body).await).await;
        assert!(matches!(result, Err(ApiError::BadRequest(_))));
    }
}
