//! Multipart form parsing helpers
//!
//! Collects every `file` part of an upload plus its text fields. Per-file
//! checks (type, size, decodability) happen in the staging area so that one
//! bad file is reported instead of failing the whole request.

use std::collections::HashMap;

use axum::extract::Multipart;
use mediaquiz_core::Upload;

use crate::error::ApiError;
use crate::validation::validate_file_count;

/// Represents a file uploaded via multipart form
#[derive(Debug, Clone)]
pub struct FileField {
    /// File data bytes
    pub data: Vec<u8>,
    /// Content-Type from the multipart field (if provided)
    pub content_type: Option<String>,
    /// Original filename from the multipart field (if provided)
    pub file_name: Option<String>,
}

impl FileField {
    /// Convert into a staging upload. Unnamed parts get a positional name.
    pub fn into_upload(self, position: usize) -> Upload {
        Upload {
            filename: self
                .file_name
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| format!("file-{position}")),
            content_type: self
                .content_type
                .unwrap_or_else(|| "application/octet-stream".to_string())
                .to_lowercase(),
            bytes: self.data,
        }
    }
}

/// Parsed multipart form fields
#[derive(Debug)]
pub struct MultipartFields {
    files: Vec<FileField>,
    text_fields: HashMap<String, String>,
}

impl MultipartFields {
    /// Parse all fields from a multipart request
    ///
    /// Fails as soon as more than `max_files` file parts have been seen.
    pub async fn parse(multipart: &mut Multipart, max_files: usize) -> Result<Self, ApiError> {
        let mut files = Vec::new();
        let mut text_fields = HashMap::new();

        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| ApiError::bad_request(format!("Failed to parse multipart: {}", e)))?
        {
            let name = field.name().unwrap_or("").to_string();

            if name == "file" {
                let content_type = field.content_type().map(|s| s.to_string());
                let file_name = field.file_name().map(|s| s.to_string());

                let data = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("Failed to read file: {}", e)))?
                    .to_vec();

                files.push(FileField {
                    data,
                    content_type,
                    file_name,
                });
                validate_file_count(files.len(), max_files)?;
            } else {
                let value = field.text().await.map_err(|e| {
                    ApiError::bad_request(format!("Failed to read field '{}': {}", name, e))
                })?;
                text_fields.insert(name, value);
            }
        }

        Ok(Self { files, text_fields })
    }

    /// Take the file parts, requiring at least one
    pub fn take_files(&mut self) -> Result<Vec<FileField>, ApiError> {
        if self.files.is_empty() {
            return Err(ApiError::bad_request(
                "No file provided. Use 'file' fields in multipart form.",
            ));
        }
        Ok(std::mem::take(&mut self.files))
    }

    /// Get a text field value
    ///
    /// Returns `None` if the field is not present.
    pub fn get_text(&self, name: &str) -> Option<&str> {
        self.text_fields.get(name).map(|s| s.as_str())
    }

    /// Get a required text field value
    pub fn require_text(&self, name: &str) -> Result<&str, ApiError> {
        self.get_text(name)
            .ok_or_else(|| ApiError::bad_request(format!("Missing '{}' field", name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_text() {
        let mut text_fields = HashMap::new();
        text_fields.insert("item".to_string(), "robin".to_string());

        let fields = MultipartFields {
            files: Vec::new(),
            text_fields,
        };

        assert_eq!(fields.get_text("item"), Some("robin"));
        assert_eq!(fields.get_text("missing"), None);
        assert!(fields.require_text("missing").is_err());
    }

    #[test]
    fn test_take_files_missing() {
        let mut fields = MultipartFields {
            files: Vec::new(),
            text_fields: HashMap::new(),
        };

        assert!(fields.take_files().is_err());
    }

    #[test]
    fn test_into_upload_defaults() {
        let field = FileField {
            data: vec![1, 2, 3],
            content_type: Some("IMAGE/PNG".to_string()),
            file_name: None,
        };
        let upload = field.into_upload(2);
        assert_eq!(upload.filename, "file-2");
        assert_eq!(upload.content_type, "image/png");
        assert_eq!(upload.bytes, vec![1, 2, 3]);
    }
}
