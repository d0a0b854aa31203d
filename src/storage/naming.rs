//! Unique destination names for uploads.
//!
//! The host decides how collisions are avoided; [`UniqueNamer`] is that
//! policy.  [`SuffixNamer`] sanitizes the upload's name and appends `-1`,
//! `-2`, ... until the name is free in the target directory.

use std::future::Future;
use std::pin::Pin;

use super::{Image, ImageStorage};
use crate::errors::StorageError;

/// Policy producing a file name that is not yet taken in `dir`.
pub trait UniqueNamer: Send + Sync + 'static {
    fn unique_file_name<'a>(
        &'a self,
        storage: &'a ImageStorage,
        image: &'a Image,
        dir: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<String, StorageError>> + Send + 'a>>;
}

/// Sanitized base name plus a numeric suffix on collision.
#[derive(Debug, Clone, Copy, Default)]
pub struct SuffixNamer;

impl UniqueNamer for SuffixNamer {
    fn unique_file_name<'a>(
        &'a self,
        storage: &'a ImageStorage,
        image: &'a Image,
        dir: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<String, StorageError>> + Send + 'a>> {
        Box::pin(async move {
            let (stem, ext) = split_extension(&image.name);
            let stem = sanitize(stem);
            let mut attempt = 0u32;
            loop {
                let candidate = if attempt == 0 {
                    format!("{stem}{ext}")
                } else {
                    format!("{stem}-{attempt}{ext}")
                };
                if !storage.exists(&candidate, dir).await {
                    return Ok(candidate);
                }
                attempt += 1;
            }
        })
    }
}

/// Split `name` into stem and extension (with its dot).
///
/// Only the final path component is considered; a leading dot does not
/// start an extension.
pub fn split_extension(name: &str) -> (&str, &str) {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    match base.rfind('.') {
        Some(0) | None => (base, ""),
        Some(idx) => base.split_at(idx),
    }
}

/// Replace every character outside `[A-Za-z0-9_@.-]` with `-`.
pub fn sanitize(stem: &str) -> String {
    let cleaned: String = stem
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '@' | '.' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "image".to_string()
    } else {
        cleaned
    }
}
