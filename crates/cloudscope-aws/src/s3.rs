//! S3 buckets and objects

use std::time::SystemTime;

use aws_sdk_s3::primitives::ByteStream;
use cloudscope_core::error::{Error, Result};
use cloudscope_core::Resource;

use crate::clients::S3Client;
use crate::fetch_error;

pub const BUCKETS: &str = "s3.buckets";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bucket {
    pub name: String,
    pub created: Option<SystemTime>,
}

/// An object body plus its content type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Object {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

impl Object {
    /// The body as UTF-8 text
    pub fn text(&self) -> Result<&str> {
        std::str::from_utf8(&self.bytes)
            .map_err(|e| Error::parse(format!("S3 object is not valid UTF-8: {}", e)))
    }
}

/// Buckets owned by the selected account
pub fn buckets() -> Resource<Vec<Bucket>> {
    Resource::cached(BUCKETS, |ctx| async move {
        let client = ctx.client::<S3Client>()?;
        let response = client
            .list_buckets()
            .send()
            .await
            .map_err(|e| fetch_error(BUCKETS, e))?;

        let mut buckets: Vec<Bucket> = response
            .buckets()
            .iter()
            .filter_map(|b| {
                Some(Bucket {
                    name: b.name()?.to_string(),
                    created: b
                        .creation_date()
                        .and_then(|d| SystemTime::try_from(*d).ok()),
                })
            })
            .collect();
        buckets.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(buckets)
    })
}

/// Bucket names, sorted
pub fn bucket_names() -> Resource<Vec<String>> {
    buckets().map(|buckets| names(buckets))
}

fn names(buckets: &[Bucket]) -> Vec<String> {
    buckets.iter().map(|b| b.name.clone()).collect()
}

/// One object, read fully into memory
pub fn object(bucket: impl Into<String>, key: impl Into<String>) -> Resource<Object> {
    let bucket = bucket.into();
    let key = key.into();
    let id = format!("s3.object:{}/{}", bucket, key);
    Resource::cached(id.clone(), move |ctx| {
        let bucket = bucket.clone();
        let key = key.clone();
        let id = id.clone();
        async move {
            let client = ctx.client::<S3Client>()?;
            let response = client
                .get_object()
                .bucket(&bucket)
                .key(&key)
                .send()
                .await
                .map_err(|e| fetch_error(&id, e))?;

            let content_type = response.content_type().map(str::to_string);
            let body: ByteStream = response.body;
            let bytes = body.collect().await.map_err(|e| {
                Error::fetch(&id, format!("Failed to read S3 object body: {}", e))
            })?;
            Ok(Object {
                bytes: bytes.into_bytes().to_vec(),
                content_type,
            })
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_bucket_names_view() {
        let view = bucket_names();
        assert!(view.is_view());
        assert_eq!(view.cached_id(), BUCKETS);

        let buckets = vec![
            Bucket {
                name: "artifacts".into(),
                created: None,
            },
            Bucket {
                name: "logs".into(),
                created: Some(SystemTime::UNIX_EPOCH),
            },
        ];
        assert_eq!(names(&buckets), vec!["artifacts", "logs"]);
    }

    #[test]
    fn test_object_ids_are_per_key() {
        assert_eq!(object("b", "k/1").cached_id(), "s3.object:b/k/1");
        assert_ne!(object("b", "k/1").cached_id(), object("b", "k/2").cached_id());
    }

    #[test]
    fn test_object_text() {
        let object = Object {
            bytes: b"hello".to_vec(),
            content_type: Some("text/plain".into()),
        };
        assert_eq!(object.text().unwrap(), "hello");

        let binary = Object {
            bytes: vec![0xff, 0xfe],
            content_type: None,
        };
        assert!(binary.text().is_err());
    }
}
