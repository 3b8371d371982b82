//! Embedded partition metadata
//!
//! `data/partitions.json` ships with the crate; settings may point at a
//! replacement file.

use cloudscope_core::error::Result;
use cloudscope_core::{RegionMetadata, Settings};
use once_cell::sync::Lazy;

static EMBEDDED: Lazy<Result<RegionMetadata>> =
    Lazy::new(|| RegionMetadata::from_json(include_str!("../data/partitions.json")));

/// The partition table compiled into this crate
pub fn embedded_metadata() -> Result<RegionMetadata> {
    EMBEDDED.clone()
}

/// The settings' metadata file if one is configured, else the embedded table
pub fn region_metadata(settings: &Settings) -> Result<RegionMetadata> {
    match &settings.region_metadata {
        Some(path) => {
            log::debug!("Loading region metadata from {}", path.display());
            RegionMetadata::from_file(path)
        }
        None => embedded_metadata(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloudscope_core::events::ChangeBus;
    use cloudscope_core::RegionProvider;
    use std::io::Write;
    use std::sync::Arc;

    #[test]
    fn test_embedded_metadata_parses() {
        let metadata = embedded_metadata().unwrap();
        let ids: Vec<_> = metadata.partitions.iter().map(|p| p.id.as_str()).collect();

        assert_eq!(ids, vec!["aws", "aws-cn", "aws-us-gov"]);
        assert_eq!(metadata.default_region, "us-east-1");
    }

    #[test]
    fn test_iam_is_global_everywhere() {
        let provider = RegionProvider::new(Arc::new(ChangeBus::new()), &embedded_metadata().unwrap());

        for partition in provider.partitions() {
            assert!(provider.is_service_global("iam", &partition.id));
            assert!(provider.global_region(&partition.id).is_some());
        }
        assert!(!provider.is_service_global("s3", "aws"));
        assert!(!provider.is_service_global("sts", "aws"));
    }

    #[test]
    fn test_settings_override_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"default_region": "local-1", "partitions": [{{"id": "local", "display_name": "Local",
                "global_region_id": "local-1", "regions": [{{"id": "local-1", "display_name": "Local"}}]}}]}}"#
        )
        .unwrap();
        let settings = Settings {
            region_metadata: Some(file.path().to_path_buf()),
            ..Default::default()
        };

        let metadata = region_metadata(&settings).unwrap();
        assert_eq!(metadata.default_region, "local-1");
    }
}
