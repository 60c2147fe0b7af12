//! Image reference parsing.
//!
//! Parses references like `ghcr.io/acme/context:main` into their components.

use kontext_core::error::{KontextError, Result};

/// Default registry when none is specified.
const DEFAULT_REGISTRY: &str = "docker.io";

/// Default tag when none is specified.
const DEFAULT_TAG: &str = "latest";

/// Parsed image reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageReference {
    /// Registry hostname, optionally with port (e.g., "ghcr.io", "localhost:5000")
    pub registry: String,
    /// Repository path (e.g., "library/nginx", "acme/context")
    pub repository: String,
    /// Tag (e.g., "latest", "main")
    pub tag: Option<String>,
    /// Digest (e.g., "sha256:abc123...")
    pub digest: Option<String>,
}

impl ImageReference {
    /// Parse an image reference string.
    ///
    /// - `nginx` → docker.io/library/nginx:latest
    /// - `acme/ctx:v1` → docker.io/acme/ctx:v1
    /// - `localhost:5000/ctx` → localhost:5000/ctx:latest
    /// - `ghcr.io/acme/ctx@sha256:abc...` → digest only, no tag
    pub fn parse(reference: &str) -> Result<Self> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(KontextError::OciImageError(
                "Empty image reference".to_string(),
            ));
        }

        let (name_tag, digest) = match reference.split_once('@') {
            Some((name_tag, digest)) => {
                if !digest.contains(':') {
                    return Err(KontextError::OciImageError(format!(
                        "Invalid digest format in reference '{}': expected algorithm:hex",
                        reference
                    )));
                }
                (name_tag, Some(digest.to_string()))
            }
            None => (reference, None),
        };

        let (name, tag) = split_tag(name_tag);
        if let Some(tag) = tag {
            if tag.is_empty() {
                return Err(KontextError::OciImageError(format!(
                    "Empty tag in reference '{}'",
                    reference
                )));
            }
        }

        let (registry, repository) = split_registry(name)?;

        let tag = match (tag, &digest) {
            (Some(tag), _) => Some(tag.to_string()),
            (None, None) => Some(DEFAULT_TAG.to_string()),
            (None, Some(_)) => None,
        };

        Ok(Self {
            registry,
            repository,
            tag,
            digest,
        })
    }

    /// Parse a reference that images can be pushed to: it must name a tag.
    pub fn parse_target(reference: &str) -> Result<Self> {
        let parsed = Self::parse(reference)?;
        if parsed.digest.is_some() {
            return Err(KontextError::Usage(format!(
                "Target '{}' must be a tag, not a digest",
                reference
            )));
        }
        Ok(parsed)
    }

    /// Get the full reference string.
    pub fn full_reference(&self) -> String {
        let mut s = format!("{}/{}", self.registry, self.repository);
        if let Some(ref tag) = self.tag {
            s.push(':');
            s.push_str(tag);
        }
        if let Some(ref digest) = self.digest {
            s.push('@');
            s.push_str(digest);
        }
        s
    }
}

impl std::fmt::Display for ImageReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.full_reference())
    }
}

impl std::str::FromStr for ImageReference {
    type Err = KontextError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Split `name[:tag]`. A colon before the last `/` belongs to a registry
/// port; a bare `host:1234` with no slash is treated as a name, not a tag.
fn split_tag(name_tag: &str) -> (&str, Option<&str>) {
    let last_segment_start = name_tag.rfind('/').map(|i| i + 1).unwrap_or(0);
    match name_tag[last_segment_start..].rfind(':') {
        Some(colon) => {
            let colon = last_segment_start + colon;
            let tag = &name_tag[colon + 1..];
            if last_segment_start == 0 && !tag.is_empty() && tag.chars().all(|c| c.is_ascii_digit()) {
                (name_tag, None)
            } else {
                (&name_tag[..colon], Some(tag))
            }
        }
        None => (name_tag, None),
    }
}

/// Split a name into registry and repository components.
///
/// The first component is a registry when it contains a dot or colon, or is
/// "localhost".
fn split_registry(name: &str) -> Result<(String, String)> {
    if let Some((first, rest)) = name.split_once('/') {
        if first.contains('.') || first.contains(':') || first == "localhost" {
            if rest.is_empty() {
                return Err(KontextError::OciImageError(format!(
                    "Empty repository in reference '{}'",
                    name
                )));
            }
            return Ok((first.to_string(), rest.to_string()));
        }
    }

    if name.is_empty() {
        return Err(KontextError::OciImageError(
            "Empty repository in reference".to_string(),
        ));
    }

    let repository = if name.contains('/') {
        name.to_string()
    } else {
        format!("library/{}", name)
    };
    Ok((DEFAULT_REGISTRY.to_string(), repository))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_name() {
        let r = ImageReference::parse("nginx").unwrap();
        assert_eq!(r.registry, "docker.io");
        assert_eq!(r.repository, "library/nginx");
        assert_eq!(r.tag, Some("latest".to_string()));
        assert_eq!(r.digest, None);
    }

    #[test]
    fn test_parse_user_repo_with_tag() {
        let r = ImageReference::parse("acme/context:v1.0").unwrap();
        assert_eq!(r.registry, "docker.io");
        assert_eq!(r.repository, "acme/context");
        assert_eq!(r.tag, Some("v1.0".to_string()));
    }

    #[test]
    fn test_parse_custom_registry() {
        let r = ImageReference::parse("ghcr.io/acme/context:main").unwrap();
        assert_eq!(r.registry, "ghcr.io");
        assert_eq!(r.repository, "acme/context");
        assert_eq!(r.tag, Some("main".to_string()));
    }

    #[test]
    fn test_parse_deep_repository() {
        let r = ImageReference::parse(
            "gcr.io/mattmoor-public/github.com/mattmoor/kontext/cmd/extractor:latest",
        )
        .unwrap();
        assert_eq!(r.registry, "gcr.io");
        assert_eq!(r.repository, "mattmoor-public/github.com/mattmoor/kontext/cmd/extractor");
        assert_eq!(r.tag, Some("latest".to_string()));
    }

    #[test]
    fn test_parse_registry_with_port() {
        let r = ImageReference::parse("localhost:5000/ctx").unwrap();
        assert_eq!(r.registry, "localhost:5000");
        assert_eq!(r.repository, "ctx");
        assert_eq!(r.tag, Some("latest".to_string()));

        let r = ImageReference::parse("registry.local:5000/team/ctx:dev").unwrap();
        assert_eq!(r.registry, "registry.local:5000");
        assert_eq!(r.repository, "team/ctx");
        assert_eq!(r.tag, Some("dev".to_string()));
    }

    #[test]
    fn test_parse_digest_only() {
        let r = ImageReference::parse("ghcr.io/acme/ctx@sha256:abcdef").unwrap();
        assert_eq!(r.tag, None);
        assert_eq!(r.digest, Some("sha256:abcdef".to_string()));
    }

    #[test]
    fn test_parse_tag_and_digest() {
        let r = ImageReference::parse("ghcr.io/acme/ctx:v1@sha256:abcdef").unwrap();
        assert_eq!(r.tag, Some("v1".to_string()));
        assert_eq!(r.digest, Some("sha256:abcdef".to_string()));
    }

    #[test]
    fn test_parse_errors() {
        assert!(ImageReference::parse("").is_err());
        assert!(ImageReference::parse("   ").is_err());
        assert!(ImageReference::parse("nginx@invaliddigest").is_err());
        assert!(ImageReference::parse("ghcr.io/").is_err());
        assert!(ImageReference::parse("ghcr.io/acme/ctx:").is_err());
    }

    #[test]
    fn test_parse_target_rejects_digest() {
        assert!(ImageReference::parse_target("ghcr.io/acme/ctx:main").is_ok());
        let err = ImageReference::parse_target("ghcr.io/acme/ctx@sha256:abc").unwrap_err();
        assert!(matches!(err, KontextError::Usage(_)));
    }

    #[test]
    fn test_display_and_from_str() {
        let r: ImageReference = "acme/ctx:v2".parse().unwrap();
        assert_eq!(r.to_string(), "docker.io/acme/ctx:v2");
        assert_eq!(
            ImageReference::parse(&r.to_string()).unwrap(),
            r
        );
    }
}
