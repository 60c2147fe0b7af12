//! Container registry access.
//!
//! [`ImageRegistry`] is the seam between the publish pipeline and a remote
//! registry. [`RegistryClient`] implements it over the `oci-distribution`
//! crate; tests use the in-memory double in [`super::memory`].

use async_trait::async_trait;
use kontext_core::error::{KontextError, Result};
use kontext_core::{CredentialSource, KontextConfig};
use oci_distribution::client::{ClientConfig, ClientProtocol};
use oci_distribution::manifest::{ImageIndexEntry, OciDescriptor, OciImageManifest, OciManifest};
use oci_distribution::secrets::RegistryAuth as OciRegistryAuth;
use oci_distribution::{Client, Reference, RegistryOperation};

use super::credentials::CredentialStore;
use super::docker_config::DockerConfig;
use super::image::RemoteImage;
use super::reference::ImageReference;

/// Authentication credentials for a container registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryAuth {
    username: Option<String>,
    password: Option<String>,
}

impl RegistryAuth {
    /// No credentials.
    pub fn anonymous() -> Self {
        Self {
            username: None,
            password: None,
        }
    }

    /// Basic authentication with username and password.
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(password.into()),
        }
    }

    /// Read `REGISTRY_USERNAME` and `REGISTRY_PASSWORD`, or anonymous when
    /// either is unset.
    pub fn from_env() -> Self {
        match (
            std::env::var("REGISTRY_USERNAME").ok(),
            std::env::var("REGISTRY_PASSWORD").ok(),
        ) {
            (Some(u), Some(p)) => Self::basic(u, p),
            _ => Self::anonymous(),
        }
    }

    /// Credentials to present to `registry` for the configured source.
    ///
    /// The keychain source checks the credential store, then the Docker CLI
    /// config, then the environment, then falls back to anonymous.
    pub fn resolve(source: &CredentialSource, registry: &str) -> Result<Self> {
        match source {
            CredentialSource::Anonymous => Ok(Self::anonymous()),
            CredentialSource::Basic { username, password } => {
                Ok(Self::basic(username.clone(), password.clone()))
            }
            CredentialSource::Keychain {
                store,
                docker_config,
            } => {
                if let Some(cred) = CredentialStore::open(store.as_deref())?.get(registry)? {
                    tracing::debug!(registry, "Using stored credentials");
                    return Ok(Self::basic(cred.username, cred.password));
                }
                let docker = DockerConfig::open(docker_config.as_deref())?;
                if let Some(cred) = docker.get(registry)? {
                    tracing::debug!(registry, path = %docker.path().display(), "Using Docker credentials");
                    return Ok(Self::basic(cred.username, cred.password));
                }
                Ok(Self::from_env())
            }
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.username.is_none()
    }

    fn to_oci_auth(&self) -> OciRegistryAuth {
        match (&self.username, &self.password) {
            (Some(u), Some(p)) => OciRegistryAuth::Basic(u.clone(), p.clone()),
            _ => OciRegistryAuth::Anonymous,
        }
    }
}

/// Result of a successful image push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushResult {
    /// URL of the pushed config blob
    pub config_url: String,
    /// URL of the pushed manifest
    pub manifest_url: String,
}

/// Registry operations needed to publish a context image.
///
/// Implementors provide blob and manifest primitives; [`ImageRegistry::push`]
/// combines them so that only blobs the registry cannot already reach are
/// uploaded.
#[async_trait]
pub trait ImageRegistry: Send + Sync {
    /// Fetch the manifest and config of `reference`.
    async fn resolve(&self, reference: &ImageReference) -> Result<RemoteImage>;

    /// Fetch one blob of the image at `reference`.
    async fn blob(&self, reference: &ImageReference, descriptor: &OciDescriptor) -> Result<Vec<u8>>;

    /// Prepare for a series of writes to `target`.
    async fn begin_push(&self, _target: &ImageReference) -> Result<()> {
        Ok(())
    }

    /// Upload `data` as blob `digest` into the repository of `target`.
    /// Returns the blob URL.
    async fn upload_blob(&self, target: &ImageReference, data: &[u8], digest: &str) -> Result<String>;

    /// Link blob `digest` from the repository of `source` into the repository
    /// of `target` without transferring it.
    async fn mount_blob(
        &self,
        target: &ImageReference,
        source: &ImageReference,
        digest: &str,
    ) -> Result<()>;

    /// Write `manifest` and tag it as `target`. Returns the manifest URL.
    async fn put_manifest(&self, target: &ImageReference, manifest: &OciImageManifest) -> Result<String>;

    /// Compressed blob of layer `index`, from memory when the image holds it
    /// or else from the image's source.
    async fn layer_blob(&self, image: &RemoteImage, index: usize) -> Result<Vec<u8>> {
        let descriptor = image.layers().get(index).ok_or_else(|| {
            KontextError::OciImageError(format!(
                "Layer index {} out of range (image has {} layers)",
                index,
                image.layers().len()
            ))
        })?;
        if let Some(blob) = image.local_blob(&descriptor.digest) {
            return Ok(blob.to_vec());
        }
        let source = image.source().ok_or_else(|| {
            KontextError::OciImageError(format!(
                "Layer {} is not held locally and the image has no source",
                descriptor.digest
            ))
        })?;
        self.blob(source, descriptor).await
    }

    /// Upload `image` and tag it as `target`.
    ///
    /// Layers held in memory are uploaded. Layers of the source image are
    /// mounted when the source lives on the same registry, and copied
    /// through this process only when mounting fails. The config is always
    /// uploaded and the manifest written last.
    async fn push(&self, target: &ImageReference, image: &RemoteImage) -> Result<PushResult> {
        self.begin_push(target).await?;

        let mut uploaded = 0;
        let mut mounted = 0;
        for (index, descriptor) in image.layers().iter().enumerate() {
            if let Some(data) = image.local_blob(&descriptor.digest) {
                self.upload_blob(target, data, &descriptor.digest).await?;
                uploaded += 1;
                continue;
            }

            if let Some(source) = image.source().filter(|s| s.registry == target.registry) {
                match self.mount_blob(target, source, &descriptor.digest).await {
                    Ok(()) => {
                        tracing::debug!(digest = %descriptor.digest, from = %source, "Mounted layer");
                        mounted += 1;
                        continue;
                    }
                    Err(e) => {
                        tracing::debug!(digest = %descriptor.digest, error = %e, "Mount failed, copying layer");
                    }
                }
            }

            let data = self.layer_blob(image, index).await?;
            self.upload_blob(target, &data, &descriptor.digest).await?;
            uploaded += 1;
        }

        let config_url = self
            .upload_blob(target, image.config_bytes(), &image.manifest().config.digest)
            .await?;
        let manifest_url = self.put_manifest(target, image.manifest()).await?;

        tracing::info!(reference = %target, uploaded, mounted, "Pushed image");
        Ok(PushResult {
            config_url,
            manifest_url,
        })
    }
}

/// Registry client backed by `oci-distribution`.
pub struct RegistryClient {
    client: Client,
    credentials: CredentialSource,
}

impl RegistryClient {
    /// Create a client. Registries listed as insecure are reached over HTTP.
    pub fn new(config: &KontextConfig) -> Self {
        let protocol = if config.insecure_registries.is_empty() {
            ClientProtocol::Https
        } else {
            ClientProtocol::HttpsExcept(config.insecure_registries.clone())
        };
        let client = Client::new(ClientConfig {
            protocol,
            platform_resolver: Some(Box::new(linux_platform_resolver)),
            ..Default::default()
        });

        Self {
            client,
            credentials: config.credentials.clone(),
        }
    }

    fn auth_for(&self, reference: &ImageReference) -> Result<OciRegistryAuth> {
        Ok(RegistryAuth::resolve(&self.credentials, &reference.registry)?.to_oci_auth())
    }
}

fn push_error(target: &ImageReference, what: &str, e: impl std::fmt::Display) -> KontextError {
    KontextError::RegistryError {
        registry: target.registry.clone(),
        message: format!("Failed to {} for {}: {}", what, target, e),
    }
}

#[async_trait]
impl ImageRegistry for RegistryClient {
    async fn resolve(&self, reference: &ImageReference) -> Result<RemoteImage> {
        let oci_ref = to_oci_reference(reference)?;
        let auth = self.auth_for(reference)?;

        tracing::debug!(reference = %reference, "Fetching image manifest");
        let (manifest, digest) = self
            .client
            .pull_image_manifest(&oci_ref, &auth)
            .await
            .map_err(|e| KontextError::RegistryError {
                registry: reference.registry.clone(),
                message: format!("Failed to pull manifest for {}: {}", reference, e),
            })?;

        let mut config = Vec::new();
        self.client
            .pull_blob(&oci_ref, &manifest.config, &mut config)
            .await
            .map_err(|e| KontextError::RegistryError {
                registry: reference.registry.clone(),
                message: format!("Failed to pull config blob: {}", e),
            })?;

        tracing::debug!(
            reference = %reference,
            digest = %digest,
            layers = manifest.layers.len(),
            "Resolved image"
        );

        Ok(RemoteImage::new(Some(reference.clone()), manifest, config))
    }

    async fn blob(&self, reference: &ImageReference, descriptor: &OciDescriptor) -> Result<Vec<u8>> {
        let oci_ref = to_oci_reference(reference)?;
        let mut data = Vec::new();
        self.client
            .pull_blob(&oci_ref, descriptor, &mut data)
            .await
            .map_err(|e| KontextError::RegistryError {
                registry: reference.registry.clone(),
                message: format!("Failed to pull blob {}: {}", descriptor.digest, e),
            })?;
        Ok(data)
    }

    async fn begin_push(&self, target: &ImageReference) -> Result<()> {
        let oci_ref = to_oci_reference(target)?;
        let auth = self.auth_for(target)?;
        self.client
            .auth(&oci_ref, &auth, RegistryOperation::Push)
            .await
            .map_err(|e| push_error(target, "authenticate", e))?;
        Ok(())
    }

    async fn upload_blob(&self, target: &ImageReference, data: &[u8], digest: &str) -> Result<String> {
        let oci_ref = to_oci_reference(target)?;
        tracing::debug!(reference = %target, digest, size = data.len(), "Uploading blob");
        self.client
            .push_blob(&oci_ref, data, digest)
            .await
            .map_err(|e| push_error(target, &format!("upload blob {}", digest), e))
    }

    async fn mount_blob(
        &self,
        target: &ImageReference,
        source: &ImageReference,
        digest: &str,
    ) -> Result<()> {
        let oci_ref = to_oci_reference(target)?;
        let source_ref = to_oci_reference(source)?;
        self.client
            .mount_blob(&oci_ref, &source_ref, digest)
            .await
            .map_err(|e| push_error(target, &format!("mount blob {}", digest), e))
    }

    async fn put_manifest(&self, target: &ImageReference, manifest: &OciImageManifest) -> Result<String> {
        let oci_ref = to_oci_reference(target)?;
        self.client
            .push_manifest(&oci_ref, &OciManifest::Image(manifest.clone()))
            .await
            .map_err(|e| push_error(target, "push manifest", e))
    }
}

/// Convert an [`ImageReference`] to an `oci-distribution` reference.
fn to_oci_reference(reference: &ImageReference) -> Result<Reference> {
    let ref_str = match (&reference.tag, &reference.digest) {
        (_, Some(digest)) => format!("{}/{}@{}", reference.registry, reference.repository, digest),
        (Some(tag), None) => format!("{}/{}:{}", reference.registry, reference.repository, tag),
        (None, None) => format!("{}/{}:latest", reference.registry, reference.repository),
    };
    ref_str.parse::<Reference>().map_err(|e| {
        KontextError::OciImageError(format!("Invalid OCI reference '{}': {}", ref_str, e))
    })
}

/// Select the linux image for the host architecture from a multi-arch index.
///
/// The extractor runs in a linux container whatever the publishing host is.
fn linux_platform_resolver(manifests: &[ImageIndexEntry]) -> Option<String> {
    let arch = match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        other => other,
    };

    manifests
        .iter()
        .find(|entry| {
            entry
                .platform
                .as_ref()
                .map_or(false, |p| p.os == "linux" && p.architecture == arch)
        })
        .map(|entry| entry.digest.clone())
}
