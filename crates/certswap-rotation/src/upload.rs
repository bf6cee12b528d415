//! Import of the replacement certificate, key and optional chain.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use x509_parser::pem::parse_x509_pem;
use zeroize::Zeroizing;

use certswap_store::{ConfigStore, ImportCategory, ImportRequest};

use crate::error::{RotationError, UploadError};
use crate::layout;
use crate::state::{ChainStatus, UploadReceipt};

/// Replacement certificate material as read from disk.
pub struct CertificateMaterial {
    pub cert_pem: Vec<u8>,
    pub key_pem: Zeroizing<Vec<u8>>,
    pub chain_pem: Option<Vec<u8>>,
    pub passphrase: Option<Zeroizing<String>>,
}

impl CertificateMaterial {
    pub fn from_files(
        cert_file: &Path,
        key_file: &Path,
        chain_file: Option<&Path>,
        passphrase: Option<Zeroizing<String>>,
    ) -> Result<Self, RotationError> {
        let read = |path: &Path| {
            std::fs::read(path).map_err(|e| {
                RotationError::InvalidMaterial(format!("cannot read {}: {e}", path.display()))
            })
        };
        Ok(Self {
            cert_pem: read(cert_file)?,
            key_pem: Zeroizing::new(read(key_file)?),
            chain_pem: chain_file.map(read).transpose()?,
            passphrase,
        })
    }

    /// Certificate followed by the private key, the layout the keypair
    /// import expects.
    fn keypair_pem(&self) -> Zeroizing<Vec<u8>> {
        let mut combined = Zeroizing::new(Vec::with_capacity(
            self.cert_pem.len() + self.key_pem.len() + 1,
        ));
        combined.extend_from_slice(&self.cert_pem);
        if !self.cert_pem.ends_with(b"\n") {
            combined.push(b'\n');
        }
        combined.extend_from_slice(&self.key_pem);
        combined
    }
}

/// What the local inspection learned about the leaf certificate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MaterialSummary {
    pub common_name: Option<String>,
    pub not_after: DateTime<Utc>,
    pub has_chain: bool,
}

/// Validate the material locally before anything is sent.
pub fn inspect(material: &CertificateMaterial) -> Result<MaterialSummary, RotationError> {
    let (_, pem) = parse_x509_pem(&material.cert_pem)
        .map_err(|e| RotationError::InvalidMaterial(format!("certificate is not PEM: {e}")))?;
    if pem.label != "CERTIFICATE" {
        return Err(RotationError::InvalidMaterial(format!(
            "expected a CERTIFICATE block, found {}",
            pem.label
        )));
    }
    let (_, cert) = x509_parser::parse_x509_certificate(&pem.contents)
        .map_err(|e| RotationError::InvalidMaterial(format!("certificate does not parse: {e}")))?;

    let common_name = cert
        .subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .map(str::to_string);
    let not_after = DateTime::from_timestamp(cert.validity().not_after.timestamp(), 0)
        .ok_or_else(|| RotationError::InvalidMaterial("invalid not-after".to_string()))?;
    if not_after <= Utc::now() {
        return Err(RotationError::InvalidMaterial(format!(
            "certificate expired at {not_after}"
        )));
    }

    let key_text = std::str::from_utf8(&material.key_pem).unwrap_or_default();
    if !(key_text.contains("-----BEGIN") && key_text.contains("PRIVATE KEY-----")) {
        return Err(RotationError::InvalidMaterial(
            "key file holds no PEM private key".to_string(),
        ));
    }
    if key_text.contains("ENCRYPTED") && material.passphrase.is_none() {
        return Err(RotationError::InvalidMaterial(
            "private key is encrypted but no passphrase was given".to_string(),
        ));
    }

    if let Some(chain) = &material.chain_pem {
        parse_x509_pem(chain)
            .map_err(|e| RotationError::InvalidMaterial(format!("chain is not PEM: {e}")))?;
    }

    Ok(MaterialSummary {
        common_name,
        not_after,
        has_chain: material.chain_pem.is_some(),
    })
}

/// Name given to the imported chain of `cert_name`.
pub fn chain_name(cert_name: &str) -> String {
    format!("{cert_name}-chain")
}

pub struct CertificateUploader<'a> {
    store: &'a dyn ConfigStore,
    visibility_attempts: u32,
    visibility_delay: Duration,
}

impl<'a> CertificateUploader<'a> {
    pub fn new(
        store: &'a dyn ConfigStore,
        visibility_attempts: u32,
        visibility_delay: Duration,
    ) -> Self {
        Self {
            store,
            visibility_attempts: visibility_attempts.max(1),
            visibility_delay,
        }
    }

    /// Import the keypair, then the chain.
    ///
    /// Keypair failures (including the certificate not showing up in the
    /// configuration afterwards) are `Fatal`. A chain failure is recorded
    /// in the receipt.
    pub async fn upload(
        &self,
        name: &str,
        material: &CertificateMaterial,
    ) -> Result<UploadReceipt, UploadError> {
        tracing::info!(name, "Importing certificate and private key");
        let keypair = ImportRequest {
            category: ImportCategory::Keypair,
            name: name.to_string(),
            pem: material.keypair_pem().to_vec(),
            passphrase: material.passphrase.clone(),
        };
        self.store
            .import(&keypair)
            .await
            .map_err(|e| UploadError::Fatal(e.to_string()))?;

        self.confirm_visible(name).await?;

        let chain = match &material.chain_pem {
            None => ChainStatus::NotProvided,
            Some(pem) => {
                let chain = chain_name(name);
                match self.import_chain(&chain, pem).await {
                    Ok(()) => {
                        tracing::info!(name = %chain, "Certificate chain imported");
                        ChainStatus::Imported { name: chain }
                    }
                    Err(e) => {
                        tracing::warn!(name = %chain, error = %e, "Chain import failed, continuing");
                        ChainStatus::Failed {
                            name: chain,
                            reason: e.to_string(),
                        }
                    }
                }
            }
        };

        Ok(UploadReceipt::new(name, chain))
    }

    async fn import_chain(&self, chain: &str, pem: &[u8]) -> Result<(), UploadError> {
        let request = ImportRequest {
            category: ImportCategory::Certificate,
            name: chain.to_string(),
            pem: pem.to_vec(),
            passphrase: None,
        };
        self.store
            .import(&request)
            .await
            .map_err(|e| UploadError::Recoverable(e.to_string()))
    }

    async fn confirm_visible(&self, name: &str) -> Result<(), UploadError> {
        let path = layout::certificate_path(name);
        for attempt in 1..=self.visibility_attempts {
            match self.store.read(&path).await {
                Ok(Some(_)) => return Ok(()),
                Ok(None) => {
                    tracing::debug!(name, attempt, "Imported certificate not visible yet")
                }
                Err(e) => tracing::debug!(name, attempt, error = %e, "Visibility check failed"),
            }
            if attempt < self.visibility_attempts {
                tokio::time::sleep(self.visibility_delay).await;
            }
        }
        Err(UploadError::Fatal(format!(
            "certificate `{name}` not visible in the configuration after import"
        )))
    }
}
