//! `peerkvd gen-keys`: self-signed server certificate and private key.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use anyhow::{bail, Context, Result};

use peerkv_core::KeyMaterial;

/// Validity of generated certificates.
const CERT_DAYS: u32 = 365;

pub fn generate(cert_path: &Path, key_path: &Path, bits: u32, common_name: &str) -> Result<()> {
    for path in [cert_path, key_path] {
        if path.exists() {
            bail!("{} already exists, refusing to overwrite", path.display());
        }
    }

    let keys = KeyMaterial::generate(common_name, bits, CERT_DAYS)
        .context("failed to generate key material")?;
    let (cert_pem, key_pem) = keys.to_pem().context("failed to encode key material")?;

    write_new(cert_path, &cert_pem, 0o644)?;
    write_new(key_path, &key_pem, 0o600)?;

    let root = keys.trust_root()?;
    tracing::info!(
        cert = %cert_path.display(),
        key = %key_path.display(),
        bits,
        fingerprint = %root.fingerprint(),
        "generated server key material"
    );
    Ok(())
}

fn write_new(path: &Path, contents: &[u8], mode: u32) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(mode);
    }
    #[cfg(not(unix))]
    let _ = mode;
    let mut file = options
        .open(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    file.write_all(contents)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}
