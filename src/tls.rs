//! TLS material for the ADHOCENCRYPTION upgrade.
//!
//! The server presents a configured certificate or a self-signed one it
//! generates on first start. Clients pin the server fingerprint on first use
//! (TOFU) in a `known_hosts` file and refuse later changes.

use anyhow::{anyhow, Context, Result};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, SignatureScheme};

/// Directory holding generated certificates and `known_hosts`.
///
/// `NETVFS_CONFIG_DIR` overrides the platform default.
pub fn config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("NETVFS_CONFIG_DIR") {
        return PathBuf::from(dir);
    }
    #[cfg(windows)]
    {
        if let Ok(appdata) = std::env::var("APPDATA") {
            return PathBuf::from(appdata).join("NetVfs");
        }
    }
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".config").join("netvfs");
    }
    PathBuf::from(".netvfs")
}

pub fn default_server_cert_paths() -> (PathBuf, PathBuf) {
    let dir = config_dir();
    (dir.join("server-cert.pem"), dir.join("server-key.pem"))
}

/// Load the server certificate, generating a self-signed pair when absent.
pub fn load_or_generate_server_config(
    cert: Option<PathBuf>,
    key: Option<PathBuf>,
) -> Result<Arc<rustls::ServerConfig>> {
    let (cert_path, key_path) = match (cert, key) {
        (Some(c), Some(k)) => (c, k),
        (None, None) => default_server_cert_paths(),
        _ => return Err(anyhow!("a TLS certificate requires its key (and vice versa)")),
    };

    if !cert_path.exists() || !key_path.exists() {
        let dir = cert_path.parent().unwrap_or(Path::new("."));
        fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
        let generated = rcgen::generate_simple_self_signed(vec![
            "netvfsd.local".to_string(),
            "localhost".to_string(),
        ])
        .context("generate self-signed cert")?;
        fs::write(&cert_path, generated.serialize_pem().context("serialize cert")?)
            .context("write cert pem")?;
        fs::write(&key_path, generated.serialize_private_key_pem()).context("write key pem")?;
        log::info!("generated self-signed certificate at {}", cert_path.display());
    }

    let certs = load_certs(&cert_path)?;
    let key = load_key(&key_path)?;
    let cfg = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .context("build server tls config")?;
    Ok(Arc::new(cfg))
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let mut rd = BufReader::new(fs::File::open(path).context("open cert")?);
    let mut out = Vec::new();
    for c in rustls_pemfile::certs(&mut rd) {
        out.push(c.context("read cert")?);
    }
    if out.is_empty() {
        return Err(anyhow!("no certificate in {}", path.display()));
    }
    Ok(out)
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let mut rd = BufReader::new(fs::File::open(path).context("open key")?);
    if let Some(k) = rustls_pemfile::pkcs8_private_keys(&mut rd).next() {
        return Ok(PrivateKeyDer::from(k.context("pkcs8 key")?));
    }
    let mut rd = BufReader::new(fs::File::open(path).context("reopen key")?);
    let k = rustls_pemfile::rsa_private_keys(&mut rd)
        .next()
        .context("no private key found")??;
    Ok(PrivateKeyDer::from(k))
}

pub fn known_hosts_path() -> PathBuf {
    config_dir().join("known_hosts")
}

fn read_known_hosts(path: &Path) -> HashMap<String, String> {
    let mut map = HashMap::new();
    if let Ok(f) = fs::File::open(path) {
        for line in BufReader::new(f).lines().map_while(|l| l.ok()) {
            if line.starts_with('#') {
                continue;
            }
            if let Some((k, v)) = line.split_once('=') {
                map.insert(k.trim().to_string(), v.trim().to_string());
            }
        }
    }
    map
}

fn write_known_hosts(path: &Path, map: &HashMap<String, String>) -> Result<()> {
    if let Some(p) = path.parent() {
        fs::create_dir_all(p).context("create known_hosts parent dir")?;
    }
    // Write to a temp file and rename over, so readers never see half a file
    let temp_path = path.with_extension("tmp");
    {
        let mut f = fs::File::create(&temp_path).context("create temp known_hosts")?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = f.metadata()?.permissions();
            perms.set_mode(0o600);
            f.set_permissions(perms)?;
        }
        writeln!(f, "# netvfs known_hosts - host:port=sha256")?;
        for (k, v) in map {
            writeln!(f, "{}={}", k, v)?;
        }
        f.sync_all()?;
    }
    fs::rename(&temp_path, path).context("replace known_hosts")?;
    Ok(())
}

pub fn fingerprint(cert: &CertificateDer<'_>) -> String {
    hex::encode(Sha256::digest(cert.as_ref()))
}

#[derive(Debug)]
struct TofuVerifier {
    hostport: String,
    known_path: PathBuf,
}

impl ServerCertVerifier for TofuVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        let fp = fingerprint(end_entity);
        let mut map = read_known_hosts(&self.known_path);
        match map.get(&self.hostport) {
            Some(saved) if saved == &fp => Ok(ServerCertVerified::assertion()),
            Some(_) => Err(rustls::Error::General(format!(
                "certificate for {} changed; refusing connection",
                self.hostport
            ))),
            None => {
                map.insert(self.hostport.clone(), fp);
                if let Err(e) = write_known_hosts(&self.known_path, &map) {
                    log::warn!("could not record fingerprint for {}: {:#}", self.hostport, e);
                }
                Ok(ServerCertVerified::assertion())
            }
        }
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ED25519,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PKCS1_SHA256,
        ]
    }
}

/// Client config pinning `host:port` in `known_hosts` (default location when `None`).
pub fn build_client_config_tofu(
    host: &str,
    port: u16,
    known_hosts: Option<&Path>,
) -> Arc<rustls::ClientConfig> {
    let verifier = TofuVerifier {
        hostport: format!("{}:{}", host, port),
        known_path: known_hosts.map(Path::to_path_buf).unwrap_or_else(known_hosts_path),
    };
    let cfg = rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(verifier))
        .with_no_client_auth();
    Arc::new(cfg)
}

pub fn server_name_for(host: &str) -> Result<ServerName<'static>> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(ServerName::IpAddress(ip.into()));
    }
    ServerName::try_from(host.to_string()).map_err(|e| anyhow!("invalid server name {}: {}", host, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generates_and_reloads_self_signed() {
        let tmp = tempfile::tempdir().unwrap();
        let cert = tmp.path().join("c.pem");
        let key = tmp.path().join("k.pem");
        load_or_generate_server_config(Some(cert.clone()), Some(key.clone())).unwrap();
        assert!(cert.exists() && key.exists());
        let before = fs::read(&cert).unwrap();
        load_or_generate_server_config(Some(cert.clone()), Some(key)).unwrap();
        assert_eq!(fs::read(&cert).unwrap(), before);
        assert!(load_or_generate_server_config(Some(cert), None).is_err());
    }

    #[test]
    fn test_known_hosts_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("sub/known_hosts");
        let mut map = HashMap::new();
        map.insert("h:1".to_string(), "ab".to_string());
        write_known_hosts(&path, &map).unwrap();
        assert_eq!(read_known_hosts(&path), map);
    }

    #[test]
    fn test_server_name_for_ip_and_dns() {
        assert!(matches!(server_name_for("127.0.0.1").unwrap(), ServerName::IpAddress(_)));
        assert!(matches!(server_name_for("example.org").unwrap(), ServerName::DnsName(_)));
    }
}
