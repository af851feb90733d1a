use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use openssl::asn1::{Asn1Integer, Asn1Time};
use openssl::bn::{BigNum, MsbOption};
use openssl::ec::{EcGroup, EcKey};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::x509::extension::{
    BasicConstraints, ExtendedKeyUsage, KeyUsage, SubjectAlternativeName,
};
use openssl::x509::{X509Builder, X509NameBuilder, X509};
use parking_lot::Mutex;
use rustls::{Certificate, PrivateKey, ServerConfig};
use tracing::info;

use crate::error::ProxyError;

const CA_COMMON_NAME: &str = "relay local CA";
const CA_ORGANIZATION: &str = "relay";
const CA_VALID_DAYS: u32 = 10 * 365;
const LEAF_VALID_DAYS: u32 = 365;

/// The local certificate authority used for MITM interception, plus an
/// in-memory per-host leaf cache. Leaves are minted lazily and stored as
/// ready-to-serve rustls ServerConfigs.
pub struct LocalCa {
    cert: X509,
    key: PKey<Private>,
    cache: Mutex<HashMap<String, Arc<ServerConfig>>>,
}

impl LocalCa {
    /// Load the CA from disk, regenerating only when it is missing,
    /// unreadable or expired. A fresh CA is persisted as PEM with the key
    /// file at mode 0600.
    pub fn load_or_create(cert_path: &Path, key_path: &Path) -> Result<Self, ProxyError> {
        if let (Ok(cert_pem), Ok(key_pem)) = (std::fs::read(cert_path), std::fs::read(key_path)) {
            if let (Ok(cert), Ok(key)) = (
                X509::from_pem(&cert_pem),
                PKey::private_key_from_pem(&key_pem),
            ) {
                let now = Asn1Time::days_from_now(0)?;
                if *cert.not_after() > now {
                    return Ok(Self {
                        cert,
                        key,
                        cache: Mutex::new(HashMap::new()),
                    });
                }
            }
        }

        let (cert, key) = mint_ca()?;

        std::fs::write(cert_path, cert.to_pem()?)?;
        std::fs::write(key_path, key.private_key_to_pem_pkcs8()?)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(key_path, std::fs::Permissions::from_mode(0o600))?;
        }

        info!(cert = %cert_path.display(), "generated local CA");
        Ok(Self {
            cert,
            key,
            cache: Mutex::new(HashMap::new()),
        })
    }

    /// PEM bytes of the CA certificate, for installation into an OS trust
    /// store.
    pub fn cert_pem(&self) -> Result<Vec<u8>, ProxyError> {
        Ok(self.cert.to_pem()?)
    }

    /// A TLS server config presenting a leaf for `host`, signed by this
    /// CA. Minted on first use, then served from the per-host cache.
    pub fn server_config_for_host(&self, host: &str) -> Result<Arc<ServerConfig>, ProxyError> {
        let mut cache = self.cache.lock();
        if let Some(config) = cache.get(host) {
            return Ok(Arc::clone(config));
        }

        let (leaf, leaf_key) = self.mint_leaf(host)?;
        let chain = vec![Certificate(leaf.to_der()?), Certificate(self.cert.to_der()?)];
        let key = PrivateKey(leaf_key.private_key_to_pkcs8()?);

        let config = Arc::new(
            ServerConfig::builder()
                .with_safe_defaults()
                .with_no_client_auth()
                .with_single_cert(chain, key)?,
        );
        cache.insert(host.to_string(), Arc::clone(&config));
        Ok(config)
    }

    pub fn cached_host_count(&self) -> usize {
        self.cache.lock().len()
    }

    fn mint_leaf(&self, host: &str) -> Result<(X509, PKey<Private>), ProxyError> {
        let key = new_p256_key()?;

        let mut name = X509NameBuilder::new()?;
        name.append_entry_by_text("CN", host)?;
        let name = name.build();

        let mut builder = X509Builder::new()?;
        builder.set_version(2)?;
        let serial = random_serial()?;
        builder.set_serial_number(&serial)?;
        builder.set_subject_name(&name)?;
        builder.set_issuer_name(self.cert.subject_name())?;
        builder.set_pubkey(&key)?;
        let not_before = Asn1Time::days_from_now(0)?;
        builder.set_not_before(&not_before)?;
        let not_after = Asn1Time::days_from_now(LEAF_VALID_DAYS)?;
        builder.set_not_after(&not_after)?;

        builder.append_extension(KeyUsage::new().digital_signature().build()?)?;
        builder.append_extension(ExtendedKeyUsage::new().server_auth().build()?)?;
        let san = SubjectAlternativeName::new()
            .dns(host)
            .build(&builder.x509v3_context(Some(&self.cert), None))?;
        builder.append_extension(san)?;

        builder.sign(&self.key, MessageDigest::sha256())?;
        Ok((builder.build(), key))
    }
}

fn mint_ca() -> Result<(X509, PKey<Private>), ProxyError> {
    let key = new_p256_key()?;

    let mut name = X509NameBuilder::new()?;
    name.append_entry_by_text("CN", CA_COMMON_NAME)?;
    name.append_entry_by_text("O", CA_ORGANIZATION)?;
    let name = name.build();

    let mut builder = X509Builder::new()?;
    builder.set_version(2)?;
    let serial = random_serial()?;
    builder.set_serial_number(&serial)?;
    builder.set_subject_name(&name)?;
    builder.set_issuer_name(&name)?;
    builder.set_pubkey(&key)?;
    let not_before = Asn1Time::days_from_now(0)?;
    builder.set_not_before(&not_before)?;
    let not_after = Asn1Time::days_from_now(CA_VALID_DAYS)?;
    builder.set_not_after(&not_after)?;

    builder.append_extension(BasicConstraints::new().critical().ca().build()?)?;
    builder.append_extension(KeyUsage::new().key_cert_sign().crl_sign().build()?)?;

    builder.sign(&key, MessageDigest::sha256())?;
    Ok((builder.build(), key))
}

fn new_p256_key() -> Result<PKey<Private>, ProxyError> {
    let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1)?;
    Ok(PKey::from_ec_key(EcKey::generate(&group)?)?)
}

fn random_serial() -> Result<Asn1Integer, ProxyError> {
    let mut serial = BigNum::new()?;
    serial.rand(128, MsbOption::MAYBE_ZERO, false)?;
    Ok(serial.to_asn1_integer()?)
}
