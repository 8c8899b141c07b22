use std::str::FromStr;
use std::time::Duration;

use rand::rngs::OsRng;
use rand::RngCore;
use rsa::pkcs1v15::SigningKey;
use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey};
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use x509_cert::builder::{Builder, CertificateBuilder, Profile};
use x509_cert::der::Encode;
use x509_cert::name::Name;
use x509_cert::serial_number::SerialNumber;
use x509_cert::spki::SubjectPublicKeyInfoOwned;
use x509_cert::time::Validity;

use crate::{CaIdentity, IssuedCredential, PkiError};

/// Fixed validity window of every issued certificate.
const VALIDITY: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Issues credentials under one fixed CA identity.
///
/// `issue` is synchronous and expensive; key generation at the configured
/// modulus size dominates its cost. The caller is responsible for keeping
/// it off latency-sensitive tasks and for never running it twice
/// concurrently for the same subject name; nothing here enforces that.
#[derive(Debug, Clone)]
pub struct CertificateAuthority {
    identity: CaIdentity,
    key_bits: usize,
}

impl CertificateAuthority {
    pub fn new(identity: CaIdentity, key_bits: usize) -> Self {
        Self { identity, key_bits }
    }

    pub fn key_bits(&self) -> usize {
        self.key_bits
    }

    /// Mint a fresh RSA key pair and a certificate for `subject_name`,
    /// subject `CN=<subject_name>`, signed SHA-256-with-RSA by the CA key.
    pub fn issue(&self, subject_name: &str) -> Result<IssuedCredential, PkiError> {
        let mut rng = OsRng;
        let private_key = RsaPrivateKey::new(&mut rng, self.key_bits)
            .map_err(|error| PkiError::Generation(error.to_string()))?;
        let public_key = RsaPublicKey::from(&private_key);

        let subject = Name::from_str(&format!("CN={subject_name}")).map_err(|error| {
            PkiError::Signing(format!(
                "subject `{subject_name}` did not form a distinguished name: {error}"
            ))
        })?;
        let serial = random_serial(&mut rng)?;
        let validity =
            Validity::from_now(VALIDITY).map_err(|error| PkiError::Signing(error.to_string()))?;

        let public_key_der = public_key
            .to_public_key_der()
            .map_err(|error| PkiError::Signing(error.to_string()))?;
        let spki = SubjectPublicKeyInfoOwned::try_from(public_key_der.as_bytes())
            .map_err(|error| PkiError::Signing(error.to_string()))?;

        let signer = SigningKey::<Sha256>::new(self.identity.signing_key().clone());
        let builder = CertificateBuilder::new(
            Profile::Leaf {
                issuer: self.identity.issuer().clone(),
                enable_key_agreement: false,
                enable_key_encipherment: true,
            },
            serial,
            validity,
            subject,
            spki,
            &signer,
        )
        .map_err(|error| PkiError::Signing(error.to_string()))?;
        let certificate = builder
            .build::<rsa::pkcs1v15::Signature>()
            .map_err(|error| PkiError::Signing(error.to_string()))?;

        let certificate_der = certificate
            .to_der()
            .map_err(|error| PkiError::Signing(error.to_string()))?;
        let private_key_der = private_key
            .to_pkcs8_der()
            .map_err(|error| PkiError::Signing(error.to_string()))?;

        Ok(IssuedCredential::new(
            private_key_der.as_bytes().to_vec(),
            public_key_der.as_bytes().to_vec(),
            certificate_der,
        ))
    }
}

/// 63 bits of entropy: top bit cleared so the DER integer stays positive,
/// floored at one so the serial is never zero.
fn random_serial(rng: &mut impl RngCore) -> Result<SerialNumber, PkiError> {
    let value = (rng.next_u64() >> 1).max(1);
    SerialNumber::new(&value.to_be_bytes())
        .map_err(|error| PkiError::Signing(format!("serial number encoding failed: {error}")))
}
