//! OpenSSL's legacy password-based envelope for traditional PEM private keys.
//!
//! The key is derived with `EVP_BytesToKey` (MD5, one iteration) from the
//! password and the first eight bytes of the IV, which double as the salt.

use std::fmt;
use std::str::FromStr;

use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, block_padding::Pkcs7};
use rand_core::CryptoRngCore;
use sha2::digest::Digest as _;
use zeroize::Zeroizing;

use crate::error::{CertForgeError, Result};

/// Length of the salt/IV used by both supported ciphers.
pub const SALT_LEN: usize = 8;

/// Block ciphers available for encrypting traditional PEM keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LegacyCipher {
    /// Triple DES (EDE, three keys) in CBC mode.
    DesEde3Cbc,
    /// Single DES in CBC mode.
    DesCbc,
}

impl LegacyCipher {
    /// The name written into the `DEK-Info` header.
    pub fn name(self) -> &'static str {
        match self {
            LegacyCipher::DesEde3Cbc => "DES-EDE3-CBC",
            LegacyCipher::DesCbc => "DES-CBC",
        }
    }

    /// Length of the derived key in bytes.
    pub fn key_len(self) -> usize {
        match self {
            LegacyCipher::DesEde3Cbc => 24,
            LegacyCipher::DesCbc => 8,
        }
    }

    /// Length of the IV in bytes.
    pub fn iv_len(self) -> usize {
        SALT_LEN
    }
}

impl FromStr for LegacyCipher {
    type Err = CertForgeError;

    fn from_str(name: &str) -> Result<Self> {
        match name.trim().to_ascii_uppercase().as_str() {
            "DES-EDE3-CBC" => Ok(LegacyCipher::DesEde3Cbc),
            "DES-CBC" => Ok(LegacyCipher::DesCbc),
            _ => Err(CertForgeError::CryptoError(format!(
                "unsupported algorithm for private key encryption: {name}"
            ))),
        }
    }
}

impl fmt::Display for LegacyCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// `EVP_BytesToKey` with MD5 and a single iteration.
///
/// `D_1 = MD5(password || salt)`, `D_i = MD5(D_{i-1} || password || salt)`;
/// the blocks are concatenated and truncated to `len` bytes.
pub fn derive_key(password: &[u8], salt: &[u8], len: usize) -> Zeroizing<Vec<u8>> {
    let salt = &salt[..salt.len().min(SALT_LEN)];
    let mut key = Zeroizing::new(Vec::with_capacity(len));
    let mut previous: Option<Zeroizing<Vec<u8>>> = None;
    while key.len() < len {
        let mut hasher = md5::Md5::new();
        if let Some(block) = &previous {
            hasher.update(block.as_slice());
        }
        hasher.update(password);
        hasher.update(salt);
        let block = Zeroizing::new(hasher.finalize().to_vec());
        let take = (len - key.len()).min(block.len());
        key.extend_from_slice(&block[..take]);
        previous = Some(block);
    }
    key
}

/// Encrypts `plaintext` under a fresh random salt drawn from `rng`.
///
/// Returns the ciphertext and the salt, which is also the CBC IV.
pub fn encrypt(
    plaintext: &[u8],
    password: &[u8],
    cipher: LegacyCipher,
    rng: &mut impl CryptoRngCore,
) -> Result<(Vec<u8>, [u8; SALT_LEN])> {
    let mut salt = [0u8; SALT_LEN];
    rng.fill_bytes(&mut salt);
    let ciphertext = encrypt_with_salt(plaintext, password, cipher, &salt)?;
    Ok((ciphertext, salt))
}

/// Encrypts `plaintext` with an explicit salt/IV. Deterministic.
pub fn encrypt_with_salt(
    plaintext: &[u8],
    password: &[u8],
    cipher: LegacyCipher,
    salt: &[u8; SALT_LEN],
) -> Result<Vec<u8>> {
    let key = derive_key(password, salt, cipher.key_len());
    let ciphertext = match cipher {
        LegacyCipher::DesEde3Cbc => cbc::Encryptor::<des::TdesEde3>::new_from_slices(&key, salt)
            .map_err(|e| CertForgeError::CryptoError(e.to_string()))?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
        LegacyCipher::DesCbc => cbc::Encryptor::<des::Des>::new_from_slices(&key, salt)
            .map_err(|e| CertForgeError::CryptoError(e.to_string()))?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
    };
    Ok(ciphertext)
}

/// Decrypts `ciphertext` with a key derived from `password` and `iv`.
///
/// Every failure, including a wrong password caught by the padding check,
/// is reported as the same generic `"bad decrypt"` error.
pub fn decrypt(
    ciphertext: &[u8],
    password: &[u8],
    iv: &[u8],
    cipher: LegacyCipher,
) -> Result<Vec<u8>> {
    let bad_decrypt = || CertForgeError::CryptoError("bad decrypt".to_string());
    if iv.len() != cipher.iv_len() {
        return Err(bad_decrypt());
    }
    let key = derive_key(password, iv, cipher.key_len());
    let plaintext = match cipher {
        LegacyCipher::DesEde3Cbc => cbc::Decryptor::<des::TdesEde3>::new_from_slices(&key, iv)
            .map_err(|_| bad_decrypt())?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext),
        LegacyCipher::DesCbc => cbc::Decryptor::<des::Des>::new_from_slices(&key, iv)
            .map_err(|_| bad_decrypt())?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext),
    };
    plaintext.map_err(|_| bad_decrypt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    const SALT: [u8; 8] = hex!("0102030405060708");

    #[test]
    fn derive_key_matches_openssl_enc() {
        // openssl enc -des-ede3-cbc -P -pass pass:hunter2 -S 0102030405060708 -md md5
        let key = derive_key(b"hunter2", &SALT, 24);
        assert_eq!(
            key.as_slice(),
            hex!("DD076B4BCD49C33676D8185C3DD67E935D3B7324FF7D8E10")
        );
        // DES-CBC uses the first block only
        let key = derive_key(b"hunter2", &SALT, 8);
        assert_eq!(key.as_slice(), hex!("DD076B4BCD49C336"));
    }

    #[test]
    fn derive_key_only_reads_eight_salt_bytes() {
        let long_iv = hex!("0102030405060708AABBCCDDEEFF0011");
        assert_eq!(
            derive_key(b"hunter2", &long_iv, 24).as_slice(),
            derive_key(b"hunter2", &SALT, 24).as_slice()
        );
    }

    #[test]
    fn round_trip_both_ciphers() {
        let plaintext = b"attack at dawn, bring the traditional key";
        for cipher in [LegacyCipher::DesEde3Cbc, LegacyCipher::DesCbc] {
            let ciphertext = encrypt_with_salt(plaintext, b"hunter2", cipher, &SALT).unwrap();
            assert_eq!(ciphertext.len() % 8, 0);
            assert_ne!(&ciphertext[..8], &plaintext[..8]);
            let decrypted = decrypt(&ciphertext, b"hunter2", &SALT, cipher).unwrap();
            assert_eq!(decrypted, plaintext);
        }
    }

    #[test]
    fn block_aligned_plaintext_gets_a_full_padding_block() {
        let ciphertext =
            encrypt_with_salt(&[7u8; 16], b"hunter2", LegacyCipher::DesEde3Cbc, &SALT).unwrap();
        assert_eq!(ciphertext.len(), 24);
    }

    #[test]
    fn wrong_password_never_reveals_why() {
        let plaintext = [0x30u8; 40];
        let ciphertext =
            encrypt_with_salt(&plaintext, b"hunter2", LegacyCipher::DesEde3Cbc, &SALT).unwrap();
        match decrypt(&ciphertext, b"hunter3", &SALT, LegacyCipher::DesEde3Cbc) {
            Err(err) => assert_eq!(err, CertForgeError::CryptoError("bad decrypt".into())),
            // padding may survive by chance; the output is then garbage
            Ok(garbage) => assert_ne!(garbage, plaintext),
        }
    }

    #[test]
    fn truncated_ciphertext_is_bad_decrypt() {
        let ciphertext =
            encrypt_with_salt(b"0123456789", b"pw", LegacyCipher::DesCbc, &SALT).unwrap();
        let err = decrypt(&ciphertext[..5], b"pw", &SALT, LegacyCipher::DesCbc).unwrap_err();
        assert_eq!(err, CertForgeError::CryptoError("bad decrypt".into()));
    }

    #[test]
    fn cipher_names() {
        assert_eq!(
            "des-ede3-cbc".parse::<LegacyCipher>().unwrap(),
            LegacyCipher::DesEde3Cbc
        );
        assert_eq!("DES-CBC".parse::<LegacyCipher>().unwrap(), LegacyCipher::DesCbc);
        assert!(matches!(
            "AES-128-CBC".parse::<LegacyCipher>(),
            Err(CertForgeError::CryptoError(msg)) if msg.contains("unsupported algorithm")
        ));
    }

    #[test]
    fn encrypt_draws_salt_from_rng() {
        let (ciphertext, salt) = encrypt(
            b"secret",
            b"hunter2",
            LegacyCipher::DesEde3Cbc,
            &mut rand_core::OsRng,
        )
        .unwrap();
        assert_eq!(
            decrypt(&ciphertext, b"hunter2", &salt, LegacyCipher::DesEde3Cbc).unwrap(),
            b"secret"
        );
    }

    proptest::proptest! {
        #[test]
        fn any_plaintext_round_trips(
            data in proptest::collection::vec(proptest::num::u8::ANY, 0..200),
            password in "[ -~]{1,24}",
            salt in proptest::array::uniform8(proptest::num::u8::ANY),
        ) {
            let ciphertext = encrypt_with_salt(&data, password.as_bytes(), LegacyCipher::DesEde3Cbc, &salt).unwrap();
            let decrypted = decrypt(&ciphertext, password.as_bytes(), &salt, LegacyCipher::DesEde3Cbc).unwrap();
            proptest::prop_assert_eq!(decrypted, data);
        }
    }
}
